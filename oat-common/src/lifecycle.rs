//! Group-scoped fixtures around sequential test bodies.
//!
//! A [`FixtureGroup`] owns one [`RequirementGraph`]. Running it:
//! 1. setup: build the declared requirements and provision them through the graph;
//! 2. run every test in declaration order against a fresh [`TestContext`];
//! 3. teardown: `cleanup_all` on the graph, whatever happened before.
//!
//! If setup fails, the tests are reported as skipped with the setup error.
//! Failures inside a test stay inside that test's report.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::TestEnvironment;
use crate::errors::{AssertionFailure, FailureKind, HarnessError, HarnessResult};
use crate::graph::{CleanupReport, RequirementGraph};
use crate::manifest::DeploymentSpec;
use crate::matcher::Expectation;
use crate::requirement::{
    DeploymentRequirement, Provision, ReleaseRequirement, Requirement, StemcellRequirement,
};
use crate::runner::CommandResult;
use crate::scratch::ScratchDir;

/// Environment-driven adjustments to a deployment spec, applied during setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploymentToggles {
    pub static_ip: bool,
    pub vip: bool,
}

impl DeploymentToggles {
    pub fn apply(&self, spec: &mut DeploymentSpec, env: &TestEnvironment) -> HarnessResult<()> {
        if self.static_ip {
            let ip = env.network.static_ip.as_deref().ok_or_else(|| {
                HarnessError::Config("static IP requested but OAT_STATIC_IP is unset".to_string())
            })?;
            spec.use_static_ip(ip);
        }
        if self.vip {
            let vip = env.network.vip.as_deref().ok_or_else(|| {
                HarnessError::Config("VIP requested but OAT_VIP is unset".to_string())
            })?;
            spec.use_vip(vip);
        }
        Ok(())
    }
}

/// Stemcell, release and a deployment rendered against them, in provisioning order.
///
/// The deployment spec comes from `OAT_DEPLOYMENT_SPEC` when set; `toggles`
/// are applied to it before the requirement is built.
pub fn deployment_requirements(
    env: &TestEnvironment,
    toggles: DeploymentToggles,
) -> HarnessResult<Vec<Requirement>> {
    let stemcell = StemcellRequirement::from_env(env)?;
    let release = ReleaseRequirement::from_env(env)?;
    let mut spec = DeploymentSpec::from_env(env)?;
    toggles.apply(&mut spec, env)?;

    Ok(vec![
        stemcell.clone().into(),
        release.clone().into(),
        DeploymentRequirement::new(spec, stemcell, release).into(),
    ])
}

/// What a test body sees: the environment, the backend and soft assertions.
pub struct TestContext<'g, P> {
    env: &'g TestEnvironment,
    backend: &'g P,
    test_name: &'g str,
    failures: RefCell<Vec<AssertionFailure>>,
}

impl<'g, P> TestContext<'g, P> {
    pub fn new(env: &'g TestEnvironment, backend: &'g P, test_name: &'g str) -> Self {
        Self {
            env,
            backend,
            test_name,
            failures: RefCell::new(Vec::new()),
        }
    }

    pub fn env(&self) -> &'g TestEnvironment {
        self.env
    }

    pub fn backend(&self) -> &'g P {
        self.backend
    }

    pub fn test_name(&self) -> &'g str {
        self.test_name
    }

    /// Soft assertion on a command result: records a failure and keeps going.
    pub fn expect(&self, result: &CommandResult, expectation: &Expectation) -> bool {
        match expectation.check(result) {
            Ok(()) => true,
            Err(failure) => {
                self.record(failure);
                false
            }
        }
    }

    /// Soft assertion on an arbitrary condition.
    pub fn assert_that(&self, condition: bool, message: impl Into<String>) -> bool {
        if !condition {
            self.record(AssertionFailure::message(message));
        }
        condition
    }

    pub fn record(&self, failure: AssertionFailure) {
        warn!(test = %self.test_name, failure = %failure.message, "Assertion failed");
        self.failures.borrow_mut().push(failure);
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.borrow().is_empty()
    }

    /// Fresh scratch directory for this test, removed when dropped.
    pub fn scratch_dir(&self) -> HarnessResult<ScratchDir> {
        ScratchDir::new_in(&self.env.scratch_root, self.test_name)
    }

    fn take_failures(&self) -> Vec<AssertionFailure> {
        std::mem::take(&mut *self.failures.borrow_mut())
    }
}

pub type TestFuture<'a> = Pin<Box<dyn Future<Output = HarnessResult<()>> + 'a>>;

type TestBody<P> = Box<dyn for<'a> Fn(&'a TestContext<'a, P>) -> TestFuture<'a>>;

/// A named test body.
pub struct TestCase<P> {
    name: String,
    requires_ssh: bool,
    body: TestBody<P>,
}

impl<P: 'static> TestCase<P> {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext<'a, P>) -> TestFuture<'a> + 'static,
    {
        Self {
            name: name.into(),
            requires_ssh: false,
            body: Box::new(body),
        }
    }

    /// Skip this test when remote shell access is disabled.
    pub fn requires_ssh(mut self) -> Self {
        self.requires_ssh = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    /// Assertion failures (including convergence timeouts), all of them.
    Failed { failures: Vec<String> },
    /// The body stopped on a non-assertion error.
    Errored { kind: FailureKind, message: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: TestOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Set when setup failed; the tests were then skipped.
    pub setup_error: Option<String>,
    pub tests: Vec<TestReport>,
    pub cleanup: CleanupReport,
}

impl GroupReport {
    pub fn count(&self, predicate: impl Fn(&TestOutcome) -> bool) -> usize {
        self.tests.iter().filter(|t| predicate(&t.outcome)).count()
    }

    /// Setup succeeded, no test failed or errored, and cleanup was clean.
    pub fn succeeded(&self) -> bool {
        self.setup_error.is_none()
            && self.cleanup.is_clean()
            && self.tests.iter().all(|t| {
                matches!(t.outcome, TestOutcome::Passed | TestOutcome::Skipped { .. })
            })
    }
}

type SetupStep = Box<dyn FnOnce(&TestEnvironment) -> HarnessResult<Vec<Requirement>>>;

pub struct FixtureGroup<P> {
    name: String,
    env: Arc<TestEnvironment>,
    graph: RequirementGraph<P>,
    setup_steps: Vec<SetupStep>,
    tests: Vec<TestCase<P>>,
}

impl<P: Provision + 'static> FixtureGroup<P> {
    pub fn new(name: impl Into<String>, env: Arc<TestEnvironment>, backend: P) -> Self {
        Self {
            name: name.into(),
            env,
            graph: RequirementGraph::new(backend),
            setup_steps: Vec::new(),
            tests: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &RequirementGraph<P> {
        &self.graph
    }

    /// Declare a requirement for setup.
    pub fn require(self, requirement: impl Into<Requirement>) -> Self {
        let requirement = requirement.into();
        self.setup_with(move |_| Ok(vec![requirement]))
    }

    /// Declare requirements that are built from the environment at setup time.
    pub fn setup_with<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&TestEnvironment) -> HarnessResult<Vec<Requirement>> + 'static,
    {
        self.setup_steps.push(Box::new(build));
        self
    }

    pub fn test(mut self, case: TestCase<P>) -> Self {
        self.tests.push(case);
        self
    }

    /// Build and provision every declared requirement, in declaration order.
    pub async fn setup(&mut self) -> HarnessResult<()> {
        for step in std::mem::take(&mut self.setup_steps) {
            for requirement in step(self.env.as_ref())? {
                self.graph.require(requirement).await?;
            }
        }
        Ok(())
    }

    pub async fn run_test(&self, case: &TestCase<P>) -> TestReport {
        let start = Instant::now();
        if case.requires_ssh && !self.env.ssh.enabled {
            info!(group = %self.name, test = %case.name, "Skipping test that needs ssh");
            return report(case, start, TestOutcome::Skipped {
                reason: "remote shell access is disabled".to_string(),
            });
        }

        info!(group = %self.name, test = %case.name, "Running test");
        let ctx = TestContext::new(&self.env, self.graph.backend(), &case.name);
        let result = (case.body)(&ctx).await;
        let mut failures: Vec<String> = ctx
            .take_failures()
            .into_iter()
            .map(|f| f.to_string())
            .collect();

        let outcome = match result {
            Ok(()) if failures.is_empty() => TestOutcome::Passed,
            Ok(()) => TestOutcome::Failed { failures },
            Err(e) if e.kind().counts_as_assertion() => {
                failures.push(e.to_string());
                TestOutcome::Failed { failures }
            }
            Err(e) => {
                failures.push(e.to_string());
                TestOutcome::Errored {
                    kind: e.kind(),
                    message: failures.join("\n"),
                }
            }
        };

        match &outcome {
            TestOutcome::Passed => info!(group = %self.name, test = %case.name, "Test passed"),
            other => warn!(group = %self.name, test = %case.name, outcome = ?other, "Test did not pass"),
        }
        report(case, start, outcome)
    }

    /// Tear down everything the group provisioned.
    pub async fn teardown(&mut self) -> CleanupReport {
        let cleanup = self.graph.cleanup_all().await;
        if !cleanup.is_clean() {
            error!(group = %self.name, failed = cleanup.failed.len(), "Cleanup left requirements behind");
        }
        cleanup
    }

    /// Setup, run every test, then tear down unconditionally.
    pub async fn run(mut self) -> GroupReport {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(group = %self.name, tests = self.tests.len(), "Starting group");

        let setup_error = match self.setup().await {
            Ok(()) => None,
            Err(e) => {
                error!(group = %self.name, kind = %e.kind(), error = %e, "Group setup failed");
                Some(e.to_string())
            }
        };

        let tests = match &setup_error {
            None => {
                let mut tests = Vec::with_capacity(self.tests.len());
                for case in &self.tests {
                    tests.push(self.run_test(case).await);
                }
                tests
            }
            Some(message) => self.skipped(message),
        };

        let cleanup = self.teardown().await;
        GroupReport {
            group: self.name,
            started_at,
            duration_ms: millis(start.elapsed()),
            setup_error,
            tests,
            cleanup,
        }
    }
}

impl<P> FixtureGroup<P> {
    pub fn tests(&self) -> &[TestCase<P>] {
        &self.tests
    }

    /// Report every test as skipped without provisioning anything, e.g. when
    /// the director could not be targeted.
    pub fn skip(self, reason: impl Into<String>) -> GroupReport {
        let reason = reason.into();
        warn!(group = %self.name, reason = %reason, "Skipping group");
        GroupReport {
            tests: self.skipped(&reason),
            group: self.name,
            started_at: Utc::now(),
            duration_ms: 0,
            setup_error: Some(reason),
            cleanup: CleanupReport::default(),
        }
    }

    fn skipped(&self, setup_error: &str) -> Vec<TestReport> {
        self.tests
            .iter()
            .map(|case| {
                report(case, Instant::now(), TestOutcome::Skipped {
                    reason: format!("group setup failed: {setup_error}"),
                })
            })
            .collect()
    }
}

fn report<P>(case: &TestCase<P>, start: Instant, outcome: TestOutcome) -> TestReport {
    TestReport {
        name: case.name.clone(),
        outcome,
        duration_ms: millis(start.elapsed()),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
