//! The orchestrator CLI as a [`Provision`] backend.
//!
//! Every call is `<cli> <global flags> <subcommand> <args>` run locally.
//! Requirement variants map to subcommands:
//!
//! | Requirement | provision                                        | teardown                        |
//! |-------------|--------------------------------------------------|---------------------------------|
//! | stemcell    | `upload stemcell <path>`                         | `delete stemcell <name> <ver>`  |
//! | release     | `upload release <path>`                          | `delete release <name> <ver>`   |
//! | deployment  | `deployment <manifest>`, `deploy`, wait on `vms` | `delete deployment <name>`      |
//!
//! Deployment teardown is skipped when `deployments` no longer lists the name.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::TestEnvironment;
use crate::errors::HarnessResult;
use crate::matcher::Expectation;
use crate::poller::wait_for_command;
use crate::requirement::{DeploymentRequirement, Provision, Requirement};
use crate::runner::{CommandResult, CommandRunner, RunOptions};
use crate::scratch::{ScratchDir, sanitize_component};

/// Handle on the director under test.
pub struct Director {
    env: Arc<TestEnvironment>,
    runner: CommandRunner,
    work_dir: ScratchDir,
}

impl Director {
    pub fn new(env: Arc<TestEnvironment>) -> HarnessResult<Self> {
        let work_dir = ScratchDir::new_in(&env.scratch_root, "director")?;
        Ok(Self {
            runner: CommandRunner::new(env.timeouts.command),
            env,
            work_dir,
        })
    }

    pub fn env(&self) -> &TestEnvironment {
        &self.env
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    /// Full command line for `args`.
    pub fn command_line(&self, args: &str) -> String {
        let mut line = shell_escape::escape(Cow::from(self.env.cli.as_str())).into_owned();
        let flags = self.env.cli_flags.trim();
        if !flags.is_empty() {
            line.push(' ');
            line.push_str(flags);
        }
        line.push(' ');
        line.push_str(args);
        line
    }

    fn base_options(&self) -> RunOptions {
        let mut options = RunOptions::local();
        if let Some(password) = &self.env.password {
            options = options.redact(password.as_str());
        }
        options
    }

    /// Run a CLI subcommand with the default timeout. A non-zero exit is not an error.
    pub async fn cli(&self, args: &str) -> HarnessResult<CommandResult> {
        self.runner
            .run(&self.command_line(args), &self.base_options())
            .await
    }

    /// Run a CLI subcommand in `dir` (e.g. where `logs` should save its tarball).
    pub async fn cli_in(&self, args: &str, dir: &Path) -> HarnessResult<CommandResult> {
        self.runner
            .run(&self.command_line(args), &self.base_options().in_dir(dir))
            .await
    }

    /// Run a CLI subcommand and turn an unmet expectation into an assertion error.
    pub async fn cli_expect(
        &self,
        args: &str,
        expectation: &Expectation,
        timeout: Option<Duration>,
    ) -> HarnessResult<CommandResult> {
        let mut options = self.base_options();
        options.timeout = timeout;
        let result = self.runner.run(&self.command_line(args), &options).await?;
        expectation.check(&result)?;
        Ok(result)
    }

    /// Point the CLI at the director and log in when credentials are configured.
    pub async fn login(&self) -> HarnessResult<()> {
        let target = format!("target {}", quote(&self.env.director));
        self.cli_expect(&target, &Expectation::success(), None).await?;

        if let (Some(user), Some(password)) = (&self.env.user, &self.env.password) {
            let login = format!("login {} {}", quote(user), quote(password));
            self.cli_expect(&login, &Expectation::success(), None).await?;
        }
        info!(director = %self.env.director, "Targeted director");
        Ok(())
    }

    /// Poll `vms <deployment>` until `instance` (e.g. `batlight/0`) shows as running.
    pub async fn wait_for_vm(
        &self,
        deployment: &str,
        instance: &str,
        timeout: Duration,
    ) -> HarnessResult<CommandResult> {
        let expectation =
            Expectation::succeed_with(&format!("{}[^\\n]*running", regex::escape(instance)))?;
        wait_for_command(
            &self.runner,
            &self.command_line(&format!("vms {}", quote(deployment))),
            &self.base_options(),
            &expectation,
            self.env.poll_options(timeout),
        )
        .await
    }

    /// Whether `deployments` lists `name`. Tests may delete the deployment themselves.
    pub async fn deployment_exists(&self, name: &str) -> HarnessResult<bool> {
        let listing = self.cli("deployments").await?;
        // Older CLIs exit 1 with "No deployments" when the list is empty.
        if listing.stdout_contains("No deployments") {
            return Ok(false);
        }
        Expectation::success().check(&listing)?;
        // A whole table cell, so a release called `name` does not count.
        let pattern = regex::Regex::new(&format!(r"(?m)(^|\|)\s*{}\s*(\||$)", regex::escape(name)))?;
        Ok(pattern.is_match(&listing.stdout))
    }

    async fn deploy(&self, deployment: &DeploymentRequirement) -> HarnessResult<()> {
        let manifest_path = self
            .work_dir
            .join(format!("{}.yml", sanitize_component(deployment.name())));
        tokio::fs::write(&manifest_path, deployment.manifest()?).await?;

        let deploy_timeout = Some(self.env.timeouts.deploy);
        self.cli_expect(
            &format!("deployment {}", quote_path(&manifest_path)),
            &Expectation::success(),
            None,
        )
        .await?;
        self.cli_expect("deploy", &Expectation::success(), deploy_timeout)
            .await?;

        wait_for_command(
            &self.runner,
            &self.command_line(&format!("vms {}", quote(deployment.name()))),
            &self.base_options(),
            &Expectation::succeed_with("running")?,
            self.env.poll_options(self.env.timeouts.deploy),
        )
        .await?;
        info!(deployment = %deployment.name(), "Deployment running");
        Ok(())
    }
}

impl Provision for Director {
    async fn provision(&self, requirement: &Requirement) -> HarnessResult<()> {
        match requirement {
            Requirement::Stemcell(stemcell) => {
                let args = format!("upload stemcell {}", quote_path(stemcell.artifact.path()));
                self.cli_expect(&args, &Expectation::success(), None)
                    .await
                    .map(drop)
            }
            Requirement::Release(release) => {
                let args = format!("upload release {}", quote_path(release.artifact.path()));
                self.cli_expect(&args, &Expectation::success(), None)
                    .await
                    .map(drop)
            }
            Requirement::Deployment(deployment) => self.deploy(deployment).await,
        }
    }

    async fn teardown(&self, requirement: &Requirement) -> HarnessResult<()> {
        let (args, timeout) = match requirement {
            Requirement::Stemcell(stemcell) => (
                format!(
                    "delete stemcell {} {}",
                    quote(&stemcell.artifact.name),
                    quote(&stemcell.artifact.version)
                ),
                None,
            ),
            Requirement::Release(release) => (
                format!(
                    "delete release {} {}",
                    quote(&release.artifact.name),
                    quote(&release.artifact.version)
                ),
                None,
            ),
            Requirement::Deployment(deployment) => {
                if !self.deployment_exists(deployment.name()).await? {
                    info!(deployment = %deployment.name(), "Deployment already gone");
                    return Ok(());
                }
                (
                    format!("delete deployment {}", quote(deployment.name())),
                    Some(self.env.timeouts.deploy),
                )
            }
        };
        self.cli_expect(&args, &Expectation::success(), timeout)
            .await
            .map(drop)
    }
}

fn quote(value: &str) -> Cow<'_, str> {
    shell_escape::escape(Cow::from(value))
}

fn quote_path(path: &Path) -> String {
    shell_escape::escape(path.to_string_lossy()).into_owned()
}
