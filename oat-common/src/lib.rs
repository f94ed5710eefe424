//! Shared harness for orchestrator acceptance tests.
//!
//! The crate is organised leaves first:
//! - [`runner`]: run a command locally or over the remote shell and capture its output
//! - [`matcher`]: decide whether a captured result meets an expectation
//! - [`poller`]: wait for asynchronously changing remote state to converge
//! - [`requirement`] and [`graph`]: provision prerequisite state exactly once and
//!   tear it down in reverse order
//! - [`lifecycle`]: group-scoped setup/teardown around sequential test bodies
//!
//! [`director`] is the backend that turns requirements into orchestrator CLI calls.

pub mod archive;
pub mod config;
pub mod director;
pub mod errors;
pub mod graph;
pub mod lifecycle;
pub mod logging;
pub mod manifest;
pub mod matcher;
pub mod poller;
pub mod requirement;
pub mod runner;
pub mod scratch;
pub mod ssh;

pub use archive::{ArtifactManifest, list_entries, read_artifact_manifest, tar_entries};
pub use config::{EnvError, EnvParser, TestEnvironment};
pub use director::Director;
pub use errors::{AssertionFailure, FailureKind, HarnessError, HarnessResult};
pub use graph::{CleanupReport, RequirementGraph};
pub use lifecycle::{
    DeploymentToggles, FixtureGroup, GroupReport, TestCase, TestContext,
    TestFuture, TestOutcome, TestReport, deployment_requirements,
};
pub use logging::{LogConfig, LoggingGuards, init_logging, init_test_logging};
pub use manifest::{DEFAULT_DEPLOYMENT, DeploymentSpec};
pub use matcher::{Expectation, matches};
pub use poller::{ConvergenceQuery, PollOptions, wait_for, wait_for_command};
pub use requirement::{
    Artifact, DeploymentRequirement, Provision, ReleaseRequirement, Requirement, RequirementId,
    RequirementKind, StemcellRequirement,
};
pub use runner::{CommandResult, CommandRunner, CommandStatus, RunOptions, Transport};
pub use scratch::{ScratchDir, with_scratch_dir};
pub use ssh::{RemoteAuth, RemoteShell};
