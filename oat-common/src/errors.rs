//! Error taxonomy for the acceptance harness.
//!
//! | Variant           | Raised when                                    | Scope of the failure      |
//! |-------------------|------------------------------------------------|---------------------------|
//! | `Transport`       | a command cannot be launched or reach its host | whole group setup         |
//! | `Assertion`       | a command ran but its output did not match     | the individual test       |
//! | `Provisioning`    | a requirement's provision action failed        | the owning group          |
//! | `TimeoutExceeded` | a convergence wait ran out of time             | test, or group if during provisioning |
//!
//! Every variant carries the captured command output or the last polled state.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Coarse classification used by the lifecycle to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Assertion,
    Provisioning,
    Timeout,
    Config,
    Io,
}

impl FailureKind {
    /// Failures that count against a single test rather than aborting it as an error.
    pub fn counts_as_assertion(self) -> bool {
        matches!(self, Self::Assertion | Self::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transport => "transport",
            Self::Assertion => "assertion",
            Self::Provisioning => "provisioning",
            Self::Timeout => "timeout",
            Self::Config => "config",
            Self::Io => "io",
        };
        write!(f, "{label}")
    }
}

/// A command ran but did not meet its expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionFailure {
    pub message: String,
    pub command: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

impl AssertionFailure {
    /// Failure that is not tied to a command invocation.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            command: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(command) = &self.command {
            write!(f, "\n  command: {command}")?;
        }
        if !self.stdout.trim().is_empty() {
            write!(f, "\n  stdout: {}", self.stdout.trim())?;
        }
        if !self.stderr.trim().is_empty() {
            write!(f, "\n  stderr: {}", self.stderr.trim())?;
        }
        Ok(())
    }
}

impl std::error::Error for AssertionFailure {}

/// Error type for harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Transport failure running `{command}`: {reason}")]
    Transport { command: String, reason: String },

    #[error("Assertion failed: {0}")]
    Assertion(#[from] AssertionFailure),

    #[error("Provisioning of {identity} failed: {source}")]
    Provisioning {
        identity: String,
        #[source]
        source: Box<HarnessError>,
    },

    #[error(
        "Timed out after {timeout:?} waiting for {description}; last observed: {last_observed}"
    )]
    TimeoutExceeded {
        description: String,
        timeout: Duration,
        last_observed: String,
    },

    #[error("Invalid output pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Archive error for {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    /// Classify this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } => FailureKind::Transport,
            Self::Assertion(_) => FailureKind::Assertion,
            Self::Provisioning { .. } => FailureKind::Provisioning,
            Self::TimeoutExceeded { .. } => FailureKind::Timeout,
            Self::InvalidPattern(_) | Self::Config(_) => FailureKind::Config,
            Self::Archive { .. } | Self::Io(_) => FailureKind::Io,
        }
    }

    /// Attribute a failure raised while provisioning `identity`.
    ///
    /// Transport errors keep their kind: an unreachable target is a harness fault,
    /// not a defect of the requirement.
    pub fn into_provisioning(self, identity: impl fmt::Display) -> Self {
        match self {
            Self::Transport { .. } | Self::Provisioning { .. } => self,
            other => Self::Provisioning {
                identity: identity.to_string(),
                source: Box::new(other),
            },
        }
    }
}
