//! Expectations on a [`CommandResult`].
//!
//! An expectation has two optional parts: the exit outcome (success or
//! failure) and a regular expression that must occur somewhere in stdout.
//! Unset parts always hold. Patterns are searched, not anchored, and `.`
//! does not cross line boundaries unless the pattern enables `(?s)`.

use regex::Regex;

use crate::errors::{AssertionFailure, HarnessResult};
use crate::runner::{CommandResult, CommandStatus};

/// What a command is expected to produce.
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    /// `Some(true)`: must exit 0. `Some(false)`: must exit non-zero.
    pub expect_success: Option<bool>,
    /// Must match somewhere in stdout.
    pub pattern: Option<Regex>,
}

impl Expectation {
    /// No constraint at all.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn success() -> Self {
        Self {
            expect_success: Some(true),
            pattern: None,
        }
    }

    pub fn failure() -> Self {
        Self {
            expect_success: Some(false),
            pattern: None,
        }
    }

    /// Exit 0 and stdout matching `pattern`.
    pub fn succeed_with(pattern: &str) -> HarnessResult<Self> {
        Self::success().with_pattern(pattern)
    }

    /// Add a stdout pattern. Fails on an invalid regular expression.
    pub fn with_pattern(mut self, pattern: &str) -> HarnessResult<Self> {
        self.pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Pure check: does `result` satisfy every constraint?
    pub fn matches(&self, result: &CommandResult) -> bool {
        self.exit_matches(result.status) && self.stdout_matches(&result.stdout)
    }

    /// Like [`matches`](Self::matches) but explains the first unmet constraint.
    pub fn check(&self, result: &CommandResult) -> Result<(), AssertionFailure> {
        let failure = |message: String| AssertionFailure {
            message,
            command: Some(result.command.clone()),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
        };

        if !self.exit_matches(result.status) {
            let wanted = match self.expect_success {
                Some(true) => "success",
                _ => "failure",
            };
            return Err(failure(format!(
                "expected {wanted}, command ended with {}",
                describe_status(result.status)
            )));
        }
        if !self.stdout_matches(&result.stdout) {
            let pattern = self.pattern.as_ref().map(Regex::as_str).unwrap_or_default();
            return Err(failure(format!("stdout did not match /{pattern}/")));
        }
        Ok(())
    }

    // A timed out command has no exit outcome, so it satisfies neither expectation.
    fn exit_matches(&self, status: CommandStatus) -> bool {
        match (self.expect_success, status) {
            (None, _) => true,
            (Some(_), CommandStatus::TimedOut) => false,
            (Some(true), CommandStatus::Success) => true,
            (Some(false), CommandStatus::Failed(_)) => true,
            _ => false,
        }
    }

    fn stdout_matches(&self, stdout: &str) -> bool {
        self.pattern.as_ref().is_none_or(|re| re.is_match(stdout))
    }
}

/// Free-function form of [`Expectation::matches`].
pub fn matches(result: &CommandResult, expectation: &Expectation) -> bool {
    expectation.matches(result)
}

fn describe_status(status: CommandStatus) -> String {
    match status {
        CommandStatus::Success => "exit 0".to_string(),
        CommandStatus::Failed(Some(code)) => format!("exit {code}"),
        CommandStatus::Failed(None) => "termination by signal".to_string(),
        CommandStatus::TimedOut => "a timeout".to_string(),
    }
}
