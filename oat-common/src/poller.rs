//! Polling for eventual consistency.
//!
//! Remote state (VM running, agent back up, job stopped) changes
//! asynchronously. [`wait_for`] evaluates a query immediately, then at a
//! fixed interval, until its convergence predicate holds or the time bound
//! passes.
//!
//! The bound is checked between evaluations. A query that blocks is not
//! interrupted; give commands their own timeout through [`RunOptions`].

use std::fmt::Debug;
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::errors::{HarnessError, HarnessResult};
use crate::matcher::Expectation;
use crate::runner::{CommandResult, CommandRunner, RunOptions};

/// Interval and overall bound for a convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

/// An observation of remote state plus the predicate that says it has converged.
pub struct ConvergenceQuery<O, C> {
    description: String,
    observe: O,
    converged: C,
}

impl<O, C, Fut, T> ConvergenceQuery<O, C>
where
    O: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    C: Fn(&T) -> bool,
{
    pub fn new(description: impl Into<String>, observe: O, converged: C) -> Self {
        Self {
            description: description.into(),
            observe,
            converged,
        }
    }
}

/// Poll until `query` converges, returning the converged observation.
///
/// Errors from the observation itself end the wait immediately. If the bound
/// passes first, the error carries the last observed value.
pub async fn wait_for<O, C, Fut, T>(
    mut query: ConvergenceQuery<O, C>,
    options: PollOptions,
) -> HarnessResult<T>
where
    O: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    C: Fn(&T) -> bool,
    T: Debug,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let value = (query.observe)().await?;
        if (query.converged)(&value) {
            info!(
                description = %query.description,
                attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Converged"
            );
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= options.timeout {
            return Err(HarnessError::TimeoutExceeded {
                description: query.description,
                timeout: options.timeout,
                last_observed: format!("{value:?}"),
            });
        }

        let pause = options.interval.min(options.timeout - elapsed);
        debug!(
            description = %query.description,
            attempt = attempts,
            next_in_ms = pause.as_millis() as u64,
            "Not converged yet"
        );
        tokio::time::sleep(pause).await;
    }
}

/// Re-run `command_line` until its result satisfies `expectation`.
pub async fn wait_for_command(
    runner: &CommandRunner,
    command_line: &str,
    run_options: &RunOptions,
    expectation: &Expectation,
    poll: PollOptions,
) -> HarnessResult<CommandResult> {
    let query = ConvergenceQuery::new(
        format!("`{command_line}` to meet expectation"),
        move || async move { runner.run(command_line, run_options).await.map(Observed) },
        |observed: &Observed| expectation.matches(&observed.0),
    );
    wait_for(query, poll).await.map(|observed| observed.0)
}

/// Renders only what a reader of a timeout needs from the last command.
struct Observed(CommandResult);

impl Debug for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0.status)?;
        let stdout = self.0.stdout.trim();
        if !stdout.is_empty() {
            write!(f, "; stdout: {stdout}")?;
        }
        let stderr = self.0.stderr.trim();
        if !stderr.is_empty() {
            write!(f, "; stderr: {stderr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(timeout_ms: u64) -> PollOptions {
        PollOptions::new(Duration::from_millis(20), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_converges_after_some_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let query = ConvergenceQuery::new(
            "counter reaches 3",
            move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
            |n: &u32| *n >= 3,
        );
        let value = wait_for(query, fast(5_000)).await.unwrap();
        assert_eq!(value, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_already_converged_evaluates_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let query = ConvergenceQuery::new(
            "immediately true",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("running")
            },
            |state: &&str| *state == "running",
        );
        wait_for(query, fast(1_000)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_reports_last_observation() {
        let start = Instant::now();
        let query = ConvergenceQuery::new(
            "batlight/0 running",
            || async { Ok("batlight/0 stopped".to_string()) },
            |state: &String| state.contains("running"),
        );
        let err = wait_for(query, fast(150)).await.unwrap_err();

        assert!(start.elapsed() >= Duration::from_millis(150));
        match err {
            HarnessError::TimeoutExceeded {
                description,
                last_observed,
                ..
            } => {
                assert_eq!(description, "batlight/0 running");
                assert!(last_observed.contains("batlight/0 stopped"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_query_error_stops_waiting() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let query = ConvergenceQuery::new(
            "never",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(HarnessError::Config("director unreachable".to_string()))
            },
            |_: &u32| true,
        );
        let err = wait_for(query, fast(5_000)).await.unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_for_command_until_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ready");
        let writer_marker = marker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::write(writer_marker, "running").unwrap();
        });

        let runner = CommandRunner::new(Duration::from_secs(5));
        let line = format!("cat {}", marker.display());
        let result = wait_for_command(
            &runner,
            &line,
            &RunOptions::local(),
            &Expectation::succeed_with("running").unwrap(),
            fast(5_000),
        )
        .await
        .unwrap();
        assert!(result.stdout_contains("running"));
    }
}
