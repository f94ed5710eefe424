use oat_common::{
    AssertionFailure, Director, Expectation, HarnessResult, TestCase, TestContext,
    TestFuture, list_entries,
};

use super::target;

pub(super) fn cases() -> Vec<TestCase<Director>> {
    vec![
        TestCase::new("should get agent log", agent_log),
        TestCase::new("should get job logs", job_logs),
    ]
}

fn agent_log<'a>(ctx: &'a TestContext<'a, Director>) -> TestFuture<'a> {
    Box::pin(async move {
        let (_, job) = target(ctx.env())?;
        let entries = fetch_logs(ctx, &format!("logs {job} 0 --agent")).await?;
        ctx.assert_that(
            entries.iter().any(|e| e == "./current"),
            format!("agent log tarball has no ./current: {entries:?}"),
        );
        Ok(())
    })
}

fn job_logs<'a>(ctx: &'a TestContext<'a, Director>) -> TestFuture<'a> {
    Box::pin(async move {
        let (_, job) = target(ctx.env())?;
        let entries = fetch_logs(ctx, &format!("logs {job} 0")).await?;
        for stream in ["stdout", "stderr"] {
            let wanted = format!("./{job}/{job}.{stream}.log");
            ctx.assert_that(
                entries.contains(&wanted),
                format!("job log tarball has no {wanted}: {entries:?}"),
            );
        }
        Ok(())
    })
}

/// Run a `logs` subcommand in a scratch directory and list the saved tarball.
async fn fetch_logs(ctx: &TestContext<'_, Director>, args: &str) -> HarnessResult<Vec<String>> {
    let scratch = ctx.scratch_dir()?;
    let result = ctx.backend().cli_in(args, scratch.path()).await?;
    Expectation::succeed_with("Logs saved in")?.check(&result)?;

    let tarballs = scratch.find_by_extension("tgz")?;
    let Some(tarball) = tarballs.first() else {
        return Err(AssertionFailure::message(format!(
            "`{args}` saved no .tgz in {}",
            scratch.path().display()
        ))
        .into());
    };
    list_entries(tarball.clone()).await
}
