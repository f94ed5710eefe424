use oat_common::{Director, Expectation, TestCase, TestContext, TestFuture};

use super::target;

pub(super) fn cases() -> Vec<TestCase<Director>> {
    vec![
        TestCase::new("should recreate a job", recreate),
        TestCase::new("should stop and start a job", stop_and_start),
    ]
}

fn recreate<'a>(ctx: &'a TestContext<'a, Director>) -> TestFuture<'a> {
    Box::pin(async move {
        let (_, job) = target(ctx.env())?;
        let result = ctx.backend().cli(&format!("recreate {job} 0")).await?;
        ctx.expect(&result, &Expectation::succeed_with(&format!("{job}/0 recreated"))?);
        Ok(())
    })
}

fn stop_and_start<'a>(ctx: &'a TestContext<'a, Director>) -> TestFuture<'a> {
    Box::pin(async move {
        let (_, job) = target(ctx.env())?;
        let director = ctx.backend();

        let stopped = director.cli(&format!("stop {job} 0")).await?;
        ctx.expect(&stopped, &Expectation::succeed_with(&format!("{job}/0 stopped"))?);

        let started = director.cli(&format!("start {job} 0")).await?;
        ctx.expect(&started, &Expectation::succeed_with(&format!("{job}/0 started"))?);
        Ok(())
    })
}
