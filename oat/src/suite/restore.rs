use oat_common::{
    Director, Expectation, HarnessResult, TestCase, TestContext, TestFuture, with_scratch_dir,
};

use super::target;

pub(super) fn cases() -> Vec<TestCase<Director>> {
    vec![TestCase::new("should restore director DB", restores_director_db)]
}

/// Back up the director with and without the deployment, then restore each
/// backup and check the deployment list follows. Each step must pass before
/// the next one runs.
fn restores_director_db<'a>(ctx: &'a TestContext<'a, Director>) -> TestFuture<'a> {
    Box::pin(async move {
        let env = ctx.env();
        let (deployment, _) = target(env)?;
        with_scratch_dir(&env.scratch_root, "restore", |dir| async move {
            let director = ctx.backend();
            let step = |args: String, pattern: String| {
                let dir = dir.clone();
                async move {
                    let result = director.cli_in(&args, &dir).await?;
                    Expectation::succeed_with(&pattern)?.check(&result)?;
                    HarnessResult::Ok(())
                }
            };

            step(
                "backup one_deployment.tgz".into(),
                r"Backup of BOSH director was put in.*one_deployment\.tgz".into(),
            )
            .await?;
            step(
                format!("delete deployment {deployment}"),
                "Deleted deployment".into(),
            )
            .await?;
            step(
                "backup no_deployment.tgz".into(),
                r"Backup of BOSH director was put in.*no_deployment\.tgz".into(),
            )
            .await?;
            step("restore one_deployment.tgz".into(), "Restore done!".into()).await?;
            step("deployments".into(), deployment.clone()).await?;
            step("restore no_deployment.tgz".into(), "Restore done!".into()).await?;

            // Exit status varies across CLI versions when the list is empty.
            let listing = director.cli_in("deployments", &dir).await?;
            ctx.expect(&listing, &Expectation::any().with_pattern("No deployments")?);
            Ok(())
        })
        .await
    })
}
