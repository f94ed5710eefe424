use oat_common::{
    Director, Expectation, HarnessError, RunOptions, TestCase, TestContext, TestFuture,
};

use super::target;

pub(super) fn cases() -> Vec<TestCase<Director>> {
    vec![TestCase::new("should survive agent dying", survives_agent_dying).requires_ssh()]
}

/// Kill the agent on the VM, wait for the director to see the VM running
/// again, then fetch the agent logs through it.
fn survives_agent_dying<'a>(ctx: &'a TestContext<'a, Director>) -> TestFuture<'a> {
    Box::pin(async move {
        let env = ctx.env();
        let director = ctx.backend();
        let (deployment, job) = target(env)?;
        let vip = env.network.vip.as_deref().ok_or_else(|| {
            HarnessError::Config("agent test needs OAT_VIP to reach the VM".to_string())
        })?;

        let shell = env.vm_shell(vip)?;
        let kill = shell.sudo("pkill -9 agent");
        let killed = director
            .runner()
            .run(&kill, &RunOptions::remote(shell))
            .await?;
        ctx.expect(&killed, &Expectation::success());

        let instance = format!("{job}/0");
        director
            .wait_for_vm(&deployment, &instance, env.timeouts.deploy)
            .await?;

        let scratch = ctx.scratch_dir()?;
        let logs = director
            .cli(&format!(
                "logs {job} 0 --agent --dir {}",
                shell_escape::escape(scratch.path().to_string_lossy())
            ))
            .await?;
        ctx.expect(&logs, &Expectation::success());
        Ok(())
    })
}
