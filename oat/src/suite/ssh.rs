use oat_common::ssh::scrub_known_host;
use oat_common::{Director, Expectation, TestCase, TestContext, TestEnvironment, TestFuture};

use super::target;

pub(super) fn cases() -> Vec<TestCase<Director>> {
    vec![TestCase::new("can ssh into a vm", ssh_into_vm)]
}

/// `--gateway_*` options for reaching the VM through the director with the
/// configured key. Empty when only password auth is available.
fn gateway_options(env: &TestEnvironment) -> String {
    let Some(key) = &env.ssh.private_key else {
        return String::new();
    };
    format!(
        " --gateway_host {} --gateway_user {} --gateway_identity_file {}",
        shell_escape::escape(env.director.as_str().into()),
        shell_escape::escape(env.ssh.user.as_str().into()),
        shell_escape::escape(key.to_string_lossy()),
    )
}

fn ssh_into_vm<'a>(ctx: &'a TestContext<'a, Director>) -> TestFuture<'a> {
    Box::pin(async move {
        let env = ctx.env();
        let director = ctx.backend();
        let (_, job) = target(env)?;

        // Recreated VMs come back under the same addresses with new host keys.
        let runner = director.runner();
        scrub_known_host(runner, &env.director).await;
        if let Some(ip) = &env.network.static_ip {
            scrub_known_host(runner, ip).await;
            if env.ssh.private_key.is_some() {
                scrub_known_host(runner, &format!("{},{ip}", env.director)).await;
            }
        }

        let result = director
            .cli(&format!("ssh {job} 0 'uname -a'{}", gateway_options(env)))
            .await?;
        ctx.expect(&result, &Expectation::succeed_with("Linux")?);
        Ok(())
    })
}
