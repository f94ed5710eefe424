use std::path::{Path, PathBuf};
use std::sync::Arc;

use oat_common::TestEnvironment;
use tempfile::TempDir;

/// A stand-in orchestrator CLI: a shell script that logs its arguments and
/// prints what the real tool prints for the subcommands the suite uses.
///
/// Creating `fail-<subcommand>` in [`FakeCli::dir`] makes that subcommand exit 1.
pub struct FakeCli {
    dir: TempDir,
    script: PathBuf,
    log: PathBuf,
}

const SCRIPT: &str = r#"#!/bin/sh
here="$(dirname "$0")"
echo "$*" >> "$here/calls.log"
if [ -f "$here/fail-$1" ]; then
    echo "Error 100: $1 failed"
    exit 1
fi
case "$1" in
    target) echo "Target set to '$2'" ;;
    login) echo "Logged in as '$2'" ;;
    upload) echo "$2 uploaded" ;;
    deployment) echo "Deployment set to '$2'" ;;
    deploy) rm -f "$here/gone-batlight"; echo "Deployed 'batlight' to 'micro'" ;;
    vms) printf '| VM          | State   | IPs      |\n| batlight/0  | running | 10.0.0.5 |\n' ;;
    recreate) echo "$2/$3 recreated" ;;
    stop) echo "$2/$3 stopped" ;;
    start) echo "$2/$3 started" ;;
    delete)
        if [ "$2" = deployment ]; then touch "$here/gone-$3"; fi
        echo "Deleted $2 '$3'" ;;
    deployments)
        if [ -f "$here/gone-batlight" ]; then echo "No deployments"; exit 1; fi
        echo "| batlight | batlight/3 | ubuntu/1 |" ;;
    *) echo "Unknown command: $1" >&2; exit 1 ;;
esac
"#;

impl FakeCli {
    pub fn new() -> Self {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let script = dir.path().join("bosh");
        std::fs::write(&script, SCRIPT).expect("Failed to write fake CLI");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake CLI executable");
        let log = dir.path().join("calls.log");
        Self { dir, script, log }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn fail(&self, subcommand: &str) {
        std::fs::write(self.dir().join(format!("fail-{subcommand}")), "")
            .expect("Failed to write failure marker");
    }

    /// Argument lines of every invocation so far.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Environment pointing at this CLI, with fast polling and scratch space
    /// inside the fake's directory.
    pub fn environment(&self) -> Arc<TestEnvironment> {
        let mut env = TestEnvironment::new("10.0.0.6");
        env.cli = self.script.to_string_lossy().into_owned();
        env.stemcell.path = Some(self.dir().join("stemcell.tgz"));
        env.stemcell.name = Some("ubuntu".to_string());
        env.stemcell.version = Some("1".to_string());
        env.release.path = Some(self.dir().join("release.tgz"));
        env.release.name = Some("batlight".to_string());
        env.release.version = Some("3".to_string());
        env.network.static_ip = Some("10.0.0.5".to_string());
        env.network.vip = Some("54.208.15.101".to_string());
        env.timeouts.command = std::time::Duration::from_secs(10);
        env.timeouts.deploy = std::time::Duration::from_secs(5);
        env.timeouts.poll_interval = std::time::Duration::from_millis(50);
        env.scratch_root = self.dir().join("scratch");
        Arc::new(env)
    }
}
