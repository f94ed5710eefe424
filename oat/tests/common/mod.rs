#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        eprintln!("[test] {}", format!($($arg)*));
    };
}

/// Orchestrator CLI stand-in covering every subcommand the suite runs.
///
/// `logs` writes a real tarball into the working directory with `tar`.
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
    deploy) echo "Deployed 'batlight' to 'micro'" ;;
    vms) printf '| VM          | State   | IPs      |\n| batlight/0  | running | 10.0.0.5 |\n' ;;
    recreate) echo "$2/$3 recreated" ;;
    stop) echo "$2/$3 stopped" ;;
    start) echo "$2/$3 started" ;;
    ssh) echo "Linux batlight-0 3.0.0-32-virtual x86_64 GNU/Linux" ;;
    logs)
        staging="$(mktemp -d)"
        if [ "$4" = "--agent" ]; then
            echo "agent started" > "$staging/current"
        else
            mkdir "$staging/$2"
            : > "$staging/$2/$2.stdout.log"
            : > "$staging/$2/$2.stderr.log"
        fi
        tar -C "$staging" -czf "$PWD/$2.$3.tgz" .
        rm -rf "$staging"
        echo "Logs saved in '$PWD/$2.$3.tgz'" ;;
    delete) echo "Deleted $2 '$3'" ;;
    deployments) echo "| batlight | batlight/3 | ubuntu/1 |" ;;
    *) echo "Unknown command: $1" >&2; exit 1 ;;
esac
"#;

pub struct FakeCli {
    dir: TempDir,
    script: PathBuf,
}

impl FakeCli {
    pub fn new() -> Self {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let script = dir.path().join("bosh");
        std::fs::write(&script, SCRIPT).expect("Failed to write fake CLI");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake CLI executable");
        Self { dir, script }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn fail(&self, subcommand: &str) {
        std::fs::write(self.dir().join(format!("fail-{subcommand}")), "")
            .expect("Failed to write failure marker");
    }

    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// `oat` with an environment pointing at this CLI and nothing inherited
    /// from the caller's `OAT_*` variables.
    pub fn oat(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_oat"));
        for (key, _) in std::env::vars() {
            if key.starts_with("OAT_") {
                command.env_remove(key);
            }
        }
        command
            .env_remove("RUST_LOG")
            // Keeps ssh-keygen -R away from the real known_hosts.
            .env("HOME", self.dir())
            .env("OAT_DIRECTOR", "10.0.0.6")
            .env("OAT_CLI", &self.script)
            .env("OAT_USER", "admin")
            .env("OAT_PASSWORD", "s3cret-admin")
            .env("OAT_STEMCELL_PATH", self.dir().join("stemcell.tgz"))
            .env("OAT_STEMCELL_NAME", "ubuntu")
            .env("OAT_STEMCELL_VERSION", "1")
            .env("OAT_RELEASE_PATH", self.dir().join("release.tgz"))
            .env("OAT_RELEASE_NAME", "batlight")
            .env("OAT_RELEASE_VERSION", "3")
            .env("OAT_STATIC_IP", "10.0.0.5")
            .env("OAT_VIP", "54.208.15.101")
            .env("OAT_SSH_ENABLED", "false")
            .env("OAT_DEPLOY_TIMEOUT_SECS", "5")
            .env("OAT_POLL_INTERVAL_SECS", "1")
            .env("OAT_SCRATCH_ROOT", self.dir().join("scratch"))
            .env("OAT_LOG_LEVEL", "warn");
        command
    }
}

pub fn run(mut command: Command) -> Output {
    command.output().expect("Failed to run oat")
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
