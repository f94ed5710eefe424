//! The run-wide [`TestEnvironment`].
//!
//! Built once at run start from an optional TOML file and `OAT_*` variables
//! (variables win), then shared read-only behind an `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::env::{EnvParser, expand_tilde};
use crate::errors::{HarnessError, HarnessResult};
use crate::poller::PollOptions;
use crate::ssh::{RemoteAuth, RemoteShell};

const DEFAULT_CLI: &str = "bosh";
const DEFAULT_SSH_USER: &str = "vcap";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(1800);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// On-disk form of the environment, named by `OAT_CONFIG`.
///
/// Keys mirror the `OAT_*` variables in lower case.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentFile {
    pub director: Option<String>,
    pub cli: Option<String>,
    pub cli_flags: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub stemcell_path: Option<PathBuf>,
    pub stemcell_name: Option<String>,
    pub stemcell_version: Option<String>,
    pub release_path: Option<PathBuf>,
    pub release_name: Option<String>,
    pub release_version: Option<String>,
    pub deployment_spec: Option<PathBuf>,
    pub static_ip: Option<String>,
    pub vip: Option<String>,
    pub vcap_password: Option<String>,
    pub ssh_user: Option<String>,
    pub private_key: Option<PathBuf>,
    pub ssh_enabled: Option<bool>,
    pub ssh_connect_timeout_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    pub deploy_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub scratch_root: Option<PathBuf>,
    pub run_restore: Option<bool>,
}

impl EnvironmentFile {
    /// Read and parse a TOML environment file.
    pub fn read(path: &Path) -> HarnessResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))
    }
}

/// Location and identity of an uploadable artifact (stemcell or release tarball).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSettings {
    pub path: Option<PathBuf>,
    /// When unset, read from the archive's manifest.
    pub name: Option<String>,
    pub version: Option<String>,
}

/// IP allocation for the deployed VM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSettings {
    pub static_ip: Option<String>,
    /// Public (virtual) IP reachable from the test host.
    pub vip: Option<String>,
}

/// Access to deployed VMs over the remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub enabled: bool,
    pub user: String,
    /// Password of the VM user, also used for `sudo -S`.
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            user: DEFAULT_SSH_USER.to_string(),
            password: None,
            private_key: None,
            connect_timeout: DEFAULT_SSH_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Default bound for a single command.
    pub command: Duration,
    /// Bound for `deploy` and the convergence wait that follows it.
    pub deploy: Duration,
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND_TIMEOUT,
            deploy: DEFAULT_DEPLOY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Connection parameters and toggles for one acceptance run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEnvironment {
    /// Director address the CLI targets.
    pub director: String,
    /// Orchestrator CLI executable.
    pub cli: String,
    /// Extra global flags inserted before every subcommand (raw shell text).
    pub cli_flags: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub stemcell: ArtifactSettings,
    pub release: ArtifactSettings,
    /// YAML file holding the deployment name and properties.
    pub deployment_spec: Option<PathBuf>,
    pub network: NetworkSettings,
    pub ssh: SshSettings,
    pub timeouts: Timeouts,
    /// Parent of every scratch directory created during the run.
    pub scratch_root: PathBuf,
    /// Include the director backup/restore group, which deletes the deployment.
    pub run_restore: bool,
}

impl TestEnvironment {
    /// Environment with defaults for everything but the director address.
    pub fn new(director: impl Into<String>) -> Self {
        Self {
            director: director.into(),
            cli: DEFAULT_CLI.to_string(),
            cli_flags: String::new(),
            user: None,
            password: None,
            stemcell: ArtifactSettings::default(),
            release: ArtifactSettings::default(),
            deployment_spec: None,
            network: NetworkSettings::default(),
            ssh: SshSettings::default(),
            timeouts: Timeouts::default(),
            scratch_root: std::env::temp_dir().join("oat"),
            run_restore: false,
        }
    }

    /// Load from `OAT_CONFIG` (if set) and `OAT_*` variables.
    pub fn load() -> HarnessResult<Self> {
        let mut parser = EnvParser::new();
        let file = match parser.get_path("CONFIG", None, true) {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Reading environment file");
                EnvironmentFile::read(&path)?
            }
            _ => EnvironmentFile::default(),
        };
        Self::from_parts(&mut parser, file)
    }

    /// Overlay `OAT_*` variables onto `file` and validate the result.
    pub fn from_parts(parser: &mut EnvParser, file: EnvironmentFile) -> HarnessResult<Self> {
        let defaults = Timeouts::default();

        let director = parser.get_optional_string("DIRECTOR", file.director);
        if director.is_none() {
            parser.missing("DIRECTOR");
        }

        let stemcell = ArtifactSettings {
            path: parser.get_path("STEMCELL_PATH", file.stemcell_path, false),
            name: parser.get_optional_string("STEMCELL_NAME", file.stemcell_name),
            version: parser.get_optional_string("STEMCELL_VERSION", file.stemcell_version),
        };
        let release = ArtifactSettings {
            path: parser.get_path("RELEASE_PATH", file.release_path, false),
            name: parser.get_optional_string("RELEASE_NAME", file.release_name),
            version: parser.get_optional_string("RELEASE_VERSION", file.release_version),
        };

        let ssh = SshSettings {
            enabled: parser.get_bool("SSH_ENABLED", file.ssh_enabled.unwrap_or(true)),
            user: parser.get_string(
                "SSH_USER",
                file.ssh_user.as_deref().unwrap_or(DEFAULT_SSH_USER),
            ),
            password: parser.get_optional_string("VCAP_PASSWORD", file.vcap_password),
            private_key: parser.get_path("PRIVATE_KEY", file.private_key, true),
            connect_timeout: parser.get_secs(
                "SSH_CONNECT_TIMEOUT_SECS",
                file.ssh_connect_timeout_secs
                    .map_or(DEFAULT_SSH_CONNECT_TIMEOUT, Duration::from_secs),
                1,
                300,
            ),
        };

        let timeouts = Timeouts {
            command: parser.get_secs(
                "COMMAND_TIMEOUT_SECS",
                file.command_timeout_secs
                    .map_or(defaults.command, Duration::from_secs),
                1,
                86_400,
            ),
            deploy: parser.get_secs(
                "DEPLOY_TIMEOUT_SECS",
                file.deploy_timeout_secs
                    .map_or(defaults.deploy, Duration::from_secs),
                1,
                86_400,
            ),
            poll_interval: parser.get_secs(
                "POLL_INTERVAL_SECS",
                file.poll_interval_secs
                    .map_or(defaults.poll_interval, Duration::from_secs),
                1,
                600,
            ),
        };

        let env = Self {
            director: director.unwrap_or_default(),
            cli: parser.get_string("CLI", file.cli.as_deref().unwrap_or(DEFAULT_CLI)),
            cli_flags: parser.get_string("CLI_FLAGS", file.cli_flags.as_deref().unwrap_or("")),
            user: parser.get_optional_string("USER", file.user),
            password: parser.get_optional_string("PASSWORD", file.password),
            stemcell,
            release,
            deployment_spec: parser.get_path("DEPLOYMENT_SPEC", file.deployment_spec, true),
            network: NetworkSettings {
                static_ip: parser.get_optional_string("STATIC_IP", file.static_ip),
                vip: parser.get_optional_string("VIP", file.vip),
            },
            ssh,
            timeouts,
            scratch_root: parser
                .get_path("SCRATCH_ROOT", file.scratch_root, false)
                .map(expand_tilde)
                .unwrap_or_else(|| std::env::temp_dir().join("oat")),
            run_restore: parser.get_bool("RUN_RESTORE", file.run_restore.unwrap_or(false)),
        };

        if parser.has_errors() {
            let details: Vec<String> = parser
                .take_errors()
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(HarnessError::Config(details.join("; ")));
        }

        Ok(env)
    }

    /// Remote shell into a deployed VM reachable at `host`.
    ///
    /// Key authentication wins over the VM password when both are configured.
    pub fn vm_shell(&self, host: &str) -> HarnessResult<RemoteShell> {
        let auth = match (&self.ssh.private_key, &self.ssh.password) {
            (Some(key), _) => RemoteAuth::PrivateKey(key.clone()),
            (None, Some(password)) => RemoteAuth::Password(password.clone()),
            (None, None) => {
                return Err(HarnessError::Config(
                    "remote shell needs OAT_PRIVATE_KEY or OAT_VCAP_PASSWORD".to_string(),
                ));
            }
        };
        Ok(RemoteShell::new(host, &self.ssh.user, auth)
            .with_connect_timeout(self.ssh.connect_timeout))
    }

    /// Poll options bounded by `timeout` at the configured interval.
    pub fn poll_options(&self, timeout: Duration) -> PollOptions {
        PollOptions::new(self.timeouts.poll_interval, timeout)
    }

    /// Human-readable settings with secrets masked.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        fn show<T: std::fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        fn secret(value: &Option<String>) -> String {
            if value.is_some() { "********" } else { "-" }.to_string()
        }

        vec![
            ("director", self.director.clone()),
            ("cli", format!("{} {}", self.cli, self.cli_flags).trim().to_string()),
            ("user", show(self.user.as_deref())),
            ("password", secret(&self.password)),
            (
                "stemcell",
                show(self.stemcell.path.as_ref().map(|p| p.display())),
            ),
            ("release", show(self.release.path.as_ref().map(|p| p.display()))),
            (
                "deployment_spec",
                show(self.deployment_spec.as_ref().map(|p| p.display())),
            ),
            ("static_ip", show(self.network.static_ip.as_deref())),
            ("vip", show(self.network.vip.as_deref())),
            ("ssh_enabled", self.ssh.enabled.to_string()),
            ("ssh_user", self.ssh.user.clone()),
            ("vcap_password", secret(&self.ssh.password)),
            (
                "private_key",
                show(self.ssh.private_key.as_ref().map(|p| p.display())),
            ),
            ("command_timeout", format!("{:?}", self.timeouts.command)),
            ("deploy_timeout", format!("{:?}", self.timeouts.deploy)),
            ("poll_interval", format!("{:?}", self.timeouts.poll_interval)),
            ("scratch_root", self.scratch_root.display().to_string()),
            ("run_restore", self.run_restore.to_string()),
        ]
    }
}
