//! Remote shell access to deployed VMs.
//!
//! Commands go through the system `ssh` client. Password authentication is
//! delegated to `sshpass`, which reads the secret from `SSHPASS` so it never
//! appears in argv.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::runner::{CommandRunner, RunOptions};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit code `ssh` reserves for its own connection errors.
pub const SSH_TRANSPORT_EXIT: i32 = 255;

/// How to authenticate against the VM.
#[derive(Clone, PartialEq, Eq)]
pub enum RemoteAuth {
    Password(String),
    PrivateKey(PathBuf),
}

impl fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(********)"),
            Self::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

/// A user on a host reachable over ssh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteShell {
    host: String,
    user: String,
    auth: RemoteAuth,
    connect_timeout: Duration,
}

impl RemoteShell {
    pub fn new(host: impl Into<String>, user: impl Into<String>, auth: RemoteAuth) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            auth,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn auth(&self) -> &RemoteAuth {
        &self.auth
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Program to execute locally.
    pub fn program(&self) -> &'static str {
        match self.auth {
            RemoteAuth::Password(_) => "sshpass",
            RemoteAuth::PrivateKey(_) => "ssh",
        }
    }

    /// Arguments for [`program`](Self::program) that run `remote_command` on the host.
    pub fn args(&self, remote_command: &str) -> Vec<String> {
        let mut args = Vec::new();
        if matches!(self.auth, RemoteAuth::Password(_)) {
            args.push("-e".to_string());
            args.push("ssh".to_string());
        }
        args.extend(self.ssh_options());
        args.push(self.destination());
        args.push(remote_command.to_string());
        args
    }

    /// Environment the local process needs.
    pub fn envs(&self) -> Vec<(&'static str, String)> {
        match &self.auth {
            RemoteAuth::Password(password) => vec![("SSHPASS", password.clone())],
            RemoteAuth::PrivateKey(_) => Vec::new(),
        }
    }

    fn ssh_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let RemoteAuth::PrivateKey(identity) = &self.auth {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().into_owned());
        }
        args
    }

    /// Display form used in logs and failure messages.
    pub fn describe(&self, remote_command: &str) -> String {
        format!("ssh {} {}", self.destination(), remote_command)
    }

    /// Wrap `command` so it runs as root.
    ///
    /// With password auth the password is piped to `sudo -S`; callers should
    /// redact it from logged output via [`RunOptions::redact`].
    pub fn sudo(&self, command: &str) -> String {
        let quoted = shell_escape::escape(command.into());
        match &self.auth {
            RemoteAuth::Password(password) => format!(
                "echo {} | sudo -S -p '' sh -c {quoted}",
                shell_escape::escape(password.as_str().into())
            ),
            RemoteAuth::PrivateKey(_) => format!("sudo -n sh -c {quoted}"),
        }
    }

    /// Secret that must never reach logs, if any.
    pub fn secret(&self) -> Option<&str> {
        match &self.auth {
            RemoteAuth::Password(password) => Some(password),
            RemoteAuth::PrivateKey(_) => None,
        }
    }
}

/// Forget `host` in the user's `known_hosts` after a VM is recreated under the same IP.
///
/// Best effort: failures are logged and ignored.
pub async fn scrub_known_host(runner: &CommandRunner, host: &str) {
    let Some(known_hosts) = dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
    else {
        return;
    };
    if !known_hosts.exists() {
        return;
    }

    let line = format!(
        "ssh-keygen -f {} -R {}",
        shell_escape::escape(known_hosts.to_string_lossy()),
        shell_escape::escape(host.into())
    );
    match runner.run(&line, &RunOptions::local()).await {
        Ok(result) if result.success() => debug!(host, "Removed host key"),
        Ok(result) => debug!(host, exit = ?result.exit_code(), "ssh-keygen -R did not succeed"),
        Err(e) => debug!(host, error = %e, "ssh-keygen unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_auth_args() {
        let shell = RemoteShell::new(
            "54.208.15.101",
            "vcap",
            RemoteAuth::PrivateKey(PathBuf::from("/keys/bosh.pem")),
        )
        .with_connect_timeout(Duration::from_secs(7));

        assert_eq!(shell.program(), "ssh");
        let args = shell.args("uname -a");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=7".to_string()));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/bosh.pem"]));
        assert_eq!(&args[args.len() - 2..], ["vcap@54.208.15.101", "uname -a"]);
        assert!(shell.envs().is_empty());
    }

    #[test]
    fn test_password_auth_keeps_secret_out_of_argv() {
        let shell = RemoteShell::new(
            "10.0.0.5",
            "vcap",
            RemoteAuth::Password("c1oudc0w".to_string()),
        );

        assert_eq!(shell.program(), "sshpass");
        let args = shell.args("true");
        assert_eq!(&args[..2], ["-e", "ssh"]);
        assert!(!args.iter().any(|a| a.contains("c1oudc0w")));
        assert!(!args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(shell.envs(), vec![("SSHPASS", "c1oudc0w".to_string())]);
        assert!(!format!("{shell:?}").contains("c1oudc0w"));
        assert!(!shell.describe("true").contains("c1oudc0w"));
    }

    #[test]
    fn test_sudo_wraps_command() {
        let key = RemoteShell::new(
            "10.0.0.5",
            "vcap",
            RemoteAuth::PrivateKey(PathBuf::from("/k")),
        );
        assert_eq!(key.sudo("sv stop agent"), "sudo -n sh -c 'sv stop agent'");

        let password = RemoteShell::new("10.0.0.5", "vcap", RemoteAuth::Password("pw".into()));
        let wrapped = password.sudo("sv stop agent");
        assert!(wrapped.starts_with("echo pw | sudo -S"));
        assert!(wrapped.ends_with("sh -c 'sv stop agent'"));
        assert_eq!(password.secret(), Some("pw"));
    }
}
