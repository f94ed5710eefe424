//! Run configuration.
//!
//! - Environment variable parsing with type safety and error collection
//! - Optional TOML file (`OAT_CONFIG`) underneath the environment
//! - The read-only [`TestEnvironment`] handed to every harness component

pub mod env;
pub mod environment;

pub use env::{EnvError, EnvParser};
pub use environment::{
    ArtifactSettings, EnvironmentFile, NetworkSettings, SshSettings, TestEnvironment, Timeouts,
};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
