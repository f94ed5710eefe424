#![allow(dead_code)]

#[cfg(unix)]
pub mod fake_cli;
pub mod recording;

#[cfg(unix)]
pub use fake_cli::FakeCli;
pub use recording::Recording;

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}
