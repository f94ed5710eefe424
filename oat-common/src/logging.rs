//! Structured logging setup.
//!
//! Binaries call [`init_logging`] once and keep the returned guards alive
//! until exit so the background file writer flushes. Tests call
//! [`init_test_logging`], which is idempotent and writes through the test
//! harness's captured output.

use std::path::PathBuf;
use std::sync::Once;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::EnvParser;
use crate::errors::{HarnessError, HarnessResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// JSON lines on stderr instead of the compact human format.
    pub json: bool,
    /// Directory for a daily-rolling JSONL log file.
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    /// Read `OAT_LOG_LEVEL`, `OAT_LOG_JSON` and `OAT_LOG_DIR`.
    ///
    /// Invalid values fall back to defaults; logging must come up even when
    /// the rest of the environment is broken.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        Self {
            level: parser.get_log_level("LOG_LEVEL", default_level),
            json: parser.get_bool("LOG_JSON", false),
            log_dir: parser.get_path("LOG_DIR", None, false),
        }
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

/// Keeps background log writers running; drop at exit.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> HarnessResult<LoggingGuards> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| HarnessError::Config(format!("invalid log filter: {e}")))?;

    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "oat.jsonl");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let compact_layer = (!config.json).then(|| {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
        .map_err(|e| HarnessError::Config(format!("logging already initialized: {e}")))?;

    Ok(LoggingGuards { _file: file_guard })
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Route events to the test harness's captured output. Safe to call repeatedly.
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let layer = fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}
