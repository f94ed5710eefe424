//! Typed access to `OAT_*` variables.
//!
//! Every getter takes a fallback and never fails on its own: a bad value is
//! recorded and the fallback is used, so one pass over the configuration can
//! report every problem at once.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const PREFIX: &str = "OAT_";

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("{var} must be {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("{var} points at {path}, which does not exist")]
    PathNotFound { var: String, path: PathBuf },

    #[error("{var}={value} is outside {min}..={max}")]
    OutOfRange {
        var: String,
        value: u64,
        min: u64,
        max: u64,
    },

    /// Required setting absent from both the environment and the config file.
    #[error("Missing required setting {var}")]
    Missing { var: String },
}

/// Reads `OAT_`-prefixed variables and accumulates validation errors.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// `DIRECTOR` -> `OAT_DIRECTOR`.
    pub fn var_name(name: &str) -> String {
        format!("{PREFIX}{name}")
    }

    pub fn missing(&mut self, name: &str) {
        self.errors.push(EnvError::Missing {
            var: Self::var_name(name),
        });
    }

    /// Non-empty value of the variable, or `default`.
    pub fn get_string(&mut self, name: &str, default: &str) -> String {
        lookup(name)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// Value of the variable, else `fallback`. Setting it to "" clears the fallback.
    pub fn get_optional_string(&mut self, name: &str, fallback: Option<String>) -> Option<String> {
        match lookup(name) {
            Some((_, value)) if value.is_empty() => None,
            Some((_, value)) => Some(value),
            None => fallback,
        }
    }

    /// `1/true/yes/on` or `0/false/no/off` (any case); empty reads as false.
    pub fn get_bool(&mut self, name: &str, default: bool) -> bool {
        let Some((var, value)) = lookup(name) else {
            return default;
        };
        parse_bool(&value).unwrap_or_else(|| {
            self.invalid(var, "a boolean (true/false/1/0/yes/no)", value);
            default
        })
    }

    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> u64 {
        let Some((var, value)) = lookup(name) else {
            return default;
        };
        match value.trim().parse::<u64>() {
            Ok(n) if (min..=max).contains(&n) => n,
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n,
                    min,
                    max,
                });
                default
            }
            Err(_) => {
                self.invalid(var, "a whole number", value);
                default
            }
        }
    }

    /// Duration given in whole seconds, bounded by `min..=max` seconds.
    pub fn get_secs(&mut self, name: &str, default: Duration, min: u64, max: u64) -> Duration {
        Duration::from_secs(self.get_u64_range(name, default.as_secs(), min, max))
    }

    /// Path with `~` expanded. An empty variable clears `fallback`.
    ///
    /// With `must_exist`, a path that is not on disk is recorded as an error
    /// but still returned.
    pub fn get_path(
        &mut self,
        name: &str,
        fallback: Option<PathBuf>,
        must_exist: bool,
    ) -> Option<PathBuf> {
        let path = match lookup(name) {
            Some((_, value)) if value.is_empty() => return None,
            Some((_, value)) => expand_tilde(PathBuf::from(value)),
            None => expand_tilde(fallback?),
        };
        if must_exist && !path.exists() {
            self.errors.push(EnvError::PathNotFound {
                var: Self::var_name(name),
                path: path.clone(),
            });
        }
        Some(path)
    }

    /// One of the tracing level names, lowercased.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> String {
        let Some((var, value)) = lookup(name) else {
            return default.to_string();
        };
        let level = value.to_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            level
        } else {
            self.invalid(var, "one of trace/debug/info/warn/error/off", value);
            default.to_string()
        }
    }

    fn invalid(&mut self, var: String, expected: &'static str, value: String) {
        self.errors.push(EnvError::InvalidValue {
            var,
            expected,
            value,
        });
    }
}

fn lookup(name: &str) -> Option<(String, String)> {
    let var = EnvParser::var_name(name);
    env::var(&var).ok().map(|value| (var, value))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(text) if text.starts_with('~') => PathBuf::from(shellexpand::tilde(text).into_owned()),
        _ => path,
    }
}
