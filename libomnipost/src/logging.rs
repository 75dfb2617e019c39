//! Log output for the Omnipost binaries
//!
//! Logs always go to stderr so stdout carries nothing but command results.
//! Format and level come from `OMNIPOST_LOG_FORMAT` and `OMNIPOST_LOG_LEVEL`;
//! `RUST_LOG`, when set, overrides the level with a full filter directive.
//!
//! # Examples
//!
//! ```no_run
//! use libomnipost::logging::{LogFormat, LogSettings};
//!
//! // Explicit settings
//! LogSettings::new(LogFormat::Json, "info").install();
//!
//! // Or whatever the environment asks for
//! libomnipost::logging::init_default(false);
//! ```

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const FORMAT_ENV: &str = "OMNIPOST_LOG_FORMAT";
pub const LEVEL_ENV: &str = "OMNIPOST_LOG_LEVEL";

/// Level used when nothing else is configured; keeps CLI output uncluttered
const QUIET_LEVEL: &str = "warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain single-line records
    #[default]
    Text,
    /// One JSON object per record, span fields included
    Json,
    /// Multi-line records with source locations
    Pretty,
}

impl LogFormat {
    const ALL: [LogFormat; 3] = [LogFormat::Text, LogFormat::Json, LogFormat::Pretty];

    pub fn name(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "Unknown log format '{}' (expected text, json or pretty)",
                    wanted
                )
            })
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `info` or `libomnipost=debug`
    pub level: String,
}

impl LogSettings {
    pub fn new(format: LogFormat, level: impl Into<String>) -> Self {
        Self {
            format,
            level: level.into(),
        }
    }

    /// Settings requested by the environment; `verbose` forces `debug`
    ///
    /// Unparseable values fall back to the defaults rather than failing startup.
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var(FORMAT_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();

        let level = if verbose {
            "debug".to_string()
        } else {
            std::env::var(LEVEL_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| QUIET_LEVEL.to_string())
        };

        Self { format, level }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new(QUIET_LEVEL))
    }

    /// Install the global subscriber
    ///
    /// Only the first call in a process takes effect.
    pub fn install(&self) {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Text => builder.with_target(false).try_init(),
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .try_init(),
            LogFormat::Pretty => builder
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .try_init(),
        };

        if installed.is_err() {
            tracing::debug!("Log subscriber already installed");
        }
    }
}

/// Install logging as configured by the environment
pub fn init_default(verbose: bool) {
    LogSettings::from_env(verbose).install();
}
