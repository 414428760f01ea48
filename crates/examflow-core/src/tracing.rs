//! Log output for examflow processes.
//!
//! ```ignore
//! use examflow_core::tracing::{init_tracing, LogFormat, TracingConfig};
//!
//! init_tracing(TracingConfig::cli().with_format(LogFormat::Json))?;
//! ```
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt as layer_fmt, prelude::*};

/// Targets the default filter turns on.
const CRATE_TARGETS: &[&str] = &["examflow_core", "examflow_protocol", "examflow_client"];

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to parse log filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// How each log line is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One short line per event.
    #[default]
    Compact,
    /// Multi-line, for reading frame traces by eye.
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format `{}` (expected compact, pretty or json)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for the examflow crates when neither `filter` nor RUST_LOG is set.
    pub level: Level,
    pub format: LogFormat,
    /// Adds file, line and target to every line.
    pub verbose_fields: bool,
    /// Full filter directive; wins over RUST_LOG and `level`.
    pub filter: Option<String>,
}

impl TracingConfig {
    /// Warnings only, no timestamps.
    #[must_use]
    pub fn cli() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            verbose_fields: false,
            filter: None,
        }
    }

    /// Frame-level detail for `--debug`.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            level: Level::DEBUG,
            verbose_fields: true,
            ..Self::cli()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Directive used when neither RUST_LOG nor `filter` is set.
    pub fn default_directive(&self) -> String {
        CRATE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter, TracingError> {
        match self.filter {
            Some(ref directive) => Ok(EnvFilter::try_new(directive)?),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.default_directive()))),
        }
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = layer_fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(self.verbose_fields)
            .with_line_number(self.verbose_fields)
            .with_target(self.verbose_fields);

        match self.format {
            LogFormat::Compact => base.compact().without_time().boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Json => base.json().boxed(),
        }
    }
}

/// Installs the global subscriber. Call once at process start.
///
/// # Errors
///
/// Fails if a subscriber is already installed or `filter` does not parse.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.env_filter()?;
    let subscriber = tracing_subscriber::registry()
        .with(config.layer())
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_quiet_and_debug_is_detailed() {
        let quiet = TracingConfig::cli();
        assert_eq!(quiet.level, Level::WARN);
        assert!(!quiet.verbose_fields);

        let debug = TracingConfig::cli_debug();
        assert_eq!(debug.level, Level::DEBUG);
        assert_eq!(debug.format, LogFormat::Compact);
        assert!(debug.verbose_fields);
    }

    #[test]
    fn default_directive_covers_every_crate() {
        let directive = TracingConfig::cli_debug().default_directive();
        insta::assert_snapshot!(
            directive,
            @"examflow_core=DEBUG,examflow_protocol=DEBUG,examflow_client=DEBUG"
        );
    }

    #[test]
    fn explicit_filter_must_parse() {
        let config = TracingConfig::cli().with_filter("examflow_client=[");
        assert!(matches!(config.env_filter(), Err(TracingError::EnvFilter(_))));

        let config = TracingConfig::cli().with_filter("examflow_client=trace");
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn log_format_names() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!(LogFormat::Compact.to_string(), "compact");
        assert!("xml".parse::<LogFormat>().unwrap_err().contains("compact, pretty or json"));
    }
}
