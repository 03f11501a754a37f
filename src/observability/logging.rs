//! Structured logging settings.

use crate::config::env_parse;
use std::path::PathBuf;

/// Default `EnvFilter` directive.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name. Unknown names fall back to `Pretty`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive string, e.g. `info,itemtrace=debug`.
    pub filter: String,
    /// Optional log file; logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Applies environment overrides.
    ///
    /// Reads `ITEMTRACE_LOG_FORMAT`, `ITEMTRACE_LOG` (falling back to
    /// `RUST_LOG`) and `ITEMTRACE_LOG_FILE`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(format) = env_parse::<String>("ITEMTRACE_LOG_FORMAT") {
            self.format = LogFormat::parse(&format);
        }
        if let Some(filter) = env_parse::<String>("ITEMTRACE_LOG")
            .or_else(|| env_parse::<String>("RUST_LOG"))
            .filter(|f| !f.is_empty())
        {
            self.filter = filter;
        }
        if let Some(file) = env_parse::<String>("ITEMTRACE_LOG_FILE").filter(|f| !f.is_empty()) {
            self.file = Some(PathBuf::from(file));
        }
        self
    }

    /// Raises the filter to `debug` for this crate when verbose output is requested.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.filter = format!("{},itemtrace=debug", self.filter);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Pretty);
    }

    #[test]
    fn test_verbose_appends_directive() {
        let config = LoggingConfig::default().with_verbose(true);
        assert_eq!(config.filter, "info,itemtrace=debug");

        let quiet = LoggingConfig::default().with_verbose(false);
        assert_eq!(quiet.filter, "info");
    }
}
