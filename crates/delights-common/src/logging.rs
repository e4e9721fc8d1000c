//! Subscriber setup for the `delights` binary and tests.

use std::str::FromStr;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::DelightsError;

/// Filter used when neither a custom filter nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "info,tower_http=debug";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-field human-readable lines.
    #[default]
    Pretty,
    /// One short line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl FromStr for LogFormat {
    type Err = DelightsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(DelightsError::InvalidArgument(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Directive string such as `delights_sw=debug,hyper=warn`. Falls back to
    /// `RUST_LOG`, then [`DEFAULT_FILTER`].
    pub filter: Option<String>,
    /// Print file and line of each event.
    pub include_location: bool,
    /// Log span open and close, e.g. around each HTTP request.
    pub include_span_events: bool,
}

impl LogConfig {
    /// Verbose output for local debugging of the worker lifecycle.
    pub fn debug() -> Self {
        Self {
            filter: Some("debug,hyper=info,reqwest=info".to_string()),
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// JSON lines at `info` for a deployed storefront.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            filter: Some("info".to_string()),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|custom| EnvFilter::try_new(custom).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber.
///
/// Records emitted through the `log` facade (reqwest, hyper) are forwarded
/// into the same subscriber. Fails if a global subscriber is already set.
pub fn init_logging(config: LogConfig) -> Result<(), DelightsError> {
    let filter = config.env_filter();
    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_span_events(span_events))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
    };

    result.map_err(|e| DelightsError::config(format!("logging already initialized: {e}")))
}
