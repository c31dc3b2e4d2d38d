//! Tracing setup for the coordination runtime

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Resolved logging options
///
/// Usually derived from the `[logging]` section of the runtime config;
/// constructed directly in tests and small tools.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            json: config.json,
        }
    }
}

/// Install the global tracing subscriber
///
/// Call once at process startup. A `RUST_LOG` environment variable
/// overrides the configured level; the subscriber panics if one is
/// already installed, so libraries must never call this.
pub fn init_logging(config: LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry.with(fmt::layer().json().flatten_event(true)).init();
    } else {
        registry.with(fmt::layer().pretty().with_target(false)).init();
    }

    tracing::debug!("Logging ready: level={}, json={}", config.level, config.json);
}
