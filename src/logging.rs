//! Tracing subscriber setup.
//!
//! The level comes from `application.log_level` unless `RUST_LOG` is set, in
//! which case the environment wins. Output is human-readable or JSON lines
//! depending on `application.log_format`.

use tracing_subscriber::EnvFilter;

use crate::config::{ApplicationConfig, LogFormat};
use crate::error::{AppResult, HandlerError};

/// Build the filter for a configured level, letting `RUST_LOG` override it.
pub fn env_filter(level: &str) -> AppResult<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return Ok(EnvFilter::from_default_env());
    }
    EnvFilter::try_new(format!("liquid_handling={level},run_log={level},warn"))
        .map_err(|e| HandlerError::Configuration(format!("Invalid log filter: {e}")))
}

/// Install the global subscriber.
///
/// # Errors
///
/// `Configuration` for an unusable filter or if a subscriber is already installed.
pub fn init(app: &ApplicationConfig) -> AppResult<()> {
    let filter = env_filter(&app.log_level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match app.log_format {
        LogFormat::Pretty => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    result.map_err(|e| HandlerError::Configuration(format!("Failed to install logger: {e}")))
}
