//! Logging initialization for the annopack tool and embedding hosts
//!
//! - Respects RUST_LOG environment variable
//! - Falls back to a filter from the config file
//! - Defaults to "info"
//!
//! # Usage
//! ```rust
//! use annopack::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Default filter when neither RUST_LOG nor a config filter is present
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Build the filter honoring RUST_LOG first, then `filter`, then the default
fn build_env_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER))
}

/// Initialize human-readable logging to stderr
///
/// # Arguments
/// * `filter` - Optional log filter (e.g. "debug", "annopack::resolver=trace").
///   RUST_LOG takes precedence when set.
///
/// Calling this more than once is harmless; only the first subscriber wins.
pub fn init_logging(filter: Option<&str>) {
    let result = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(build_env_filter(filter))
        .try_init();
    if let Err(e) = result {
        tracing::debug!("Logging already initialized: {}", e);
    }
}

/// Initialize logging with JSON output for log aggregation systems
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let result = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(build_env_filter(filter))
        .try_init();
    if let Err(e) = result {
        tracing::debug!("Logging already initialized: {}", e);
    }
}

/// Initialize logging from the `logging` section of [`crate::config::PackConfig`]
///
/// `json_format` needs the `json-logging` feature; without it the
/// human-readable format is used.
pub fn init_logging_from_config(config: Option<&LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}
