/*!
 * Logging functionality for scopectl.
 *
 * This module provides tracing setup and the spans device threads and
 * command methods run under.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence over `filter` when set.
pub fn init_with_filter(filter: &str) -> Result<()> {
    init_from_config(&LoggingConfig {
        level: filter.to_string(),
        ..LoggingConfig::default()
    })
}

/// Initialize the logging system from the `[logging]` config section
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_format {
        registry
            .with(fmt::layer().json().with_target(config.with_target).with_thread_names(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(config.with_target).with_thread_names(true))
            .try_init()
    };

    result.map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Span a device thread runs inside
///
/// # Arguments
///
/// * `kind` - The device kind (camera, stage, ...)
/// * `name` - The adapter name
pub fn device_span(kind: &str, name: &str) -> Span {
    tracing::info_span!("device", kind = %kind, name = %name)
}

/// Span for one command issued by the controlling thread
pub fn command_span(command: &str, device: &str) -> Span {
    tracing::debug_span!("command", name = %command, device = %device)
}
