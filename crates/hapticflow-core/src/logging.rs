/*!
 * Logging functionality for HapticFlow.
 *
 * This module provides tracing setup and span helpers for consistent logging
 * across the HapticFlow crates.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_config(&LoggingConfig::default())
}

/// Initialize the logging system from the logging section of the configuration
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(config.with_target))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a span for a device, keyed by its name and protocol identifier
pub fn device_span(name: &str, identifier: &str) -> Span {
    tracing::info_span!("device", name = %name, identifier = %identifier)
}

/// Create a span for a subtype manager
pub fn manager_span(name: &str) -> Span {
    tracing::info_span!("subtype_manager", name = %name)
}
