/*!
 * HapticFlow Core
 *
 * This crate provides the versioned message contract shared by every
 * HapticFlow component, together with the event hub, configuration, and
 * logging used by the device layer.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod message;
pub mod prelude;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
    pub use uuid;
}

/// HapticFlow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization: installs the default tracing subscriber
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("HapticFlow Core {} initialized", VERSION);
    Ok(())
}
