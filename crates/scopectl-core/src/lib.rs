/*!
 * scopectl Core
 *
 * This crate provides the hardware-independent pieces shared by every
 * scopectl device adapter: configuration, logging, the typed event bus,
 * the idle/active latch, single-shot notifications and the device worker
 * thread.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod latch;
pub mod logging;
pub mod prelude;
pub mod signal;
pub mod types;
pub mod worker;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use chrono;
    pub use tokio;
    pub use tracing;
    pub use uuid;
}

/// scopectl core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("scopectl core {} initialized", VERSION);
    Ok(())
}
