/*!
 * Prelude module for scopectl core.
 *
 * Re-exports the types every adapter needs.
 */

pub use crate::error::{Error, Result};

pub use crate::types::{Id, Position, Velocity};

pub use crate::event::{EventBus, EventReceiver, SharedEventBus, Signal};

pub use crate::latch::Latch;
pub use crate::signal::SingleShot;
pub use crate::worker::{StopFlag, Tick, Worker};

pub use crate::config::{Config, ConfigBuilder, SharedConfig};

pub use crate::logging::{command_span, device_span};
pub use tracing::{debug, error, info, trace, warn};

pub use crate::init;
