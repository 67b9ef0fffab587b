/*!
 * XY stage adapter.
 *
 * The device thread polls the controller for its position and caches it;
 * moves are issued directly under the adapter lock and update the cached
 * position to the expected target.
 */

mod control;
mod sdk;

pub use control::{StageControl, StageMoved};
pub use sdk::StageSdk;
