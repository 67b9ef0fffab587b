/*!
 * Camera adapter.
 *
 * All camera communication goes through one [`CameraControl`], whose
 * device thread drains frames while the acquisition latch is active and
 * reports them as [`NewData`] events. In fixed-length films it also fires
 * [`ReachedMaxFrames`] once per `start_camera`.
 */

mod control;
mod sdk;
mod types;

pub use control::CameraControl;
pub use sdk::{CameraSdk, FilmRecorder};
pub use types::{
    AcquisitionMode, AcquisitionTimings, FilmParameters, Frame, NewData, ReachedMaxFrames,
    SessionKey, Temperature, TemperatureStatus,
};
