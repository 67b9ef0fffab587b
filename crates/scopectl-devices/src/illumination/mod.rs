/*!
 * Illumination adapter.
 *
 * Lasers, AOTF and shutters are driven from the lines of one National
 * Instruments board. Outside a film the lines follow the per-channel power
 * and on/off commands, which are queued and executed by the adapter's
 * command thread. During a film, hardware-timed waveform tasks clocked off
 * the camera take the lines over.
 */

mod control;
mod daq;
mod profile;

pub use control::{ChannelState, IlluminationControl};
pub use daq::{DaqBoard, TaskId, TaskSpec};
pub use profile::{ChannelSpec, ShutterProfile, ShutterWaveform};
