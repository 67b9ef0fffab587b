use crate::device::{Hardware, Result};

use super::types::{AcquisitionMode, AcquisitionTimings, FilmParameters, Frame, Temperature};

/// Vendor camera SDK seam
///
/// Only the camera adapter's lock holder calls into this; implementations
/// need not be thread-safe beyond `Send`.
pub trait CameraSdk: Hardware {
    /// Open and configure the camera
    fn init_camera(&mut self) -> Result<()>;

    /// Vendor model string
    fn model(&self) -> Option<String> {
        None
    }

    /// Current exposure, accumulate and kinetic cycle times
    fn acquisition_timings(&self) -> Result<AcquisitionTimings>;

    /// Apply a new parameter set
    fn new_parameters(&mut self, parameters: &FilmParameters) -> Result<()>;

    /// Begin acquiring in `mode`; `frames` is the film length for fixed-length mode
    fn start_acquisition(&mut self, mode: AcquisitionMode, frames: u64) -> Result<()>;

    /// Stop acquiring
    fn stop_acquisition(&mut self) -> Result<()>;

    /// Drain the frames captured since the last call
    fn get_frames(&mut self) -> Result<Vec<Frame>>;

    /// Sensor temperature
    fn temperature(&self) -> Result<Temperature> {
        Ok(Temperature::default())
    }

    /// EMCCD gain; cameras without one ignore it
    fn set_emccd_gain(&mut self, _gain: u32) -> Result<()> {
        Ok(())
    }

    /// Open or close the camera shutter
    fn set_shutter(&mut self, _open: bool) -> Result<()> {
        Ok(())
    }
}

/// Destination for the frames of a film (a movie file writer)
pub trait FilmRecorder: Send {
    /// Append one frame
    fn save_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Bytes written so far
    fn total_film_size(&self) -> u64;

    /// Finish the film
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
