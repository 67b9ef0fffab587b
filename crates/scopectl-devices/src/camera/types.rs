use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque key identifying one `start_camera` session
pub type SessionKey = i64;

/// How the camera acquires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Free-run until told to stop; used whenever no film is being recorded
    #[default]
    RunTillAbort,
    /// Acquire `FilmParameters::frames` frames, then stop
    FixedLength,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::RunTillAbort => f.write_str("run_till_abort"),
            AcquisitionMode::FixedLength => f.write_str("fixed_length"),
        }
    }
}

/// The part of a parameter set the camera adapter acts on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmParameters {
    /// Frames in a fixed-length film
    pub frames: u64,
    /// Acquisition mode used while filming
    pub acq_mode: AcquisitionMode,
    /// Exposure time in seconds
    pub exposure_time: f64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl Default for FilmParameters {
    fn default() -> Self {
        Self {
            frames: 100,
            acq_mode: AcquisitionMode::FixedLength,
            exposure_time: 0.1,
            width: 256,
            height: 256,
        }
    }
}

/// Exposure, accumulate and kinetic cycle times in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionTimings {
    /// Exposure time
    pub exposure: f64,
    /// Accumulate cycle time
    pub accumulate: f64,
    /// Kinetic cycle time; the shutter waveforms are clocked off this
    pub kinetic: f64,
}

/// Whether the sensor reached its set point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureStatus {
    /// At the set point
    Stable,
    /// Still settling, or a camera without cooling control
    #[default]
    Unstable,
}

/// Sensor temperature reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    /// Degrees Celsius
    pub celsius: f64,
    /// Set point status
    pub status: TemperatureStatus,
}

impl Default for Temperature {
    fn default() -> Self {
        Self {
            celsius: 50.0,
            status: TemperatureStatus::Unstable,
        }
    }
}

/// One frame as delivered by the camera
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame number within the acquisition, as counted by the SDK
    pub number: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Raw 16-bit little-endian pixel data
    pub data: Bytes,
    /// When the adapter received the frame
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap raw pixel data
    pub fn new(number: u64, width: u32, height: u32, data: Bytes) -> Self {
        Self {
            number,
            width,
            height,
            data,
            captured_at: Utc::now(),
        }
    }

    /// Size of the pixel data in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Fired once when a fixed-length film has all its frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachedMaxFrames {
    /// Session that reached the limit
    pub key: Option<SessionKey>,
    /// Frames counted when the limit was observed
    pub frames: u64,
}

/// A batch of frames drained from the camera
#[derive(Debug, Clone)]
pub struct NewData {
    /// The frames, shared between all listeners
    pub frames: Arc<Vec<Frame>>,
    /// Frames counted since `start_camera`, this batch included
    pub total: u64,
    /// Session the frames belong to
    pub key: Option<SessionKey>,
}

impl NewData {
    /// Frames in this batch
    pub fn count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_mode_names() {
        assert_eq!(AcquisitionMode::default(), AcquisitionMode::RunTillAbort);
        assert_eq!(AcquisitionMode::FixedLength.to_string(), "fixed_length");
        assert_eq!(AcquisitionMode::RunTillAbort.to_string(), "run_till_abort");
    }

    #[test]
    fn test_default_temperature_is_unstable_fifty() {
        let t = Temperature::default();
        assert_eq!(t.celsius, 50.0);
        assert_eq!(t.status, TemperatureStatus::Unstable);
    }

    #[test]
    fn test_new_data_count() {
        let frames = vec![
            Frame::new(0, 2, 2, Bytes::from_static(&[0; 8])),
            Frame::new(1, 2, 2, Bytes::from_static(&[0; 8])),
        ];
        let batch = NewData {
            frames: Arc::new(frames),
            total: 2,
            key: Some(3),
        };
        assert_eq!(batch.count(), 2);
        assert_eq!(batch.frames[1].size_bytes(), 8);
    }
}
