use serde::{Deserialize, Serialize};

use crate::device::{DeviceError, Result};

/// How one illumination channel is wired to the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Label, usually the wavelength
    pub name: String,
    /// Analog line modulating the channel's power
    pub analog_line: Option<u32>,
    /// Digital line driving the channel's shutter
    pub digital_line: Option<u32>,
    /// Voltage at zero power
    pub min_voltage: f64,
    /// Voltage at full power
    pub max_voltage: f64,
}

impl ChannelSpec {
    /// A channel modulated over 0-5 V
    pub fn new<S: Into<String>>(name: S, analog_line: Option<u32>, digital_line: Option<u32>) -> Self {
        Self {
            name: name.into(),
            analog_line,
            digital_line,
            min_voltage: 0.0,
            max_voltage: 5.0,
        }
    }

    /// Linear map from a power fraction to the modulation voltage
    ///
    /// The fraction is clamped to `[0, 1]`.
    pub fn power_to_voltage(&self, power: f64) -> f64 {
        let power = power.clamp(0.0, 1.0);
        self.min_voltage + power * (self.max_voltage - self.min_voltage)
    }
}

/// Board wiring and timing for one setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutterProfile {
    /// Profile name
    pub name: String,
    /// NI board name
    pub board: String,
    /// Channels, in waveform row order
    pub channels: Vec<ChannelSpec>,
    /// Counter that clocks the waveforms
    pub counter: u32,
    /// PFI line the counter is triggered from
    pub trigger: u32,
    /// External sample clock for the waveform tasks
    pub clock: Option<String>,
    /// Waveform samples per camera frame
    pub oversampling: u32,
    /// Digital line that enables the lasers while the adapter lives
    pub laser_enable_line: Option<u32>,
}

impl ShutterProfile {
    /// The qstate setup: one AOTF channel with a mechanical shutter on a PCIe-6343
    pub fn qstate() -> Self {
        Self {
            name: "qstate".to_string(),
            board: "PCIe-6343".to_string(),
            channels: vec![
                ChannelSpec::new("405", None, None),
                ChannelSpec::new("647", Some(3), Some(12)),
            ],
            counter: 0,
            trigger: 1,
            clock: Some("PFI12".to_string()),
            oversampling: 1,
            laser_enable_line: Some(6),
        }
    }

    /// The prism2 setup: seven analog-modulated channels on a PCI-6722
    pub fn prism2() -> Self {
        let names = ["white", "750", "647", "561", "488", "405", "445", "shutter"];
        let channels = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let line = if i == 0 { None } else { Some(i as u32) };
                ChannelSpec::new(*name, line, None)
            })
            .collect();
        Self {
            name: "prism2".to_string(),
            board: "PCI-6722".to_string(),
            channels,
            counter: 0,
            trigger: 0,
            clock: None,
            oversampling: 100,
            laser_enable_line: None,
        }
    }

    /// Look a preset up by name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "qstate" => Ok(Self::qstate()),
            "prism2" => Ok(Self::prism2()),
            other => Err(DeviceError::InvalidParameter(format!(
                "Unknown shutter profile: {}",
                other
            ))),
        }
    }

    /// Replace the board name
    pub fn with_board<S: Into<String>>(mut self, board: S) -> Self {
        self.board = board.into();
        self
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Counter frequency for a camera kinetic cycle time in seconds
    ///
    /// The counter runs 0.1% fast so it is re-armed before the camera
    /// fires again.
    pub fn counter_frequency(&self, kinetic: f64) -> f64 {
        (1.001 / kinetic) * f64::from(self.oversampling)
    }
}

/// Per-frame shutter sequence, one row per channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutterWaveform {
    channels: Vec<Vec<bool>>,
}

impl ShutterWaveform {
    /// Build from rows of per-frame on/off states
    ///
    /// Rows must be non-empty and of equal length.
    pub fn new(channels: Vec<Vec<bool>>) -> Result<Self> {
        let frames = channels.first().map(Vec::len).unwrap_or(0);
        if frames == 0 {
            return Err(DeviceError::InvalidParameter(
                "Shutter waveform has no frames".to_string(),
            ));
        }
        if let Some(i) = channels.iter().position(|row| row.len() != frames) {
            return Err(DeviceError::InvalidParameter(format!(
                "Shutter channel {} has {} frames, expected {}",
                i,
                channels[i].len(),
                frames
            )));
        }
        Ok(Self { channels })
    }

    /// A waveform with every channel on in every frame
    pub fn all_on(channels: usize, frames: usize) -> Result<Self> {
        Self::new(vec![vec![true; frames]; channels])
    }

    /// Frames in one cycle
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Number of channel rows
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Row `channel`, each frame repeated `oversampling` times
    pub fn expanded(&self, channel: usize, oversampling: u32) -> Vec<bool> {
        let repeat = oversampling.max(1) as usize;
        self.channels
            .get(channel)
            .map(|row| {
                row.iter()
                    .flat_map(|on| std::iter::repeat(*on).take(repeat))
                    .collect()
            })
            .unwrap_or_default()
    }
}
