use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::{Hardware, Result};

/// Handle of a task created on a [`DaqBoard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A hardware-timed task, in the shape the NI driver takes them
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSpec {
    /// Finite pulse train that clocks the waveform tasks, started by the
    /// camera's fire output
    Counter {
        /// Counter number on the board
        counter: u32,
        /// Pulse frequency in Hz
        frequency: f64,
        /// High fraction of each pulse
        duty_cycle: f64,
        /// Pulses per trigger
        samples: usize,
        /// PFI line the counter is triggered from
        trigger: u32,
    },
    /// Analog output, one sample vector per line
    AnalogWaveform {
        /// Analog output lines
        lines: Vec<u32>,
        /// Voltages, `samples[i]` belongs to `lines[i]`
        samples: Vec<Vec<f64>>,
        /// Sample rate in Hz
        rate: f64,
        /// External sample clock, the board's counter output when `None`
        clock: Option<String>,
    },
    /// Digital output, one sample vector per line
    DigitalWaveform {
        /// Digital output lines
        lines: Vec<u32>,
        /// Levels, `samples[i]` belongs to `lines[i]`
        samples: Vec<Vec<bool>>,
        /// Sample rate in Hz
        rate: f64,
        /// External sample clock, the board's counter output when `None`
        clock: Option<String>,
    },
}

impl TaskSpec {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            TaskSpec::Counter { .. } => "counter",
            TaskSpec::AnalogWaveform { .. } => "analog",
            TaskSpec::DigitalWaveform { .. } => "digital",
        }
    }
}

/// National Instruments DAQ board seam
pub trait DaqBoard: Hardware {
    /// Board name, e.g. `PCIe-6343`
    fn board(&self) -> &str;

    /// Set one analog output line to a static voltage
    fn set_analog_line(&mut self, line: u32, voltage: f64) -> Result<()>;

    /// Set one digital output line
    fn set_digital_line(&mut self, line: u32, on: bool) -> Result<()>;

    /// Create a task; it does nothing until started
    fn create_task(&mut self, spec: TaskSpec) -> Result<TaskId>;

    /// Start a created task
    fn start_task(&mut self, task: TaskId) -> Result<()>;

    /// Stop a running task
    fn stop_task(&mut self, task: TaskId) -> Result<()>;

    /// Free a task
    fn clear_task(&mut self, task: TaskId) -> Result<()>;
}
