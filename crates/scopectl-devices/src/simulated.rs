/*!
 * In-process stand-ins for the vendor SDKs.
 *
 * Each simulated device records the hardware calls it receives in a shared
 * [`Probe`], so a test can hand the device to an adapter and still observe
 * the traffic afterwards. The probe can also be told to fail an operation.
 */
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::trace;

use scopectl_core::types::{Position, Velocity};

use crate::camera::{
    AcquisitionMode, AcquisitionTimings, CameraSdk, FilmParameters, Frame,
};
use crate::device::{DeviceError, Hardware, Result};
use crate::illumination::{DaqBoard, TaskId, TaskSpec};
use crate::stage::StageSdk;

#[derive(Debug, Default)]
struct ProbeState {
    calls: Vec<String>,
    failing: HashSet<String>,
    tasks: Vec<TaskSpec>,
}

/// Shared record of simulated hardware traffic
#[derive(Debug, Clone, Default)]
pub struct Probe {
    inner: Arc<Mutex<ProbeState>>,
}

impl Probe {
    /// Create an empty probe
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProbeState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fail `op` until told otherwise, without recording it
    fn check(&self, op: &str) -> Result<()> {
        if self.state().failing.contains(op) {
            return Err(DeviceError::Hardware(format!("simulated {} failure", op)));
        }
        Ok(())
    }

    /// Record a call to `op`, or fail it
    fn enter(&self, op: &str, detail: String) -> Result<()> {
        self.check(op)?;
        let call = if detail.is_empty() {
            op.to_string()
        } else {
            format!("{} {}", op, detail)
        };
        trace!("simulated call: {}", call);
        self.state().calls.push(call);
        Ok(())
    }

    /// Every recorded call, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Make every later call to `op` fail
    pub fn fail_on<S: Into<String>>(&self, op: S) {
        self.state().failing.insert(op.into());
    }

    /// Stop failing `op`
    pub fn recover(&self, op: &str) {
        self.state().failing.remove(op);
    }

    /// Forget the recorded calls
    pub fn clear(&self) {
        let mut state = self.state();
        state.calls.clear();
        state.tasks.clear();
    }

    /// Every task created on a simulated board
    pub fn created_tasks(&self) -> Vec<TaskSpec> {
        self.state().tasks.clone()
    }
}

/// A camera that produces blank frames while acquiring
#[derive(Debug)]
pub struct SimulatedCamera {
    probe: Probe,
    parameters: FilmParameters,
    mode: Option<AcquisitionMode>,
    target: u64,
    produced: u64,
    frames_per_poll: u64,
}

impl SimulatedCamera {
    /// One frame per `get_frames` call
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            parameters: FilmParameters::default(),
            mode: None,
            target: 0,
            produced: 0,
            frames_per_poll: 1,
        }
    }

    /// Frames returned per `get_frames` call while acquiring
    pub fn with_frames_per_poll(mut self, frames: u64) -> Self {
        self.frames_per_poll = frames;
        self
    }

    fn blank_frame(&self, number: u64) -> Frame {
        let len = self.parameters.width as usize * self.parameters.height as usize * 2;
        Frame::new(
            number,
            self.parameters.width,
            self.parameters.height,
            Bytes::from(vec![0u8; len]),
        )
    }
}

impl Hardware for SimulatedCamera {
    fn shut_down(&mut self) -> Result<()> {
        self.mode = None;
        self.probe.enter("shut_down", String::new())
    }
}

impl CameraSdk for SimulatedCamera {
    fn init_camera(&mut self) -> Result<()> {
        self.probe.enter("init_camera", String::new())
    }

    fn model(&self) -> Option<String> {
        Some("simulated".to_string())
    }

    fn acquisition_timings(&self) -> Result<AcquisitionTimings> {
        self.probe.check("acquisition_timings")?;
        let exposure = self.parameters.exposure_time;
        Ok(AcquisitionTimings {
            exposure,
            accumulate: exposure,
            kinetic: exposure,
        })
    }

    fn new_parameters(&mut self, parameters: &FilmParameters) -> Result<()> {
        self.probe.enter("new_parameters", String::new())?;
        self.parameters = parameters.clone();
        Ok(())
    }

    fn start_acquisition(&mut self, mode: AcquisitionMode, frames: u64) -> Result<()> {
        self.probe.enter("start_acquisition", mode.to_string())?;
        self.mode = Some(mode);
        self.target = frames;
        self.produced = 0;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        self.probe.enter("stop_acquisition", String::new())?;
        self.mode = None;
        Ok(())
    }

    fn get_frames(&mut self) -> Result<Vec<Frame>> {
        self.probe.check("get_frames")?;
        let count = match self.mode {
            None => 0,
            Some(AcquisitionMode::RunTillAbort) => self.frames_per_poll,
            Some(AcquisitionMode::FixedLength) => {
                self.frames_per_poll.min(self.target.saturating_sub(self.produced))
            }
        };
        let frames = (0..count)
            .map(|i| self.blank_frame(self.produced + i))
            .collect();
        self.produced += count;
        Ok(frames)
    }

    fn set_emccd_gain(&mut self, gain: u32) -> Result<()> {
        self.probe.enter("set_emccd_gain", gain.to_string())
    }

    fn set_shutter(&mut self, open: bool) -> Result<()> {
        self.probe.enter("set_shutter", open.to_string())
    }
}

/// A DAQ board that keeps its tasks in memory
#[derive(Debug)]
pub struct SimulatedDaq {
    probe: Probe,
    board: String,
    next_task: u32,
    tasks: HashMap<TaskId, (&'static str, bool)>,
}

impl SimulatedDaq {
    /// Simulate the board named `board`
    pub fn new<S: Into<String>>(probe: Probe, board: S) -> Self {
        Self {
            probe,
            board: board.into(),
            next_task: 0,
            tasks: HashMap::new(),
        }
    }

    fn task_kind(&self, task: TaskId) -> Result<&'static str> {
        self.tasks
            .get(&task)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| DeviceError::Hardware(format!("No such task: {}", task)))
    }
}

impl Hardware for SimulatedDaq {
    fn shut_down(&mut self) -> Result<()> {
        self.tasks.clear();
        self.probe.enter("shut_down", String::new())
    }
}

impl DaqBoard for SimulatedDaq {
    fn board(&self) -> &str {
        &self.board
    }

    fn set_analog_line(&mut self, line: u32, voltage: f64) -> Result<()> {
        self.probe
            .enter("set_analog_line", format!("{} {:.3}", line, voltage))
    }

    fn set_digital_line(&mut self, line: u32, on: bool) -> Result<()> {
        self.probe.enter("set_digital_line", format!("{} {}", line, on))
    }

    fn create_task(&mut self, spec: TaskSpec) -> Result<TaskId> {
        let kind = spec.kind();
        self.probe.enter("create_task", kind.to_string())?;
        self.probe.state().tasks.push(spec);
        let id = TaskId(self.next_task);
        self.next_task += 1;
        self.tasks.insert(id, (kind, false));
        Ok(id)
    }

    fn start_task(&mut self, task: TaskId) -> Result<()> {
        let kind = self.task_kind(task)?;
        self.probe.enter("start_task", kind.to_string())?;
        self.tasks.insert(task, (kind, true));
        Ok(())
    }

    fn stop_task(&mut self, task: TaskId) -> Result<()> {
        let kind = self.task_kind(task)?;
        self.probe.enter("stop_task", kind.to_string())?;
        self.tasks.insert(task, (kind, false));
        Ok(())
    }

    fn clear_task(&mut self, task: TaskId) -> Result<()> {
        let kind = self.task_kind(task)?;
        self.probe.enter("clear_task", kind.to_string())?;
        self.tasks.remove(&task);
        Ok(())
    }
}

/// A stage that arrives instantly wherever it is sent
#[derive(Debug)]
pub struct SimulatedStage {
    probe: Probe,
    online: bool,
    position: Position,
    velocity: Velocity,
    joystick: bool,
}

impl SimulatedStage {
    /// A connected stage at the origin
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            online: true,
            position: Position::default(),
            velocity: Velocity::default(),
            joystick: true,
        }
    }

    /// A stage whose controller never answered
    pub fn offline(probe: Probe) -> Self {
        Self {
            online: false,
            ..Self::new(probe)
        }
    }

    /// Start at `position` instead of the origin
    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Last velocity set
    pub fn velocity(&self) -> Velocity {
        self.velocity
    }

    /// Whether the joystick is enabled
    pub fn joystick_enabled(&self) -> bool {
        self.joystick
    }
}

impl Hardware for SimulatedStage {
    fn shut_down(&mut self) -> Result<()> {
        self.probe.enter("shut_down", String::new())
    }
}

impl StageSdk for SimulatedStage {
    fn status(&self) -> bool {
        self.online
    }

    fn go_absolute(&mut self, x: f64, y: f64) -> Result<()> {
        self.probe
            .enter("go_absolute", format!("{:.3} {:.3}", x, y))?;
        self.position.x = x;
        self.position.y = y;
        Ok(())
    }

    fn go_relative(&mut self, dx: f64, dy: f64) -> Result<()> {
        self.probe
            .enter("go_relative", format!("{:.3} {:.3}", dx, dy))?;
        self.position = self.position.offset(dx, dy);
        Ok(())
    }

    fn set_velocity(&mut self, vx: f64, vy: f64) -> Result<()> {
        self.probe
            .enter("set_velocity", format!("{:.3} {:.3}", vx, vy))?;
        self.velocity = Velocity::new(vx, vy);
        Ok(())
    }

    fn position(&mut self) -> Result<Position> {
        self.probe.check("position")?;
        Ok(self.position)
    }

    fn zero(&mut self) -> Result<()> {
        self.probe.enter("zero", String::new())?;
        self.position.x = 0.0;
        self.position.y = 0.0;
        Ok(())
    }

    fn joystick_on_off(&mut self, on: bool) -> Result<()> {
        self.probe.enter("joystick_on_off", on.to_string())?;
        self.joystick = on;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_records_and_fails() {
        let probe = Probe::new();
        let mut stage = SimulatedStage::new(probe.clone());
        stage.go_absolute(1.0, 2.0).unwrap();
        assert_eq!(probe.calls(), vec!["go_absolute 1.000 2.000".to_string()]);

        probe.fail_on("zero");
        assert!(matches!(stage.zero(), Err(DeviceError::Hardware(_))));
        assert_eq!(probe.count("zero"), 0);

        probe.recover("zero");
        stage.zero().unwrap();
        assert_eq!(stage.position().unwrap(), Position::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_camera_only_produces_frames_while_acquiring() {
        let mut camera = SimulatedCamera::new(Probe::new()).with_frames_per_poll(3);
        assert!(camera.get_frames().unwrap().is_empty());

        camera.start_acquisition(AcquisitionMode::FixedLength, 4).unwrap();
        assert_eq!(camera.get_frames().unwrap().len(), 3);
        let last = camera.get_frames().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].number, 3);
        assert!(camera.get_frames().unwrap().is_empty());

        camera.stop_acquisition().unwrap();
        assert!(camera.get_frames().unwrap().is_empty());
    }

    #[test]
    fn test_daq_rejects_unknown_tasks() {
        let probe = Probe::new();
        let mut daq = SimulatedDaq::new(probe.clone(), "PCI-6722");
        let task = daq
            .create_task(TaskSpec::Counter {
                counter: 0,
                frequency: 10.0,
                duty_cycle: 0.5,
                samples: 4,
                trigger: 0,
            })
            .unwrap();
        daq.start_task(task).unwrap();
        daq.clear_task(task).unwrap();
        assert!(daq.start_task(task).is_err());
        assert_eq!(probe.created_tasks().len(), 1);
        assert_eq!(probe.count("start_task counter"), 1);
    }
}
