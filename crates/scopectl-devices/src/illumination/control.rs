/*!
Illumination adapter: laser power, on/off state and film shutter tasks on a DAQ board.
*/

use std::fmt::{self, Debug};
use std::iter;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use scopectl_core::{
    config::IlluminationConfig,
    error::Error as CoreError,
    event::SharedEventBus,
    logging::{command_span, device_span},
    worker::{StopFlag, Worker},
};

use super::daq::{DaqBoard, TaskId, TaskSpec};
use super::profile::{ShutterProfile, ShutterWaveform};
use crate::device::{
    lock, publish_error, publish_event, Adapter, DeviceError, DeviceEvent, DeviceInfo,
    DeviceKind, HardwareHandle, Result, WorkerSlot,
};

/// How long `sync` waits for the command thread
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Manual setting of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Power as a fraction of full scale
    pub power: f64,
    /// Whether the channel is on
    pub on: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            power: 1.0,
            on: true,
        }
    }
}

#[derive(Debug)]
enum Command {
    SetPower { channel: usize, power: f64 },
    SetOnOff { channel: usize, on: bool },
    Sync(Sender<()>),
}

#[derive(Debug, Clone, Copy)]
struct FilmTasks {
    counter: TaskId,
    digital: Option<TaskId>,
    analog: Option<TaskId>,
}

impl FilmTasks {
    /// Counter first, so the waveforms stop being clocked before they stop
    fn stop_order(&self) -> Vec<TaskId> {
        iter::once(self.counter)
            .chain(self.digital)
            .chain(self.analog)
            .collect()
    }
}

struct IlluminationState<B: DaqBoard> {
    board: HardwareHandle<B>,
    profile: ShutterProfile,
    tasks: Option<FilmTasks>,
    film_mode: bool,
    channels: Vec<ChannelState>,
}

impl<B: DaqBoard> IlluminationState<B> {
    fn default_lines(&mut self) -> Result<()> {
        let board = self.board.get()?;
        for channel in &self.profile.channels {
            if let Some(line) = channel.analog_line {
                board.set_analog_line(line, channel.power_to_voltage(1.0))?;
            }
            if let Some(line) = channel.digital_line {
                board.set_digital_line(line, true)?;
            }
        }
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let board = self.board.get()?;
        for line in self.profile.channels.iter().filter_map(|c| c.analog_line) {
            board.set_analog_line(line, 0.0)?;
        }
        Ok(())
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut ChannelState> {
        let count = self.channels.len();
        self.channels.get_mut(channel).ok_or_else(|| {
            DeviceError::InvalidParameter(format!("Channel {} of {}", channel, count))
        })
    }

    /// Drive a channel's lines from its manual setting
    fn apply_channel(&mut self, channel: usize) -> Result<()> {
        if self.film_mode {
            return Ok(());
        }
        let state = *self.channel_mut(channel)?;
        let Some(spec) = self.profile.channels.get(channel) else {
            return Ok(());
        };
        let board = self.board.get()?;
        if let Some(line) = spec.analog_line {
            let voltage = if state.on {
                spec.power_to_voltage(state.power)
            } else {
                0.0
            };
            board.set_analog_line(line, voltage)?;
        }
        if let Some(line) = spec.digital_line {
            board.set_digital_line(line, state.on)?;
        }
        Ok(())
    }

    fn waveform_specs(&self, kinetic: f64, waveform: &ShutterWaveform) -> Vec<TaskSpec> {
        let profile = &self.profile;
        let rate = profile.counter_frequency(kinetic);
        let oversampling = profile.oversampling;

        let mut analog_lines = Vec::new();
        let mut analog_samples = Vec::new();
        let mut digital_lines = Vec::new();
        let mut digital_samples = Vec::new();
        for (i, channel) in profile.channels.iter().enumerate() {
            let shutter = waveform.expanded(i, oversampling);
            if let Some(line) = channel.analog_line {
                let on_voltage = channel.power_to_voltage(self.channels[i].power);
                analog_lines.push(line);
                analog_samples.push(
                    shutter
                        .iter()
                        .map(|on| if *on { on_voltage } else { 0.0 })
                        .collect(),
                );
            }
            if let Some(line) = channel.digital_line {
                digital_lines.push(line);
                digital_samples.push(shutter);
            }
        }

        let mut specs = Vec::new();
        if !analog_lines.is_empty() {
            specs.push(TaskSpec::AnalogWaveform {
                lines: analog_lines,
                samples: analog_samples,
                rate,
                clock: profile.clock.clone(),
            });
        }
        if !digital_lines.is_empty() {
            specs.push(TaskSpec::DigitalWaveform {
                lines: digital_lines,
                samples: digital_samples,
                rate,
                clock: profile.clock.clone(),
            });
        }
        specs.push(TaskSpec::Counter {
            counter: profile.counter,
            frequency: rate,
            duty_cycle: 0.5,
            samples: waveform.frames() * oversampling.max(1) as usize,
            trigger: profile.trigger,
        });
        specs
    }

    fn setup(&mut self, kinetic: f64, waveform: &ShutterWaveform) -> Result<()> {
        if self.tasks.is_some() {
            return Err(DeviceError::Sequence(
                "Attempt to call setup without first calling cleanup".to_string(),
            ));
        }
        if !(kinetic > 0.0) {
            return Err(DeviceError::InvalidParameter(format!(
                "Kinetic cycle time must be positive, got {}",
                kinetic
            )));
        }
        if waveform.channel_count() != self.profile.channel_count() {
            return Err(DeviceError::InvalidParameter(format!(
                "Waveform has {} channels, profile {} has {}",
                waveform.channel_count(),
                self.profile.name,
                self.profile.channel_count()
            )));
        }

        let specs = self.waveform_specs(kinetic, waveform);
        let has_analog = matches!(specs.first(), Some(TaskSpec::AnalogWaveform { .. }));
        let has_digital = specs
            .iter()
            .any(|s| matches!(s, TaskSpec::DigitalWaveform { .. }));

        let mut ids = create_all(self.board.get()?, specs)?.into_iter();
        let analog = if has_analog { ids.next() } else { None };
        let digital = if has_digital { ids.next() } else { None };
        let counter = ids
            .next()
            .ok_or_else(|| DeviceError::Hardware("Counter task was not created".to_string()))?;

        self.tasks = Some(FilmTasks {
            counter,
            digital,
            analog,
        });
        debug!(
            "Film tasks ready at {:.3} Hz",
            self.profile.counter_frequency(kinetic)
        );
        Ok(())
    }

    fn start_film(&mut self) -> Result<()> {
        let tasks = self.tasks.ok_or_else(|| {
            DeviceError::Sequence("Attempt to start a film before setup".to_string())
        })?;
        let board = self.board.get()?;
        for task in tasks.stop_order().into_iter().rev() {
            board.start_task(task)?;
        }
        Ok(())
    }

    fn stop_film(&mut self) -> Result<()> {
        if let Some(tasks) = self.tasks.take() {
            let board = self.board.get()?;
            let order = tasks.stop_order();
            let mut first_error = None;
            for task in &order {
                if let Err(e) = board.stop_task(*task) {
                    first_error.get_or_insert(e);
                }
            }
            for task in &order {
                if let Err(e) = board.clear_task(*task) {
                    first_error.get_or_insert(e);
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        self.default_lines()
    }

    fn cleanup(&mut self) -> Result<()> {
        let Some(tasks) = self.tasks.take() else {
            return Ok(());
        };
        let board = self.board.get()?;
        let mut first_error = None;
        for task in tasks.stop_order() {
            if let Err(e) = board.clear_task(task) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::SetPower { channel, power } => {
                self.channel_mut(channel)?.power = power;
                self.apply_channel(channel)
            }
            Command::SetOnOff { channel, on } => {
                self.channel_mut(channel)?.on = on;
                self.apply_channel(channel)
            }
            Command::Sync(ack) => {
                let _ = ack.send(());
                Ok(())
            }
        }
    }
}

/// Create tasks in order, clearing the ones already made if one fails
fn create_all<B: DaqBoard>(board: &mut B, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>> {
    let mut created = Vec::with_capacity(specs.len());
    for spec in specs {
        match board.create_task(spec) {
            Ok(id) => created.push(id),
            Err(e) => {
                for id in created {
                    if let Err(clear) = board.clear_task(id) {
                        warn!("Failed to clear {}: {}", id, clear);
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// Illumination adapter
pub struct IlluminationControl<B: DaqBoard> {
    info: DeviceInfo,
    command_poll: Duration,
    bus: SharedEventBus,
    state: Arc<Mutex<IlluminationState<B>>>,
    commands: Mutex<Sender<Command>>,
    receiver: Mutex<Option<Receiver<Command>>>,
    worker: WorkerSlot,
}

impl<B: DaqBoard> IlluminationControl<B> {
    /// Take the board, enable the lasers and put the lines in their default state
    pub fn new<N: Into<String>>(
        name: N,
        mut board: B,
        profile: ShutterProfile,
        config: &IlluminationConfig,
        bus: SharedEventBus,
    ) -> Result<Self> {
        let info = DeviceInfo::new(name, DeviceKind::Illumination).with_model(profile.board.as_str());
        if board.board() != profile.board {
            warn!(
                "Profile {} expects board {}, got {}",
                profile.name,
                profile.board,
                board.board()
            );
        }
        if let Some(line) = profile.laser_enable_line {
            board.set_digital_line(line, true)?;
        }

        let mut state = IlluminationState {
            board: HardwareHandle::new(info.name.as_str(), board),
            channels: vec![ChannelState::default(); profile.channel_count()],
            profile,
            tasks: None,
            film_mode: false,
        };
        state.default_lines()?;

        let (commands, receiver) = mpsc::channel();
        Ok(Self {
            info,
            command_poll: config.command_poll(),
            bus,
            state: Arc::new(Mutex::new(state)),
            commands: Mutex::new(commands),
            receiver: Mutex::new(Some(receiver)),
            worker: WorkerSlot::default(),
        })
    }

    /// Build from configuration, picking the profile by name
    pub fn from_config<N: Into<String>>(
        name: N,
        board: B,
        config: &IlluminationConfig,
        bus: SharedEventBus,
    ) -> Result<Self> {
        let mut profile = ShutterProfile::from_name(&config.profile)?;
        if !config.board.is_empty() {
            profile = profile.with_board(config.board.as_str());
        }
        Self::new(name, board, profile, config, bus)
    }

    /// The board wiring
    pub fn profile(&self) -> Result<ShutterProfile> {
        Ok(lock(&self.state, &self.info.name)?.profile.clone())
    }

    /// Every modulation line at full power and every shutter open
    pub fn default_lines(&self) -> Result<()> {
        lock(&self.state, &self.info.name)?.default_lines()
    }

    /// Zero the modulation lines so the lasers do not flash when a film starts
    pub fn prepare(&self) -> Result<()> {
        let _span = command_span("prepare", &self.info.name).entered();
        lock(&self.state, &self.info.name)?.prepare()
    }

    /// Create the film tasks for a camera kinetic cycle time in seconds
    ///
    /// Fails with a sequencing error if the previous film's tasks were not
    /// cleaned up.
    pub fn setup(&self, kinetic: f64, waveform: &ShutterWaveform) -> Result<()> {
        let _span = command_span("setup", &self.info.name).entered();
        lock(&self.state, &self.info.name)?.setup(kinetic, waveform)
    }

    /// Start the film tasks; they wait for the camera trigger
    pub fn start_film(&self) -> Result<()> {
        let _span = command_span("start_film", &self.info.name).entered();
        lock(&self.state, &self.info.name)?.start_film()
    }

    /// Stop and free the film tasks, then restore the default lines
    pub fn stop_film(&self) -> Result<()> {
        let _span = command_span("stop_film", &self.info.name).entered();
        lock(&self.state, &self.info.name)?.stop_film()
    }

    /// Free film tasks without stopping them
    pub fn cleanup(&self) -> Result<()> {
        let _span = command_span("cleanup", &self.info.name).entered();
        lock(&self.state, &self.info.name)?.cleanup()
    }

    /// Hand the lines to the film waveforms
    pub fn auto_control(&self) -> Result<()> {
        lock(&self.state, &self.info.name)?.film_mode = true;
        debug!("Illumination under film control");
        Ok(())
    }

    /// Take the lines back and re-apply every channel's manual setting
    pub fn manual_control(&self) -> Result<()> {
        let mut state = lock(&self.state, &self.info.name)?;
        state.film_mode = false;
        for channel in 0..state.channels.len() {
            state.apply_channel(channel)?;
        }
        debug!("Illumination under manual control");
        Ok(())
    }

    /// Whether film waveforms own the lines
    pub fn is_film_mode(&self) -> Result<bool> {
        Ok(lock(&self.state, &self.info.name)?.film_mode)
    }

    /// Manual setting of `channel`
    pub fn channel_state(&self, channel: usize) -> Result<ChannelState> {
        Ok(*lock(&self.state, &self.info.name)?.channel_mut(channel)?)
    }

    fn check_channel(&self, channel: usize) -> Result<()> {
        lock(&self.state, &self.info.name)?.channel_mut(channel)?;
        Ok(())
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.worker.is_finished() {
            return Err(DeviceError::Released(self.info.name.clone()));
        }
        lock(&self.commands, &self.info.name)?
            .send(command)
            .map_err(|_| DeviceError::ChannelClosed(self.info.name.clone()))
    }

    /// Queue a power change for `channel`
    pub fn set_power(&self, channel: usize, power: f64) -> Result<()> {
        self.check_channel(channel)?;
        if !(0.0..=1.0).contains(&power) {
            return Err(DeviceError::InvalidParameter(format!(
                "Power must be within [0, 1], got {}",
                power
            )));
        }
        self.send(Command::SetPower { channel, power })
    }

    /// Queue turning `channel` on or off
    pub fn set_on_off(&self, channel: usize, on: bool) -> Result<()> {
        self.check_channel(channel)?;
        self.send(Command::SetOnOff { channel, on })
    }

    /// Wait until every command queued so far has run
    pub fn sync(&self) -> Result<()> {
        if !self.worker.is_running() {
            return Err(DeviceError::Sequence(format!(
                "Command thread of {} is not running",
                self.info.name
            )));
        }
        let (ack, done) = mpsc::channel();
        self.send(Command::Sync(ack))?;
        done.recv_timeout(SYNC_TIMEOUT).map_err(|e| match e {
            RecvTimeoutError::Timeout => DeviceError::Timeout(format!(
                "{} did not drain its queue within {:?}",
                self.info.name, SYNC_TIMEOUT
            )),
            RecvTimeoutError::Disconnected => DeviceError::ChannelClosed(self.info.name.clone()),
        })
    }

    fn run_commands(
        state: Arc<Mutex<IlluminationState<B>>>,
        receiver: Receiver<Command>,
        info: DeviceInfo,
        bus: SharedEventBus,
        poll: Duration,
        stop: StopFlag,
    ) {
        while !stop.is_raised() {
            let command = match receiver.recv_timeout(poll) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let result = lock(&state, &info.name).and_then(|mut state| state.execute(command));
            match result {
                Ok(()) => {}
                Err(e @ (DeviceError::Released(_) | DeviceError::LockPoisoned(_))) => {
                    publish_error(&bus, &info, &e);
                    break;
                }
                Err(e) => publish_error(&bus, &info, &e),
            }
        }
    }
}

impl<B: DaqBoard> Adapter for IlluminationControl<B> {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        let info = self.info.clone();
        let bus = self.bus.clone();
        let poll = self.command_poll;

        self.worker.start(&self.info, || {
            let receiver = match self.receiver.lock() {
                Ok(mut receiver) => receiver.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            }
            .ok_or_else(|| CoreError::runtime("Command queue already taken"))?;

            Worker::spawn(
                &self.info.name,
                device_span(DeviceKind::Illumination.as_str(), &self.info.name),
                move |stop| Self::run_commands(state, receiver, info, bus, poll, stop),
            )
        })?;
        publish_event(
            &self.bus,
            &self.info,
            DeviceEvent::Started {
                device_id: self.info.id.clone(),
            },
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    fn shut_down(&self) -> Result<()> {
        self.worker.retire(&self.info)?;

        let mut state = lock(&self.state, &self.info.name)?;
        if !state.board.is_held() {
            return Ok(());
        }
        if let Err(e) = state.stop_film() {
            warn!("Failed to stop film on {}: {}", self.info.name, e);
        }
        if let Some(line) = state.profile.laser_enable_line {
            if let Err(e) = state.board.get()?.set_digital_line(line, false) {
                warn!("Failed to turn lasers off: {}", e);
            }
        }

        if state.board.release()? {
            info!("Illumination {} shut down", self.info.name);
            publish_event(
                &self.bus,
                &self.info,
                DeviceEvent::Stopped {
                    device_id: self.info.id.clone(),
                },
            );
        }
        Ok(())
    }
}

impl<B: DaqBoard> Debug for IlluminationControl<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IlluminationControl")
            .field("info", &self.info)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Probe, SimulatedDaq};

    fn config() -> IlluminationConfig {
        IlluminationConfig {
            command_poll_ms: 5,
            ..IlluminationConfig::default()
        }
    }

    fn qstate(probe: &Probe) -> IlluminationControl<SimulatedDaq> {
        let board = SimulatedDaq::new(probe.clone(), "PCIe-6343");
        IlluminationControl::new(
            "illumination",
            board,
            ShutterProfile::qstate(),
            &config(),
            SharedEventBus::new(),
        )
        .unwrap()
    }

    fn prism2(probe: &Probe) -> IlluminationControl<SimulatedDaq> {
        let board = SimulatedDaq::new(probe.clone(), "PCI-6722");
        IlluminationControl::new(
            "illumination",
            board,
            ShutterProfile::prism2(),
            &config(),
            SharedEventBus::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_construction_enables_lasers_and_sets_default_lines() {
        let probe = Probe::new();
        let _illumination = qstate(&probe);
        assert_eq!(
            probe.calls(),
            vec![
                "set_digital_line 6 true",
                "set_analog_line 3 5.000",
                "set_digital_line 12 true",
            ]
        );
    }

    #[test]
    fn test_prepare_zeroes_analog_lines() {
        let probe = Probe::new();
        let illumination = prism2(&probe);
        probe.clear();

        illumination.prepare().unwrap();
        assert_eq!(probe.count("set_analog_line"), 7);
        assert!(probe.calls().iter().all(|c| c.ends_with(" 0.000")));
    }

    #[test]
    fn test_setup_requires_cleanup() {
        let probe = Probe::new();
        let illumination = qstate(&probe);
        let waveform = ShutterWaveform::all_on(2, 4).unwrap();

        illumination.setup(0.1, &waveform).unwrap();
        assert!(matches!(
            illumination.setup(0.1, &waveform),
            Err(DeviceError::Sequence(_))
        ));

        illumination.cleanup().unwrap();
        assert_eq!(probe.count("clear_task"), 3);
        illumination.setup(0.1, &waveform).unwrap();
    }

    #[test]
    fn test_setup_builds_waveform_tasks() {
        let probe = Probe::new();
        let illumination = prism2(&probe);
        let waveform = ShutterWaveform::all_on(8, 3).unwrap();

        illumination.setup(0.1, &waveform).unwrap();
        let tasks = probe.created_tasks();
        assert_eq!(tasks.len(), 2);
        match &tasks[0] {
            TaskSpec::AnalogWaveform {
                lines,
                samples,
                rate,
                clock,
            } => {
                assert_eq!(lines, &(1..=7).collect::<Vec<u32>>());
                assert_eq!(samples[0].len(), 300);
                assert!((rate - 1001.0).abs() < 1e-9);
                assert!(clock.is_none());
            }
            other => panic!("expected an analog task, got {:?}", other),
        }
        match &tasks[1] {
            TaskSpec::Counter {
                samples, trigger, ..
            } => {
                assert_eq!(*samples, 300);
                assert_eq!(*trigger, 0);
            }
            other => panic!("expected a counter task, got {:?}", other),
        }
    }

    #[test]
    fn test_setup_rejects_mismatched_waveforms() {
        let illumination = qstate(&Probe::new());
        let waveform = ShutterWaveform::all_on(3, 2).unwrap();
        assert!(matches!(
            illumination.setup(0.1, &waveform),
            Err(DeviceError::InvalidParameter(_))
        ));
        let waveform = ShutterWaveform::all_on(2, 2).unwrap();
        assert!(matches!(
            illumination.setup(0.0, &waveform),
            Err(DeviceError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_film_start_and_stop_order() {
        let probe = Probe::new();
        let illumination = qstate(&probe);
        assert!(matches!(
            illumination.start_film(),
            Err(DeviceError::Sequence(_))
        ));

        let waveform = ShutterWaveform::new(vec![vec![false, false], vec![true, false]]).unwrap();
        illumination.setup(0.05, &waveform).unwrap();
        probe.clear();

        illumination.start_film().unwrap();
        illumination.stop_film().unwrap();
        assert_eq!(
            probe.calls(),
            vec![
                "start_task analog",
                "start_task digital",
                "start_task counter",
                "stop_task counter",
                "stop_task digital",
                "stop_task analog",
                "clear_task counter",
                "clear_task digital",
                "clear_task analog",
                "set_analog_line 3 5.000",
                "set_digital_line 12 true",
            ]
        );

        // tasks are gone, so a new setup is allowed
        illumination.setup(0.05, &waveform).unwrap();
    }

    #[test]
    fn test_failed_film_start_can_still_be_stopped() {
        let probe = Probe::new();
        let illumination = qstate(&probe);
        let waveform = ShutterWaveform::all_on(2, 2).unwrap();
        probe.fail_on("start_task");

        illumination.setup(0.1, &waveform).unwrap();
        assert!(matches!(
            illumination.start_film(),
            Err(DeviceError::Hardware(_))
        ));
        illumination.stop_film().unwrap();
        assert_eq!(probe.count("clear_task"), 3);

        probe.recover("start_task");
        illumination.setup(0.1, &waveform).unwrap();
        illumination.start_film().unwrap();
    }

    #[test_log::test]
    fn test_queued_power_commands() {
        let probe = Probe::new();
        let illumination = qstate(&probe);
        illumination.start().unwrap();
        probe.clear();

        illumination.set_power(1, 0.5).unwrap();
        illumination.set_on_off(1, false).unwrap();
        illumination.sync().unwrap();

        assert_eq!(
            illumination.channel_state(1).unwrap(),
            ChannelState {
                power: 0.5,
                on: false
            }
        );
        assert_eq!(
            probe.calls(),
            vec![
                "set_analog_line 3 2.500",
                "set_digital_line 12 true",
                "set_analog_line 3 0.000",
                "set_digital_line 12 false",
            ]
        );
        illumination.shut_down().unwrap();
    }

    #[test]
    fn test_film_mode_leaves_lines_alone() {
        let probe = Probe::new();
        let illumination = qstate(&probe);
        illumination.start().unwrap();
        illumination.auto_control().unwrap();
        probe.clear();

        illumination.set_power(1, 0.2).unwrap();
        illumination.sync().unwrap();
        assert!(probe.calls().is_empty());
        assert_eq!(illumination.channel_state(1).unwrap().power, 0.2);

        illumination.manual_control().unwrap();
        assert!(!illumination.is_film_mode().unwrap());
        assert_eq!(probe.count("set_analog_line 3 1.000"), 1);
    }

    #[test]
    fn test_command_validation() {
        let illumination = qstate(&Probe::new());
        assert!(matches!(
            illumination.set_power(9, 0.5),
            Err(DeviceError::InvalidParameter(_))
        ));
        assert!(matches!(
            illumination.set_power(1, 1.5),
            Err(DeviceError::InvalidParameter(_))
        ));
        assert!(matches!(illumination.sync(), Err(DeviceError::Sequence(_))));
    }

    #[test]
    fn test_shut_down_turns_lasers_off_once() {
        let probe = Probe::new();
        let illumination = qstate(&probe);
        illumination.start().unwrap();
        let waveform = ShutterWaveform::all_on(2, 2).unwrap();
        illumination.setup(0.1, &waveform).unwrap();
        illumination.start_film().unwrap();

        illumination.shut_down().unwrap();
        illumination.shut_down().unwrap();
        assert!(!illumination.is_running());
        assert_eq!(probe.count("stop_task"), 3);
        assert_eq!(probe.count("set_digital_line 6 false"), 1);
        assert_eq!(probe.count("shut_down"), 1);
        assert_eq!(probe.calls().last().map(String::as_str), Some("shut_down"));

        assert!(matches!(
            illumination.set_power(1, 0.5),
            Err(DeviceError::Released(_))
        ));
    }

    #[test]
    fn test_from_config_overrides_board() {
        let probe = Probe::new();
        let config = IlluminationConfig {
            board: "Dev1".to_string(),
            profile: "prism2".to_string(),
            ..config()
        };
        let board = SimulatedDaq::new(probe, "Dev1");
        let illumination =
            IlluminationControl::from_config("illumination", board, &config, SharedEventBus::new())
                .unwrap();
        assert_eq!(illumination.info().model.as_deref(), Some("Dev1"));
        assert_eq!(illumination.profile().unwrap().oversampling, 100);
    }
}
