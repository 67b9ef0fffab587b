/*!
XY stage adapter.

A device thread polls the controller and publishes [`StageMoved`] when the
reported position changes. Move commands go straight to the SDK under the
adapter lock.
*/

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use scopectl_core::{
    config::StageConfig,
    event::{EventReceiver, SharedEventBus, Signal},
    logging::{command_span, device_span},
    types::{Id, Position, Velocity},
    worker::{Tick, Worker},
};

use super::sdk::StageSdk;
use crate::device::{
    lock, publish_error, publish_event, Adapter, DeviceError, DeviceEvent, DeviceInfo,
    DeviceKind, HardwareHandle, Result, WorkerSlot,
};

/// Published when a poll finds the stage somewhere new
#[derive(Debug, Clone, PartialEq)]
pub struct StageMoved {
    /// The adapter ID
    pub device_id: Id,
    /// The polled position
    pub position: Position,
}

struct StageState<S: StageSdk> {
    sdk: HardwareHandle<S>,
    position: Position,
    last_polled: Option<Position>,
    velocity: Velocity,
    locked_out: bool,
}

/// XY stage adapter
pub struct StageControl<S: StageSdk> {
    info: DeviceInfo,
    online: bool,
    poll_interval: Duration,
    bus: SharedEventBus,
    moved: Signal<StageMoved>,
    state: Arc<Mutex<StageState<S>>>,
    worker: WorkerSlot,
}

impl<S: StageSdk> StageControl<S> {
    /// Wrap an opened stage controller
    ///
    /// A connected stage is queried once for its starting position.
    pub fn new<N: Into<String>>(
        name: N,
        mut sdk: S,
        config: &StageConfig,
        bus: SharedEventBus,
    ) -> Result<Self> {
        let info = DeviceInfo::new(name, DeviceKind::Stage).with_model(config.port.as_str());
        let online = sdk.status();
        let position = if online {
            sdk.position()?
        } else {
            warn!("Stage {} on {} is not connected", info.name, config.port);
            Position::default()
        };

        Ok(Self {
            moved: bus.signal(),
            state: Arc::new(Mutex::new(StageState {
                sdk: HardwareHandle::new(info.name.as_str(), sdk),
                position,
                last_polled: None,
                velocity: Velocity::default(),
                locked_out: false,
            })),
            info,
            online,
            poll_interval: config.poll_interval(),
            bus,
            worker: WorkerSlot::default(),
        })
    }

    /// Whether the controller answered at construction
    pub fn get_status(&self) -> bool {
        self.online
    }

    /// Move to an absolute XY position
    pub fn go_absolute(&self, x: f64, y: f64) -> Result<()> {
        let _span = command_span("go_absolute", &self.info.name).entered();
        let mut state = lock(&self.state, &self.info.name)?;
        state.sdk.get()?.go_absolute(x, y)?;
        state.position.x = x;
        state.position.y = y;
        debug!("Moving to ({:.3}, {:.3})", x, y);
        Ok(())
    }

    /// Move by an XY offset
    pub fn go_relative(&self, dx: f64, dy: f64) -> Result<()> {
        let _span = command_span("go_relative", &self.info.name).entered();
        let mut state = lock(&self.state, &self.info.name)?;
        state.sdk.get()?.go_relative(dx, dy)?;
        state.position = state.position.offset(dx, dy);
        Ok(())
    }

    /// Set the maximum XY speed
    pub fn set_velocity(&self, vx: f64, vy: f64) -> Result<()> {
        let _span = command_span("set_velocity", &self.info.name).entered();
        let mut state = lock(&self.state, &self.info.name)?;
        state.sdk.get()?.set_velocity(vx, vy)?;
        state.velocity = Velocity::new(vx, vy);
        Ok(())
    }

    /// Lock the joystick out, or give it back
    pub fn lockout(&self, flag: bool) -> Result<()> {
        let _span = command_span("lockout", &self.info.name).entered();
        let mut state = lock(&self.state, &self.info.name)?;
        state.sdk.get()?.joystick_on_off(!flag)?;
        state.locked_out = flag;
        Ok(())
    }

    /// Make the current XY position the origin
    pub fn zero(&self) -> Result<()> {
        let _span = command_span("zero", &self.info.name).entered();
        let mut state = lock(&self.state, &self.info.name)?;
        state.sdk.get()?.zero()?;
        state.position.x = 0.0;
        state.position.y = 0.0;
        Ok(())
    }

    /// Last known position
    pub fn position(&self) -> Result<Position> {
        Ok(lock(&self.state, &self.info.name)?.position)
    }

    /// Last velocity set
    pub fn velocity(&self) -> Result<Velocity> {
        Ok(lock(&self.state, &self.info.name)?.velocity)
    }

    /// Whether the joystick is locked out
    pub fn is_locked_out(&self) -> Result<bool> {
        Ok(lock(&self.state, &self.info.name)?.locked_out)
    }

    /// Receive [`StageMoved`] events
    pub fn subscribe_moved(&self) -> Result<EventReceiver<StageMoved>> {
        Ok(self.moved.subscribe()?)
    }

    fn refresh(state: &Mutex<StageState<S>>, name: &str) -> Result<Option<Position>> {
        let mut state = lock(state, name)?;
        let polled = state.sdk.get()?.position()?;
        state.position = polled;
        if state.last_polled == Some(polled) {
            return Ok(None);
        }
        state.last_polled = Some(polled);
        Ok(Some(polled))
    }
}

impl<S: StageSdk> Adapter for StageControl<S> {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&self) -> Result<()> {
        if !self.online {
            warn!("Stage {} is not connected, not polling", self.info.name);
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let info = self.info.clone();
        let bus = self.bus.clone();
        let moved = self.moved.clone();
        let tick = move || match Self::refresh(&state, &info.name) {
            Ok(Some(position)) => {
                moved.emit(StageMoved {
                    device_id: info.id.clone(),
                    position,
                });
                Tick::Continue
            }
            Ok(None) => Tick::Continue,
            Err(e @ (DeviceError::Released(_) | DeviceError::LockPoisoned(_))) => {
                publish_error(&bus, &info, &e);
                Tick::Exit
            }
            Err(e) => {
                publish_error(&bus, &info, &e);
                Tick::Continue
            }
        };

        self.worker.start(&self.info, || {
            Worker::poll(
                &self.info.name,
                device_span(DeviceKind::Stage.as_str(), &self.info.name),
                self.poll_interval,
                tick,
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
        let released = lock(&self.state, &self.info.name)?.sdk.release()?;
        if released {
            info!("Stage {} shut down", self.info.name);
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

impl<S: StageSdk> Debug for StageControl<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageControl")
            .field("info", &self.info)
            .field("online", &self.online)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Probe, SimulatedStage};
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    fn fast_config() -> StageConfig {
        StageConfig {
            poll_interval_ms: 5,
            ..StageConfig::default()
        }
    }

    fn stage(probe: &Probe) -> StageControl<SimulatedStage> {
        let sdk = SimulatedStage::new(probe.clone()).at(Position::new(0.0, 0.0, 7.5));
        StageControl::new("stage", sdk, &fast_config(), SharedEventBus::new()).unwrap()
    }

    #[test_log::test]
    fn test_go_absolute_then_position() {
        let probe = Probe::new();
        let stage = stage(&probe);
        stage.start().unwrap();

        stage.go_absolute(10.0, 20.0).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(stage.position().unwrap().as_array(), [10.0, 20.0, 7.5]);
        stage.shut_down().unwrap();
    }

    #[test]
    fn test_relative_moves_and_zero() {
        let probe = Probe::new();
        let stage = stage(&probe);

        stage.go_absolute(1.0, 1.0).unwrap();
        stage.go_relative(2.0, -3.0).unwrap();
        assert_eq!(stage.position().unwrap(), Position::new(3.0, -2.0, 7.5));

        stage.zero().unwrap();
        assert_eq!(stage.position().unwrap(), Position::new(0.0, 0.0, 7.5));

        stage.set_velocity(5.0, 6.0).unwrap();
        assert_eq!(stage.velocity().unwrap(), Velocity::new(5.0, 6.0));
    }

    #[test]
    fn test_lockout_disables_joystick() {
        let probe = Probe::new();
        let stage = stage(&probe);

        stage.lockout(true).unwrap();
        assert!(stage.is_locked_out().unwrap());
        stage.lockout(false).unwrap();
        assert!(!stage.is_locked_out().unwrap());
        assert_eq!(
            probe.calls(),
            vec!["joystick_on_off false", "joystick_on_off true"]
        );
    }

    #[test]
    fn test_failed_command_leaves_state_alone() {
        let probe = Probe::new();
        let stage = stage(&probe);
        probe.fail_on("go_absolute");

        assert_err!(stage.go_absolute(4.0, 4.0));
        assert_eq!(stage.position().unwrap(), Position::new(0.0, 0.0, 7.5));
    }

    #[test]
    fn test_shut_down_twice_releases_once() {
        let probe = Probe::new();
        let stage = stage(&probe);
        stage.start().unwrap();
        assert!(stage.is_running());

        assert_ok!(stage.shut_down());
        assert_ok!(stage.shut_down());
        assert!(!stage.is_running());
        assert_eq!(probe.count("shut_down"), 1);

        assert!(matches!(
            stage.go_absolute(1.0, 1.0),
            Err(DeviceError::Released(_))
        ));
        assert!(matches!(stage.start(), Err(DeviceError::Released(_))));
    }

    #[test]
    fn test_start_twice() {
        let stage = stage(&Probe::new());
        stage.start().unwrap();
        assert!(matches!(stage.start(), Err(DeviceError::AlreadyStarted(_))));
    }

    #[test]
    fn test_offline_stage_never_polls() {
        let probe = Probe::new();
        let sdk = SimulatedStage::offline(probe.clone());
        let stage =
            StageControl::new("stage", sdk, &fast_config(), SharedEventBus::new()).unwrap();

        assert!(!stage.get_status());
        stage.start().unwrap();
        assert!(!stage.is_running());
        stage.shut_down().unwrap();
        assert_eq!(probe.count("shut_down"), 1);
    }

    #[test]
    fn test_poll_failures_are_reported_and_polling_continues() {
        let probe = Probe::new();
        let bus = SharedEventBus::new();
        let mut errors = bus.subscribe::<DeviceEvent>().unwrap();
        let sdk = SimulatedStage::new(probe.clone());
        let stage = StageControl::new("stage", sdk, &fast_config(), bus).unwrap();

        probe.fail_on("position");
        stage.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(stage.is_running());

        let mut saw_error = false;
        while let Ok(event) = errors.try_recv() {
            if matches!(event, DeviceEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn test_lifecycle_events_are_published() {
        let bus = SharedEventBus::new();
        let mut events = bus.subscribe::<DeviceEvent>().unwrap();
        let sdk = SimulatedStage::new(Probe::new());
        let stage = StageControl::new("stage", sdk, &fast_config(), bus).unwrap();
        let device_id = stage.id().clone();

        stage.start().unwrap();
        stage.shut_down().unwrap();
        stage.shut_down().unwrap();

        assert_eq!(
            events.try_recv().ok(),
            Some(DeviceEvent::Started {
                device_id: device_id.clone()
            })
        );
        assert_eq!(
            events.try_recv().ok(),
            Some(DeviceEvent::Stopped { device_id })
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_moved_events() {
        let stage = stage(&Probe::new());
        let mut moved = stage.subscribe_moved().unwrap();
        stage.start().unwrap();
        stage.go_absolute(3.0, 4.0).unwrap();

        let target = Position::new(3.0, 4.0, 7.5);
        let result = timeout(Duration::from_secs(2), async {
            loop {
                let event = moved.recv().await.unwrap();
                if event.position == target {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result.device_id, stage.id().clone());
    }
}
