/*!
Camera adapter.

The device thread owns the acquisition loop. Each cycle it reconciles the
hardware with the acquisition latch, drains frames, publishes [`NewData`]
and raises [`ReachedMaxFrames`] once per session for fixed-length films.
Frames are recorded only after listeners have seen them.
*/

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use scopectl_core::{
    config::CameraConfig,
    event::{EventReceiver, SharedEventBus, Signal},
    latch::Latch,
    logging::{command_span, device_span},
    signal::SingleShot,
    worker::{Tick, Worker},
};

use super::sdk::{CameraSdk, FilmRecorder};
use super::types::{
    AcquisitionMode, AcquisitionTimings, FilmParameters, Frame, NewData, ReachedMaxFrames,
    SessionKey, Temperature,
};
use crate::device::{
    lock, publish_error, publish_event, Adapter, DeviceError, DeviceEvent, DeviceInfo,
    DeviceKind, HardwareHandle, Result, WorkerSlot,
};

struct CameraState<C: CameraSdk> {
    sdk: HardwareHandle<C>,
    acquire: Latch,
    /// Mode the hardware is acquiring in, if it is
    running_mode: Option<AcquisitionMode>,
    /// Set by `start_camera`; the next cycle starts a fresh acquisition
    restart: bool,
    parameters: FilmParameters,
    acq_mode: AcquisitionMode,
    filming: bool,
    /// Frames since the last `start_camera`
    frame_number: u64,
    /// Frames since the last film settings change
    acquired: u64,
    key: Option<SessionKey>,
    recorder: Option<Box<dyn FilmRecorder>>,
    shutter: bool,
    new_data: Signal<NewData>,
    max_frames: SingleShot<ReachedMaxFrames>,
}

impl<C: CameraSdk> CameraState<C> {
    fn apply_film_settings(&mut self, parameters: FilmParameters, filming: bool) {
        self.acq_mode = if filming {
            parameters.acq_mode
        } else {
            AcquisitionMode::RunTillAbort
        };
        self.parameters = parameters;
        self.filming = filming;
        self.acquired = 0;
    }

    fn stop_hardware(&mut self) -> Result<()> {
        if self.running_mode.take().is_some() {
            self.sdk.get()?.stop_acquisition()?;
        }
        Ok(())
    }

    /// One pass of the acquisition loop
    fn cycle(&mut self) -> Result<()> {
        if self.acquire.am_idle() {
            return self.stop_hardware();
        }

        if self.restart || self.running_mode != Some(self.acq_mode) {
            self.stop_hardware()?;
            self.restart = false;
            let (mode, frames) = (self.acq_mode, self.parameters.frames);
            if let Err(e) = self.sdk.get()?.start_acquisition(mode, frames) {
                self.acquire.stop();
                return Err(e);
            }
            self.running_mode = Some(mode);
            debug!("Acquiring in {} mode", mode);
        }

        let frames = self.sdk.get()?.get_frames()?;
        if frames.is_empty() {
            return Ok(());
        }

        let count = frames.len() as u64;
        self.frame_number += count;
        self.acquired += count;
        let frames = Arc::new(frames);
        self.new_data.emit(NewData {
            frames: Arc::clone(&frames),
            total: self.frame_number,
            key: self.key,
        });

        if self.acq_mode == AcquisitionMode::FixedLength
            && self.frame_number >= self.parameters.frames
            && self.max_frames.emit(ReachedMaxFrames {
                key: self.key,
                frames: self.frame_number,
            })
        {
            info!("Reached {} frames", self.frame_number);
        }

        self.record(&frames)
    }

    /// Save a batch to the film, if one is being recorded
    ///
    /// Every frame is offered to the recorder; the first failure is returned.
    fn record(&mut self, frames: &[Frame]) -> Result<()> {
        let recorder = match self.recorder.as_mut() {
            Some(recorder) if self.filming => recorder,
            _ => return Ok(()),
        };
        let mut failure = None;
        for frame in frames {
            if let Err(e) = recorder.save_frame(frame) {
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

/// Camera adapter
///
/// Commands only change shared state; the device thread turns the
/// acquisition latch into hardware start/stop calls on its next cycle.
pub struct CameraControl<C: CameraSdk> {
    info: DeviceInfo,
    poll_interval: Duration,
    bus: SharedEventBus,
    state: Arc<Mutex<CameraState<C>>>,
    worker: WorkerSlot,
}

impl<C: CameraSdk> CameraControl<C> {
    /// Initialize the camera and apply `parameters`
    pub fn new<N: Into<String>>(
        name: N,
        mut sdk: C,
        parameters: FilmParameters,
        config: &CameraConfig,
        bus: SharedEventBus,
    ) -> Result<Self> {
        let mut info = DeviceInfo::new(name, DeviceKind::Camera);
        sdk.init_camera()?;
        sdk.new_parameters(&parameters)?;
        if let Some(model) = sdk.model() {
            info = info.with_model(model);
        }

        let state = CameraState {
            sdk: HardwareHandle::new(info.name.as_str(), sdk),
            acquire: Latch::Idle,
            running_mode: None,
            restart: false,
            parameters,
            acq_mode: AcquisitionMode::RunTillAbort,
            filming: false,
            frame_number: 0,
            acquired: 0,
            key: None,
            recorder: None,
            shutter: false,
            new_data: bus.signal(),
            max_frames: SingleShot::new(bus.signal()),
        };

        Ok(Self {
            info,
            poll_interval: config.poll_interval(),
            bus,
            state: Arc::new(Mutex::new(state)),
            worker: WorkerSlot::default(),
        })
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, CameraState<C>>> {
        lock(&self.state, &self.info.name)
    }

    /// Begin a camera session
    ///
    /// Resets the frame count, re-arms the max frames notification and
    /// restarts hardware acquisition on the next cycle.
    pub fn start_camera(&self, key: SessionKey) -> Result<()> {
        let _span = command_span("start_camera", &self.info.name).entered();
        let mut state = self.state()?;
        state.frame_number = 0;
        state.key = Some(key);
        state.max_frames.reset();
        state.restart = true;
        state.acquire.go();
        debug!("Camera session {} started", key);
        Ok(())
    }

    /// End the camera session
    pub fn stop_camera(&self) -> Result<()> {
        let _span = command_span("stop_camera", &self.info.name).entered();
        self.state()?.acquire.stop();
        Ok(())
    }

    /// Take new film settings
    ///
    /// Outside a film the camera always free-runs.
    pub fn new_film_settings(&self, parameters: FilmParameters, filming: bool) -> Result<()> {
        let _span = command_span("new_film_settings", &self.info.name).entered();
        self.state()?.apply_film_settings(parameters, filming);
        Ok(())
    }

    /// Reconfigure the camera
    pub fn new_parameters(&self, parameters: FilmParameters) -> Result<()> {
        let _span = command_span("new_parameters", &self.info.name).entered();
        let mut state = self.state()?;
        state.sdk.get()?.new_parameters(&parameters)?;
        let filming = state.filming;
        state.apply_film_settings(parameters, filming);
        Ok(())
    }

    /// Enter film mode, recording frames into `recorder` when given
    pub fn start_film(&self, recorder: Option<Box<dyn FilmRecorder>>) -> Result<()> {
        let _span = command_span("start_film", &self.info.name).entered();
        let mut state = self.state()?;
        state.recorder = recorder;
        let parameters = state.parameters.clone();
        state.apply_film_settings(parameters, true);
        Ok(())
    }

    /// Leave film mode and close the recorder
    pub fn stop_film(&self) -> Result<()> {
        let _span = command_span("stop_film", &self.info.name).entered();
        let mut state = self.state()?;
        let parameters = state.parameters.clone();
        state.apply_film_settings(parameters, false);
        if let Some(mut recorder) = state.recorder.take() {
            recorder.close()?;
        }
        Ok(())
    }

    /// Bytes recorded so far, 0 when nothing is being recorded
    pub fn get_film_size(&self) -> Result<u64> {
        Ok(self
            .state()?
            .recorder
            .as_ref()
            .map_or(0, |recorder| recorder.total_film_size()))
    }

    /// Sensor temperature
    pub fn get_temperature(&self) -> Result<Temperature> {
        self.state()?.sdk.get_ref()?.temperature()
    }

    /// Set the EMCCD gain
    pub fn set_emccd_gain(&self, gain: u32) -> Result<()> {
        let _span = command_span("set_emccd_gain", &self.info.name).entered();
        self.state()?.sdk.get()?.set_emccd_gain(gain)
    }

    /// Exposure, accumulate and kinetic cycle times
    pub fn acquisition_timings(&self) -> Result<AcquisitionTimings> {
        self.state()?.sdk.get_ref()?.acquisition_timings()
    }

    fn set_shutter(&self, open: bool) -> Result<()> {
        let mut state = self.state()?;
        state.sdk.get()?.set_shutter(open)?;
        state.shutter = open;
        Ok(())
    }

    /// Open the shutter
    pub fn open_shutter(&self) -> Result<()> {
        self.set_shutter(true)
    }

    /// Close the shutter
    pub fn close_shutter(&self) -> Result<()> {
        self.set_shutter(false)
    }

    /// Flip the shutter, returning whether it is now open
    pub fn toggle_shutter(&self) -> Result<bool> {
        let mut state = self.state()?;
        let open = !state.shutter;
        state.sdk.get()?.set_shutter(open)?;
        state.shutter = open;
        Ok(open)
    }

    /// Whether the shutter is open
    pub fn shutter_open(&self) -> Result<bool> {
        Ok(self.state()?.shutter)
    }

    /// Frames since the last `start_camera`
    pub fn frame_number(&self) -> Result<u64> {
        Ok(self.state()?.frame_number)
    }

    /// Frames since the last film settings change
    pub fn acquired(&self) -> Result<u64> {
        Ok(self.state()?.acquired)
    }

    /// Key of the current session
    pub fn key(&self) -> Result<Option<SessionKey>> {
        Ok(self.state()?.key)
    }

    /// Whether a film is being taken
    pub fn is_filming(&self) -> Result<bool> {
        Ok(self.state()?.filming)
    }

    /// Mode the next acquisition runs in
    pub fn acquisition_mode(&self) -> Result<AcquisitionMode> {
        Ok(self.state()?.acq_mode)
    }

    /// Whether a camera session is active
    pub fn is_acquiring(&self) -> Result<bool> {
        Ok(self.state()?.acquire.am_active())
    }

    /// Current parameters
    pub fn parameters(&self) -> Result<FilmParameters> {
        Ok(self.state()?.parameters.clone())
    }

    /// Receive [`NewData`] batches
    pub fn subscribe_new_data(&self) -> Result<EventReceiver<NewData>> {
        Ok(self.state()?.new_data.subscribe()?)
    }

    /// Receive [`ReachedMaxFrames`] notifications
    pub fn subscribe_max_frames(&self) -> Result<EventReceiver<ReachedMaxFrames>> {
        Ok(self.state()?.max_frames.signal().subscribe()?)
    }

    /// Stop the device thread and close the camera
    pub fn quit(&self) -> Result<()> {
        self.shut_down()
    }
}

impl<C: CameraSdk> Adapter for CameraControl<C> {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        let info = self.info.clone();
        let bus = self.bus.clone();
        let tick = move || {
            let result = lock(&state, &info.name).and_then(|mut state| state.cycle());
            match result {
                Ok(()) => Tick::Continue,
                Err(e @ (DeviceError::Released(_) | DeviceError::LockPoisoned(_))) => {
                    publish_error(&bus, &info, &e);
                    Tick::Exit
                }
                Err(e) => {
                    publish_error(&bus, &info, &e);
                    Tick::Continue
                }
            }
        };

        self.worker.start(&self.info, || {
            Worker::poll(
                &self.info.name,
                device_span(DeviceKind::Camera.as_str(), &self.info.name),
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

        let mut state = self.state()?;
        state.acquire.stop();
        if state.sdk.is_held() {
            if let Err(e) = state.stop_hardware() {
                warn!("Camera {} did not stop cleanly: {}", self.info.name, e);
            }
        }
        if let Some(mut recorder) = state.recorder.take() {
            if let Err(e) = recorder.close() {
                warn!("Failed to close film: {}", e);
            }
        }

        if state.sdk.release()? {
            info!("Camera {} shut down", self.info.name);
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

impl<C: CameraSdk> Debug for CameraControl<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraControl")
            .field("info", &self.info)
            .field("running", &self.is_running())
            .finish()
    }
}
