use std::time::Duration;

use anyhow::Result;
use scopectl_core::config::ConfigBuilder;
use scopectl_core::event::SharedEventBus;
use scopectl_devices::camera::{AcquisitionMode, FilmParameters};
use scopectl_devices::illumination::ShutterWaveform;
use scopectl_devices::simulated::{Probe, SimulatedCamera, SimulatedDaq, SimulatedStage};
use scopectl_devices::{
    Adapter, AdapterRegistry, CameraControl, IlluminationControl, StageControl,
};

use tokio::time::{sleep, timeout};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = ConfigBuilder::new()
        .with_environment_prefix("SCOPECTL")
        .build()?;
    config.stage.poll_interval_ms = 50;
    let bus = SharedEventBus::new();
    let probe = Probe::new();

    // Create the adapters over simulated hardware
    let registry = AdapterRegistry::new();
    let parameters = FilmParameters {
        frames: 20,
        acq_mode: AcquisitionMode::FixedLength,
        ..FilmParameters::default()
    };
    let camera = registry.register(CameraControl::new(
        "camera",
        SimulatedCamera::new(probe.clone()).with_frames_per_poll(2),
        parameters.clone(),
        &config.camera,
        bus.clone(),
    )?)?;
    let illumination = registry.register(IlluminationControl::from_config(
        "illumination",
        SimulatedDaq::new(probe.clone(), "PCIe-6343"),
        &config.illumination,
        bus.clone(),
    )?)?;
    let stage = registry.register(StageControl::new(
        "stage",
        SimulatedStage::new(probe.clone()),
        &config.stage,
        bus.clone(),
    )?)?;

    registry.start_all()?;

    // Move to the field of view
    stage.lockout(true)?;
    stage.go_absolute(120.0, -45.5)?;
    sleep(Duration::from_millis(150)).await;
    info!("Stage at {}", stage.position()?);

    // Set the lasers up
    illumination.set_power(1, 0.8)?;
    illumination.sync()?;

    // Take a fixed-length film
    let mut max_frames = camera.subscribe_max_frames()?;
    let timings = camera.acquisition_timings()?;
    illumination.prepare()?;
    illumination.setup(timings.kinetic, &ShutterWaveform::new(vec![vec![false], vec![true]])?)?;
    illumination.auto_control()?;
    camera.new_film_settings(parameters, true)?;
    camera.start_film(None)?;
    illumination.start_film()?;
    camera.start_camera(1)?;

    let reached = timeout(Duration::from_secs(5), max_frames.recv()).await??;
    info!("Film finished after {} frames", reached.frames);

    camera.stop_camera()?;
    camera.stop_film()?;
    illumination.stop_film()?;
    illumination.manual_control()?;
    stage.lockout(false)?;

    for id in registry.ids()? {
        let adapter = registry.get(&id)?;
        info!("{} ({}) running: {}", adapter.name(), adapter.kind(), adapter.is_running());
    }

    registry.shut_down_all()?;
    info!("{} hardware calls made", probe.calls().len());
    Ok(())
}
