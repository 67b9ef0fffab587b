/*!
 * scopectl Devices
 *
 * Thread-based adapters for the camera, illumination and XY stage of a
 * microscope. Each adapter owns its vendor SDK handle, runs one device
 * thread and exposes a small blocking command surface to the controlling
 * thread.
 */

#![warn(missing_docs)]

// Re-export core types
pub use scopectl_core::prelude;

pub mod camera;
pub mod device;
pub mod illumination;
pub mod registry;
pub mod simulated;
pub mod stage;

pub use camera::CameraControl;
pub use device::{
    Adapter, DeviceError, DeviceEvent, DeviceInfo, DeviceKind, Hardware, HardwareHandle,
};
pub use illumination::IlluminationControl;
pub use registry::{AdapterRegistry, RegistryEvent};
pub use stage::StageControl;

/// scopectl devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device layer
pub fn init() -> Result<(), scopectl_core::error::Error> {
    tracing::info!("scopectl devices {} initialized", VERSION);
    Ok(())
}
