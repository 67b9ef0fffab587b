/*!
 * Device adapter abstractions.
 *
 * An adapter is the triple of one device thread, one lock-protected shared
 * state and a small command surface. This module holds the pieces every
 * adapter shares: the error type, the owning hardware handle and the
 * [`Adapter`] trait the registry works with.
 */
use std::fmt::{self, Debug};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use scopectl_core::{
    error::Error as CoreError,
    event::SharedEventBus,
    types::Id,
    worker::Worker,
};

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// `start` was called on an adapter whose thread already ran
    #[error("Already started: {0}")]
    AlreadyStarted(String),

    /// The hardware handle was released by a shutdown
    #[error("Hardware handle released: {0}")]
    Released(String),

    /// An operation was issued out of order (setup before cleanup, ...)
    #[error("Sequencing error: {0}")]
    Sequence(String),

    /// A parameter was rejected before reaching the hardware
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The vendor SDK reported a failure
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// A device thread panicked while holding the adapter lock
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// The device thread is gone and no longer takes commands
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// No adapter registered under the ID
    #[error("Adapter not found: {0}")]
    NotFound(String),

    /// An adapter with the same ID is already registered
    #[error("Adapter already registered: {0}")]
    Duplicate(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Lock an adapter's shared state
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| DeviceError::LockPoisoned(format!("{} state", what)))
}

/// A vendor SDK handle
///
/// Implemented by every hardware seam; `shut_down` closes the session and is
/// called exactly once, by [`HardwareHandle`].
pub trait Hardware: Send + 'static {
    /// Close the hardware session
    fn shut_down(&mut self) -> Result<()>;
}

/// Exclusive owner of one hardware handle
///
/// Once released every access fails with [`DeviceError::Released`]; the
/// handle is shut down on drop if nobody released it first.
pub struct HardwareHandle<H: Hardware> {
    name: String,
    inner: Option<H>,
}

impl<H: Hardware> HardwareHandle<H> {
    /// Take ownership of `hardware`
    pub fn new<S: Into<String>>(name: S, hardware: H) -> Self {
        Self {
            name: name.into(),
            inner: Some(hardware),
        }
    }

    /// Mutable access to the hardware
    pub fn get(&mut self) -> Result<&mut H> {
        self.inner
            .as_mut()
            .ok_or_else(|| DeviceError::Released(self.name.clone()))
    }

    /// Shared access to the hardware
    pub fn get_ref(&self) -> Result<&H> {
        self.inner
            .as_ref()
            .ok_or_else(|| DeviceError::Released(self.name.clone()))
    }

    /// Whether the hardware is still held
    pub fn is_held(&self) -> bool {
        self.inner.is_some()
    }

    /// Shut the hardware down
    ///
    /// Returns `Ok(false)` when it was already released. A failing
    /// `shut_down` still gives the handle up.
    pub fn release(&mut self) -> Result<bool> {
        let Some(mut hardware) = self.inner.take() else {
            return Ok(false);
        };
        hardware.shut_down()?;
        info!("Released hardware {}", self.name);
        Ok(true)
    }
}

impl<H: Hardware> Drop for HardwareHandle<H> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("Failed to release hardware {}: {}", self.name, e);
        }
    }
}

impl<H: Hardware> Debug for HardwareHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareHandle")
            .field("name", &self.name)
            .field("held", &self.is_held())
            .finish()
    }
}

/// Kind of device behind an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Frame-producing camera
    Camera,
    /// Lasers, AOTF and shutters on a DAQ board
    Illumination,
    /// Motorized XY stage
    Stage,
}

impl DeviceKind {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Illumination => "illumination",
            DeviceKind::Stage => "stage",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// The adapter ID
    pub id: Id,
    /// The adapter name, also used as the thread name
    pub name: String,
    /// The device kind
    pub kind: DeviceKind,
    /// Vendor model, when the SDK reports one
    pub model: Option<String>,
}

impl DeviceInfo {
    /// Information with a fresh ID
    pub fn new<S: Into<String>>(name: S, kind: DeviceKind) -> Self {
        Self {
            id: Id::new(),
            name: name.into(),
            kind,
            model: None,
        }
    }

    /// Set the model
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Lifecycle and failure events every adapter publishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// The device thread started
    Started {
        /// The adapter ID
        device_id: Id,
    },
    /// The device thread stopped and the hardware was released
    Stopped {
        /// The adapter ID
        device_id: Id,
    },
    /// A hardware call inside the device thread failed
    Error {
        /// The adapter ID
        device_id: Id,
        /// The error message
        message: String,
    },
}

/// Publish a lifecycle event, logging rather than returning a bus failure
pub(crate) fn publish_event(
    bus: &SharedEventBus,
    info: &DeviceInfo,
    event: DeviceEvent,
) -> usize {
    match bus.publish(event) {
        Ok(n) => n,
        Err(e) => {
            warn!(device = %info.name, "Failed to publish device event: {}", e);
            0
        }
    }
}

/// Report a failure from inside a device thread
pub(crate) fn publish_error(bus: &SharedEventBus, info: &DeviceInfo, err: &DeviceError) {
    error!(device = %info.name, "{}", err);
    publish_event(
        bus,
        info,
        DeviceEvent::Error {
            device_id: info.id.clone(),
            message: err.to_string(),
        },
    );
}

/// The interface the registry and the controlling thread share
pub trait Adapter: Send + Sync + Debug {
    /// Get the device information
    fn info(&self) -> &DeviceInfo;

    /// Get the adapter ID
    fn id(&self) -> &Id {
        &self.info().id
    }

    /// Get the adapter name
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Get the device kind
    fn kind(&self) -> DeviceKind {
        self.info().kind
    }

    /// Start the device thread
    fn start(&self) -> Result<()>;

    /// Whether the device thread is running
    fn is_running(&self) -> bool;

    /// Stop the thread, wait for it, then release the hardware
    ///
    /// Safe to call more than once.
    fn shut_down(&self) -> Result<()>;
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Unstarted,
    Running(Worker),
    Finished,
}

/// The one worker an adapter may own over its lifetime
#[derive(Debug, Default)]
pub(crate) struct WorkerSlot(Mutex<SlotState>);

impl WorkerSlot {
    /// Spawn the worker unless one already ran
    pub(crate) fn start<F>(&self, info: &DeviceInfo, spawn: F) -> Result<()>
    where
        F: FnOnce() -> scopectl_core::error::Result<Worker>,
    {
        let mut slot = lock(&self.0, &info.name)?;
        match *slot {
            SlotState::Unstarted => {
                *slot = SlotState::Running(spawn()?);
                Ok(())
            }
            SlotState::Running(_) => Err(DeviceError::AlreadyStarted(info.name.clone())),
            SlotState::Finished => Err(DeviceError::Released(info.name.clone())),
        }
    }

    /// Mark the adapter as finished without ever running a thread
    pub(crate) fn retire(&self, info: &DeviceInfo) -> Result<()> {
        let mut slot = lock(&self.0, &info.name)?;
        if let SlotState::Running(mut worker) = std::mem::replace(&mut *slot, SlotState::Finished) {
            worker.stop()?;
        }
        Ok(())
    }

    /// Whether the worker thread is alive
    pub(crate) fn is_running(&self) -> bool {
        match self.0.lock() {
            Ok(slot) => matches!(&*slot, SlotState::Running(w) if w.is_running()),
            Err(_) => false,
        }
    }

    /// Whether `retire` already ran
    pub(crate) fn is_finished(&self) -> bool {
        match self.0.lock() {
            Ok(slot) => matches!(&*slot, SlotState::Finished),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHardware {
        releases: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Hardware for CountingHardware {
        fn shut_down(&mut self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DeviceError::Hardware("port busy".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn handle(fail: bool) -> (HardwareHandle<CountingHardware>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let hw = CountingHardware {
            releases: releases.clone(),
            fail,
        };
        (HardwareHandle::new("test", hw), releases)
    }

    #[test]
    fn test_release_exactly_once() -> Result<()> {
        let (mut handle, releases) = handle(false);
        assert!(handle.is_held());
        assert!(handle.release()?);
        assert!(!handle.release()?);
        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_access_after_release_fails() -> Result<()> {
        let (mut handle, _) = handle(false);
        handle.release()?;
        assert!(matches!(handle.get(), Err(DeviceError::Released(_))));
        assert!(matches!(handle.get_ref(), Err(DeviceError::Released(_))));
        Ok(())
    }

    #[test]
    fn test_drop_releases_held_handle() {
        let (handle, releases) = handle(false);
        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_release_is_not_retried() {
        let (mut handle, releases) = handle(true);
        assert!(matches!(handle.release(), Err(DeviceError::Hardware(_))));
        assert!(!handle.is_held());
        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_slot_lifecycle() -> Result<()> {
        let info = DeviceInfo::new("slot", DeviceKind::Stage);
        let slot = WorkerSlot::default();
        slot.start(&info, || {
            Worker::spawn("slot", tracing::Span::none(), |stop| {
                while !stop.wait_timeout(std::time::Duration::from_millis(5)) {}
            })
        })?;
        assert!(slot.is_running());
        assert!(matches!(
            slot.start(&info, || unreachable!()),
            Err(DeviceError::AlreadyStarted(_))
        ));

        slot.retire(&info)?;
        assert!(!slot.is_running());
        assert!(slot.is_finished());
        slot.retire(&info)?;
        assert!(matches!(
            slot.start(&info, || unreachable!()),
            Err(DeviceError::Released(_))
        ));
        Ok(())
    }

    #[test]
    fn test_device_kind_names() {
        assert_eq!(DeviceKind::Camera.to_string(), "camera");
        let info = DeviceInfo::new("ludl", DeviceKind::Stage).with_model("MAC 5000");
        assert_eq!(info.model.as_deref(), Some("MAC 5000"));
    }

    #[test]
    fn test_device_events_reach_subscribers() -> Result<()> {
        let bus = SharedEventBus::new();
        let info = DeviceInfo::new("laser", DeviceKind::Illumination);
        let started = DeviceEvent::Started {
            device_id: info.id.clone(),
        };
        assert_eq!(publish_event(&bus, &info, started.clone()), 0);

        let mut events = bus.subscribe::<DeviceEvent>()?;
        assert_eq!(publish_event(&bus, &info, started.clone()), 1);
        publish_error(&bus, &info, &DeviceError::Hardware("no board".to_string()));

        assert_eq!(events.try_recv().ok(), Some(started));
        assert_eq!(
            events.try_recv().ok(),
            Some(DeviceEvent::Error {
                device_id: info.id.clone(),
                message: DeviceError::Hardware("no board".to_string()).to_string(),
            })
        );
        Ok(())
    }
}
