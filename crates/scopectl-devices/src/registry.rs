/*!
 * Adapter registry.
 *
 * Holds every adapter of an instrument in registration order, so the
 * adapters can be started together and shut down in reverse.
 */
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use scopectl_core::types::Id;

use crate::device::{Adapter, DeviceError, DeviceInfo, DeviceKind, Result};

/// Event types for the adapter registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// An adapter was added to the registry
    Added(DeviceInfo),
    /// An adapter was removed from the registry
    Removed(Id),
}

/// Adapter registry
#[derive(Debug)]
pub struct AdapterRegistry {
    /// The registered adapters, oldest first
    adapters: RwLock<Vec<Arc<dyn Adapter>>>,
    /// Event sender for registry events
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            adapters: RwLock::new(Vec::new()),
            event_sender,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Arc<dyn Adapter>>>> {
        self.adapters
            .read()
            .map_err(|_| DeviceError::LockPoisoned("adapter registry".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Arc<dyn Adapter>>>> {
        self.adapters
            .write()
            .map_err(|_| DeviceError::LockPoisoned("adapter registry".to_string()))
    }

    /// Register an adapter, returning a typed handle to it
    pub fn register<A: Adapter + 'static>(&self, adapter: A) -> Result<Arc<A>> {
        let adapter = Arc::new(adapter);
        self.register_shared(adapter.clone())?;
        Ok(adapter)
    }

    /// Register an adapter that is already shared
    pub fn register_shared(&self, adapter: Arc<dyn Adapter>) -> Result<()> {
        let info = adapter.info().clone();
        let mut adapters = self.write()?;

        if adapters.iter().any(|a| a.id() == &info.id) {
            return Err(DeviceError::Duplicate(info.id.to_string()));
        }

        adapters.push(adapter);
        debug!("Registered {} adapter {} ({})", info.kind, info.name, info.id);
        let _ = self.event_sender.send(RegistryEvent::Added(info));

        Ok(())
    }

    /// Remove an adapter without shutting it down
    pub fn unregister(&self, id: &Id) -> Result<Arc<dyn Adapter>> {
        let mut adapters = self.write()?;
        let index = adapters
            .iter()
            .position(|a| a.id() == id)
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;

        let adapter = adapters.remove(index);
        let _ = self.event_sender.send(RegistryEvent::Removed(id.clone()));
        debug!("Unregistered adapter {}", id);

        Ok(adapter)
    }

    /// Get an adapter by ID
    pub fn get(&self, id: &Id) -> Result<Arc<dyn Adapter>> {
        self.read()?
            .iter()
            .find(|a| a.id() == id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))
    }

    /// All adapters in registration order
    pub fn adapters(&self) -> Result<Vec<Arc<dyn Adapter>>> {
        Ok(self.read()?.clone())
    }

    /// All adapter IDs in registration order
    pub fn ids(&self) -> Result<Vec<Id>> {
        Ok(self.read()?.iter().map(|a| a.id().clone()).collect())
    }

    /// Adapters of one kind
    pub fn by_kind(&self, kind: DeviceKind) -> Result<Vec<Arc<dyn Adapter>>> {
        Ok(self
            .read()?
            .iter()
            .filter(|a| a.kind() == kind)
            .cloned()
            .collect())
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.read().map(|adapters| adapters.len()).unwrap_or(0)
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Start every adapter's device thread, stopping at the first failure
    pub fn start_all(&self) -> Result<()> {
        let adapters = self.adapters()?;

        for adapter in &adapters {
            debug!("Starting adapter {}", adapter.name());
            if let Err(e) = adapter.start() {
                error!("Failed to start adapter {}: {}", adapter.name(), e);
                return Err(e);
            }
        }

        info!("Started {} adapters", adapters.len());
        Ok(())
    }

    /// Shut every adapter down, newest first
    ///
    /// A failing adapter does not keep the others from shutting down; the
    /// first failure is returned once all were tried.
    pub fn shut_down_all(&self) -> Result<()> {
        let adapters = self.adapters()?;
        let mut first_error = None;

        for adapter in adapters.iter().rev() {
            debug!("Shutting down adapter {}", adapter.name());
            if let Err(e) = adapter.shut_down() {
                error!("Failed to shut down adapter {}: {}", adapter.name(), e);
                first_error.get_or_insert(e);
            }
        }

        info!("Shut down {} adapters", adapters.len());
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
