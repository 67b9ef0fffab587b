/*!
 * Event system for scopectl.
 *
 * Device threads report to the controlling thread through typed broadcast
 * channels, one per event type. Publishing never blocks: a slow listener
 * lags and loses the oldest events instead of stalling a device thread.
 */
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Maximum number of events that can be buffered per event type
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type EventSender<T> = broadcast::Sender<T>;

/// Receiving end for one event type
pub type EventReceiver<T> = broadcast::Receiver<T>;

/// Event bus for publishing and subscribing to events
#[derive(Debug)]
pub struct EventBus {
    channels: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    channel_capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity.max(1),
        }
    }

    fn sender<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventSender<T>> {
        let type_id = TypeId::of::<T>();
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::event("Failed to lock channels"))?;

        if let Some(sender) = channels.get(&type_id) {
            return sender
                .downcast_ref::<EventSender<T>>()
                .cloned()
                .ok_or_else(|| Error::event("Failed to downcast sender"));
        }

        let (sender, _) = broadcast::channel(self.channel_capacity);
        channels.insert(type_id, Box::new(sender.clone()));
        Ok(sender)
    }

    /// Publish an event, returning how many subscribers received it
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        let sender = self.sender::<T>()?;
        if sender.receiver_count() == 0 {
            trace!(event = ?event, "No receivers for event");
            return Ok(0);
        }

        match sender.send(event) {
            Ok(n) => {
                trace!("Published event to {} receivers", n);
                Ok(n)
            }
            // every receiver was dropped between the count and the send
            Err(_) => Ok(0),
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        Ok(self.sender::<T>()?.subscribe())
    }

    /// Number of live subscribers for an event type
    pub fn subscriber_count<T: Clone + Debug + Send + Sync + 'static>(&self) -> usize {
        self.sender::<T>().map(|s| s.receiver_count()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared event bus that can be cloned
#[derive(Debug, Clone, Default)]
pub struct SharedEventBus(Arc<EventBus>);

impl SharedEventBus {
    /// Create a new shared event bus
    pub fn new() -> Self {
        Self(Arc::new(EventBus::new()))
    }

    /// Create a new shared event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(EventBus::with_capacity(capacity)))
    }

    /// Publish an event
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        self.0.publish(event)
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        self.0.subscribe()
    }

    /// Number of live subscribers for an event type
    pub fn subscriber_count<T: Clone + Debug + Send + Sync + 'static>(&self) -> usize {
        self.0.subscriber_count::<T>()
    }

    /// A signal emitting `T` on this bus
    pub fn signal<T: Clone + Debug + Send + Sync + 'static>(&self) -> Signal<T> {
        Signal::new(self.clone())
    }
}

/// An emitter for one event type
///
/// Listeners call [`Signal::subscribe`] (or subscribe on the bus directly);
/// the owning device thread calls [`Signal::emit`].
pub struct Signal<T> {
    bus: SharedEventBus,
    _event: PhantomData<fn(T)>,
}

impl<T: Clone + Debug + Send + Sync + 'static> Signal<T> {
    /// Create a signal on `bus`
    pub fn new(bus: SharedEventBus) -> Self {
        Self {
            bus,
            _event: PhantomData,
        }
    }

    /// Publish `event` to every listener
    ///
    /// Failures are logged rather than returned; a device thread has no
    /// caller to hand them to.
    pub fn emit(&self, event: T) -> usize {
        match self.bus.publish(event) {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to emit {}: {}", std::any::type_name::<T>(), e);
                0
            }
        }
    }

    /// Listen to this signal
    pub fn subscribe(&self) -> Result<EventReceiver<T>> {
        self.bus.subscribe()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            _event: PhantomData,
        }
    }
}

impl<T> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("event", &std::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct FrameReady {
        number: u64,
    }

    #[derive(Debug, Clone)]
    struct StageMoved {
        x: f64,
    }

    #[tokio::test]
    async fn test_publish_subscribe() -> Result<()> {
        let bus = EventBus::new();
        let mut rx = bus.subscribe::<FrameReady>()?;

        assert_eq!(bus.publish(FrameReady { number: 1 })?, 1);

        let received = rx.recv().await.map_err(|e| Error::event(e.to_string()))?;
        assert_eq!(received, FrameReady { number: 1 });
        Ok(())
    }

    #[test]
    fn test_publish_without_listeners() -> Result<()> {
        let bus = SharedEventBus::new();
        assert_eq!(bus.publish(FrameReady { number: 7 })?, 0);
        assert_eq!(bus.subscriber_count::<FrameReady>(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_event_types_are_separate() -> Result<()> {
        let bus = SharedEventBus::new();
        let mut frames = bus.subscribe::<FrameReady>()?;
        let mut moves = bus.subscribe::<StageMoved>()?;

        bus.publish(StageMoved { x: 2.5 })?;
        bus.publish(FrameReady { number: 3 })?;

        let frame = frames.recv().await.map_err(|e| Error::event(e.to_string()))?;
        let moved = moves.recv().await.map_err(|e| Error::event(e.to_string()))?;
        assert_eq!(frame.number, 3);
        assert_eq!(moved.x, 2.5);
        assert!(frames.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn test_signal_emit_reaches_all_subscribers() -> Result<()> {
        let bus = SharedEventBus::new();
        let signal = bus.signal::<FrameReady>();
        let mut rx1 = signal.subscribe()?;
        let mut rx2 = bus.subscribe::<FrameReady>()?;

        assert_eq!(signal.clone().emit(FrameReady { number: 9 }), 2);
        assert_eq!(rx1.try_recv().ok(), Some(FrameReady { number: 9 }));
        assert_eq!(rx2.try_recv().ok(), Some(FrameReady { number: 9 }));
        Ok(())
    }

    #[test]
    fn test_publish_from_other_threads() -> Result<()> {
        let bus = SharedEventBus::new();
        let mut rx = bus.subscribe::<FrameReady>()?;

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let _ = bus.publish(FrameReady { number: t * 10 + i });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().map_err(|_| Error::runtime("publisher panicked"))?;
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 40);
        Ok(())
    }
}
