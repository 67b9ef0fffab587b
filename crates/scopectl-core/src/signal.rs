/*!
 * Single-shot notifications.
 *
 * A polling loop keeps seeing a level condition ("frame count reached the
 * target") on every iteration. [`SingleShot`] turns that into one edge:
 * the wrapped signal fires the first time, later emits are swallowed until
 * [`SingleShot::reset`] re-arms it.
 */
use std::fmt::Debug;

use tracing::debug;

use crate::event::Signal;

/// A signal that fires at most once per arming
#[derive(Debug, Clone)]
pub struct SingleShot<T> {
    signal: Signal<T>,
    emitted: bool,
}

impl<T: Clone + Debug + Send + Sync + 'static> SingleShot<T> {
    /// Wrap `signal`; the single-shot starts armed
    pub fn new(signal: Signal<T>) -> Self {
        Self {
            signal,
            emitted: false,
        }
    }

    /// Fire the wrapped signal unless it already fired since the last reset
    ///
    /// Returns whether the signal fired.
    pub fn emit(&mut self, event: T) -> bool {
        if self.emitted {
            return false;
        }
        self.signal.emit(event);
        self.emitted = true;
        debug!("Single-shot {} fired", std::any::type_name::<T>());
        true
    }

    /// Re-arm for the next occurrence
    pub fn reset(&mut self) {
        self.emitted = false;
    }

    /// Whether the next emit will fire
    pub fn is_armed(&self) -> bool {
        !self.emitted
    }

    /// The wrapped signal
    pub fn signal(&self) -> &Signal<T> {
        &self.signal
    }
}
