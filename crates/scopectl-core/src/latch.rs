/*!
 * Idle/active latch.
 *
 * The controlling thread flips the latch with [`Latch::go`] and
 * [`Latch::stop`]; the device thread reads it once per cycle to decide
 * whether to do any work. The latch itself is a plain value: it lives inside
 * the adapter's locked shared state, which provides the cross-thread
 * visibility.
 */
use serde::{Deserialize, Serialize};

/// Whether a device thread should be doing active work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Latch {
    /// Nothing to do; the device thread idles
    #[default]
    Idle,
    /// The device thread performs its work each cycle
    Active,
}

impl Latch {
    /// Enter the active state from any state
    pub fn go(&mut self) {
        *self = Latch::Active;
    }

    /// Leave the active state; stopping an idle latch does nothing
    pub fn stop(&mut self) {
        if *self == Latch::Active {
            *self = Latch::Idle;
        }
    }

    /// Whether the device thread should work this cycle
    pub fn am_active(&self) -> bool {
        *self == Latch::Active
    }

    /// Whether the device thread should idle this cycle
    pub fn am_idle(&self) -> bool {
        *self == Latch::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let latch = Latch::default();
        assert!(latch.am_idle());
        assert!(!latch.am_active());
    }

    #[test]
    fn test_go_from_any_state() {
        let mut latch = Latch::Idle;
        latch.go();
        assert!(latch.am_active());
        latch.go();
        assert!(latch.am_active());
        assert!(!latch.am_idle());
    }

    #[test]
    fn test_stop_only_leaves_active() {
        let mut latch = Latch::Idle;
        latch.stop();
        assert_eq!(latch, Latch::Idle);

        latch.go();
        latch.stop();
        assert_eq!(latch, Latch::Idle);
    }

    #[test]
    fn test_reflects_latest_call() {
        // every prefix of the call sequence must agree with the last call made
        let calls = [true, true, false, true, false, false, true, false, true];
        let mut latch = Latch::default();
        for &go in &calls {
            if go {
                latch.go();
            } else {
                latch.stop();
            }
            assert_eq!(latch.am_active(), go);
            assert_eq!(latch.am_idle(), !go);
        }
    }
}
