/*!
 * Device worker threads.
 *
 * Every adapter owns exactly one [`Worker`]: a named OS thread that is the
 * only place hardware is polled from. Shutdown is cooperative. The loop
 * checks a [`StopFlag`] once per cycle, and the flag also cuts the
 * inter-poll sleep short so `stop()` does not wait a full poll interval.
 */
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn, Span};

use crate::error::{Error, Result};

/// Cooperative cancellation flag shared between a worker and its owner
#[derive(Clone, Default)]
pub struct StopFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopFlag {
    /// Create a lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop and wake it if it is sleeping
    pub fn raise(&self) {
        let (lock, cvar) = &*self.inner;
        match lock.lock() {
            Ok(mut raised) => *raised = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        cvar.notify_all();
    }

    /// Whether stop was requested
    pub fn is_raised(&self) -> bool {
        let (lock, _) = &*self.inner;
        match lock.lock() {
            Ok(raised) => *raised,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep for up to `timeout`, returning early with `true` once raised
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut raised = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            raised = match cvar.wait_timeout(raised, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

impl fmt::Debug for StopFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopFlag")
            .field("raised", &self.is_raised())
            .finish()
    }
}

/// What a polling loop wants after one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Sleep for the interval, then run again
    Continue,
    /// Leave the loop
    Exit,
}

/// A named device thread
pub struct Worker {
    name: String,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a new thread named `name`
    ///
    /// `body` receives the stop flag and must return once it is raised.
    /// The thread runs inside `span`.
    pub fn spawn<F>(name: &str, span: Span, body: F) -> Result<Self>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        let stop = StopFlag::new();
        let thread_stop = stop.clone();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _entered = span.enter();
                debug!("Worker {} started", thread_name);
                body(thread_stop);
                debug!("Worker {} exited", thread_name);
            })
            .map_err(|e| Error::runtime(format!("Failed to spawn worker {}: {}", name, e)))?;

        info!("Started worker {}", name);
        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    /// Spawn a fixed-cadence polling loop
    ///
    /// `tick` runs once, then the thread sleeps `interval`, until either the
    /// stop flag is raised or `tick` returns [`Tick::Exit`].
    pub fn poll<F>(name: &str, span: Span, interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        Self::spawn(name, span, move |stop| {
            while !stop.is_raised() {
                if tick() == Tick::Exit {
                    break;
                }
                if stop.wait_timeout(interval) {
                    break;
                }
            }
        })
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A clone of the stop flag
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Whether the thread is still inside its loop
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Raise the stop flag and wait for the thread to exit
    ///
    /// Calling this on an already stopped worker does nothing.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop.raise();
        handle
            .join()
            .map_err(|_| Error::runtime(format!("Worker {} panicked", self.name)))?;
        info!("Stopped worker {}", self.name);
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.stop() {
                warn!("{}", e);
            }
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_stop_flag_wait_times_out() {
        let flag = StopFlag::new();
        let start = Instant::now();
        assert!(!flag.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stop_flag_wakes_sleeper() {
        let flag = StopFlag::new();
        let sleeper = flag.clone();
        let handle = thread::spawn(move || sleeper.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        flag.raise();
        assert!(handle.join().unwrap_or(false));
        assert!(flag.is_raised());
    }

    #[test_log::test]
    fn test_poll_runs_until_stopped() -> Result<()> {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut worker = Worker::poll("test-poll", Span::none(), Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Tick::Continue
        })?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.is_running());
        worker.stop()?;
        assert!(!worker.is_running());

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
        Ok(())
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() -> Result<()> {
        let mut worker = Worker::poll("test-slow", Span::none(), Duration::from_secs(60), || {
            Tick::Continue
        })?;
        thread::sleep(Duration::from_millis(10));
        let start = Instant::now();
        worker.stop()?;
        assert!(start.elapsed() < Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn test_tick_exit_ends_loop() -> Result<()> {
        let mut worker = Worker::poll("test-exit", Span::none(), Duration::from_millis(1), || {
            Tick::Exit
        })?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!worker.is_running());
        worker.stop()?;
        Ok(())
    }

    #[test]
    fn test_stop_twice_is_noop() -> Result<()> {
        let mut worker = Worker::spawn("test-twice", Span::none(), |stop| {
            while !stop.wait_timeout(Duration::from_millis(5)) {}
        })?;
        assert_eq!(worker.name(), "test-twice");
        worker.stop()?;
        worker.stop()?;
        assert!(worker.stop_flag().is_raised());
        Ok(())
    }
}
