//! Time sources for backoff and rate accounting.

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

/// A source of monotonic time that can also block.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Accounts for `duration` spent blocked outside `sleep`, e.g. on a
    /// condition variable. Wall clocks have already moved.
    fn waited(&self, _duration: Duration) {}
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// A clock that only moves when told to.
///
/// `sleep` advances the clock instead of blocking and records the requested
/// duration, so backoff schedules can be asserted without waiting.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Creates a clock at offset zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// Returns the time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }

    /// Returns every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }

    fn waited(&self, duration: Duration) {
        self.advance(duration);
    }
}
