//! Shared request-rate ceiling.

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::{ClientError, ClientResult};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on a single condvar wait, so clock changes are noticed.
const SLOT_POLL: Duration = Duration::from_millis(50);

/// Governor statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GovernorStats {
    /// Permits granted.
    pub granted: u64,
    /// Acquisitions that timed out.
    pub timeouts: u64,
    /// Total time callers spent blocked.
    pub waited: Duration,
    /// Highest number of permits held at once.
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct GovernorState {
    /// Grant instants inside the current window, oldest first.
    window: VecDeque<Instant>,
    in_flight: usize,
    holders: HashSet<ThreadId>,
    stats: GovernorStats,
}

impl GovernorState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.window.front() {
            if oldest + window <= now {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate governor shared by every caller in a run.
///
/// A permit is granted when fewer than `max_requests` grants fall inside the
/// last `window` and fewer than `max_in_flight` permits are held. Dropping
/// the permit frees its in-flight slot; the grant stays counted until it
/// leaves the window.
#[derive(Debug)]
pub struct RateGovernor {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<GovernorState>,
    released: Condvar,
}

impl RateGovernor {
    /// Creates a governor on the system clock.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a governor on the given clock.
    pub fn with_clock(mut config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        config.max_requests = config.max_requests.max(1);
        config.max_in_flight = config.max_in_flight.max(1);
        Self {
            config,
            clock,
            state: Mutex::new(GovernorState::default()),
            released: Condvar::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> GovernorStats {
        self.state.lock().stats.clone()
    }

    /// Returns the number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Blocks until a permit is available, using the configured timeout.
    pub fn acquire(&self) -> ClientResult<RatePermit<'_>> {
        self.acquire_within(self.config.acquire_timeout)
    }

    /// Blocks until a permit is available or `timeout` elapses.
    pub fn acquire_within(&self, timeout: Option<Duration>) -> ClientResult<RatePermit<'_>> {
        let thread = thread::current().id();
        let started = self.clock.now();
        let deadline = timeout.map(|t| started + t);

        let mut state = self.state.lock();
        if state.holders.contains(&thread) {
            return Err(ClientError::PermitAlreadyHeld);
        }

        loop {
            let now = self.clock.now();
            state.prune(now, self.config.window);

            let window_full = state.window.len() >= self.config.max_requests as usize;
            let slots_full = state.in_flight >= self.config.max_in_flight;

            if !window_full && !slots_full {
                state.window.push_back(now);
                state.in_flight += 1;
                state.holders.insert(thread);
                state.stats.granted += 1;
                state.stats.waited += now.saturating_duration_since(started);
                state.stats.peak_in_flight = state.stats.peak_in_flight.max(state.in_flight);
                return Ok(RatePermit {
                    governor: self,
                    thread,
                });
            }

            let remaining = match deadline {
                Some(deadline) if now >= deadline => {
                    let waited = now.saturating_duration_since(started);
                    state.stats.timeouts += 1;
                    state.stats.waited += waited;
                    warn!(?waited, "rate governor timed out");
                    return Err(ClientError::RateTimeout { waited });
                }
                Some(deadline) => Some(deadline - now),
                None => None,
            };

            if slots_full {
                let wait = remaining.map_or(SLOT_POLL, |r| r.min(SLOT_POLL));
                if self.released.wait_for(&mut state, wait).timed_out() {
                    self.clock.waited(wait);
                }
            } else {
                let frees_at = state
                    .window
                    .front()
                    .map_or(now, |&oldest| oldest + self.config.window);
                let wait = frees_at.saturating_duration_since(now);
                let wait = remaining.map_or(wait, |r| wait.min(r));
                debug!(?wait, "rate window full, waiting");
                MutexGuard::unlocked(&mut state, || self.clock.sleep(wait));
            }
        }
    }

    fn release(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.holders.remove(&thread);
        drop(state);
        self.released.notify_one();
    }
}

/// A granted request slot. Dropping it releases the slot.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct RatePermit<'a> {
    governor: &'a RateGovernor,
    thread: ThreadId,
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        self.governor.release(self.thread);
    }
}
