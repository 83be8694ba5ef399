//! Retry state machine.
//!
//! `RetryMachine` decides whether and how long to wait after each failed
//! attempt of a single call. It performs no I/O; `Transport` drives it.
//!
//! ```text
//! Idle ──attempt──▶ Retrying ──ok──▶ Succeeded
//!                     │  ▲
//!           transient │  │ attempt
//!                     ▼  │
//!                   Waiting ──budget exhausted──▶ Failed
//! ```

use crate::config::RetryConfig;
use std::time::Duration;

/// Current state of a call's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No attempt made yet.
    Idle,
    /// Waiting before the next attempt.
    Waiting {
        /// Delay chosen for this wait.
        delay: Duration,
    },
    /// An attempt is in progress.
    Retrying {
        /// One-based attempt number.
        attempt: u32,
    },
    /// The call succeeded.
    Succeeded,
    /// The call failed for good.
    Failed,
}

impl RetryState {
    /// Returns true once the machine reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded | RetryState::Failed)
    }
}

/// A failure that may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientFailure {
    /// Connection reset, timeout, or a 5xx response.
    Server,
    /// A 429 response, with the service's `Retry-After` hint if any.
    RateLimited(Option<Duration>),
}

/// Bounded retry bookkeeping for one call.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    config: RetryConfig,
    state: RetryState,
    attempts: u32,
    server_failures: u32,
    rate_limited: u32,
    backoff_waited: Duration,
}

impl RetryMachine {
    /// Creates a machine in the `Idle` state.
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: config.clone(),
            state: RetryState::Idle,
            attempts: 0,
            server_failures: 0,
            rate_limited: 0,
            backoff_waited: Duration::ZERO,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Returns the number of attempts started.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the number of 429 responses seen.
    pub fn rate_limited(&self) -> u32 {
        self.rate_limited
    }

    /// Starts an attempt and returns its one-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert!(!self.state.is_terminal(), "attempt after terminal state");
        self.attempts += 1;
        self.state = RetryState::Retrying {
            attempt: self.attempts,
        };
        self.attempts
    }

    /// Records success.
    pub fn succeed(&mut self) {
        self.state = RetryState::Succeeded;
    }

    /// Records a non-retryable failure.
    pub fn fail(&mut self) {
        self.state = RetryState::Failed;
    }

    /// Records a transient failure.
    ///
    /// Returns the delay to wait before the next attempt, or `None` when the
    /// relevant budget is exhausted (the machine is then `Failed`).
    pub fn on_transient(&mut self, failure: TransientFailure) -> Option<Duration> {
        let delay = match failure {
            TransientFailure::Server => {
                self.server_failures += 1;
                if self.server_failures > self.config.max_retries {
                    return self.give_up();
                }
                let delay = self.config.delay_for_retry(self.server_failures);
                if self.backoff_waited + delay > self.config.max_total_wait {
                    return self.give_up();
                }
                self.backoff_waited += delay;
                delay
            }
            TransientFailure::RateLimited(hint) => {
                self.rate_limited += 1;
                if self.rate_limited > self.config.rate_limit_retries {
                    return self.give_up();
                }
                match hint {
                    Some(hint) => hint.min(self.config.max_retry_after),
                    None => self.config.delay_for_retry(self.rate_limited),
                }
            }
        };
        self.state = RetryState::Waiting { delay };
        Some(delay)
    }

    fn give_up(&mut self) -> Option<Duration> {
        self.state = RetryState::Failed;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(100))
            .without_jitter()
    }

    #[test]
    fn three_server_failures_then_success() {
        let mut machine = RetryMachine::new(&config());
        assert_eq!(machine.state(), RetryState::Idle);

        let mut delays = Vec::new();
        for _ in 0..3 {
            machine.begin_attempt();
            delays.push(machine.on_transient(TransientFailure::Server).unwrap());
        }
        assert_eq!(machine.begin_attempt(), 4);
        machine.succeed();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert_eq!(machine.state(), RetryState::Succeeded);
    }

    #[test]
    fn server_budget_exhausted() {
        let mut machine = RetryMachine::new(&config());
        for _ in 0..3 {
            machine.begin_attempt();
            assert!(machine.on_transient(TransientFailure::Server).is_some());
        }
        machine.begin_attempt();
        assert_eq!(machine.on_transient(TransientFailure::Server), None);
        assert_eq!(machine.state(), RetryState::Failed);
        assert_eq!(machine.attempts(), 4);
    }

    #[test]
    fn total_wait_budget() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(4))
            .with_max_delay(Duration::from_secs(60))
            .with_max_total_wait(Duration::from_secs(10))
            .without_jitter();
        let mut machine = RetryMachine::new(&config);

        machine.begin_attempt();
        assert_eq!(
            machine.on_transient(TransientFailure::Server),
            Some(Duration::from_secs(4))
        );
        machine.begin_attempt();
        // 4s + 8s would exceed the 10s budget
        assert_eq!(machine.on_transient(TransientFailure::Server), None);
    }

    #[test]
    fn rate_limits_use_separate_budget() {
        let config = config().with_rate_limit_retries(2);
        let mut machine = RetryMachine::new(&config);

        machine.begin_attempt();
        assert_eq!(
            machine.on_transient(TransientFailure::RateLimited(Some(Duration::from_secs(2)))),
            Some(Duration::from_secs(2))
        );
        machine.begin_attempt();
        assert!(machine.on_transient(TransientFailure::Server).is_some());
        machine.begin_attempt();
        assert!(machine
            .on_transient(TransientFailure::RateLimited(None))
            .is_some());
        machine.begin_attempt();
        assert_eq!(
            machine.on_transient(TransientFailure::RateLimited(None)),
            None
        );
        assert_eq!(machine.rate_limited(), 3);
    }

    #[test]
    fn retry_after_is_capped() {
        let mut machine = RetryMachine::new(&config());
        machine.begin_attempt();
        assert_eq!(
            machine.on_transient(TransientFailure::RateLimited(Some(Duration::from_secs(3600)))),
            Some(Duration::from_secs(60))
        );
        assert!(matches!(machine.state(), RetryState::Waiting { .. }));
    }

    #[test]
    fn no_retry_fails_immediately() {
        let mut machine = RetryMachine::new(&RetryConfig::no_retry());
        machine.begin_attempt();
        assert_eq!(machine.on_transient(TransientFailure::Server), None);
        assert!(machine.state().is_terminal());
    }
}
