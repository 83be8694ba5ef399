//! Configuration for the client.

use crate::credential::Credential;
use crate::error::{ClientError, ClientResult};
use rand::Rng;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the API root.
pub const BASE_URL_VAR: &str = "BASE_URL";
/// Environment variable holding the bearer token.
pub const TOKEN_VAR: &str = "GC_TOKEN";

const TIMEOUT_VAR: &str = "STARPASS_TIMEOUT_SECS";
const MAX_RETRIES_VAR: &str = "STARPASS_MAX_RETRIES";
const RATE_LIMIT_VAR: &str = "STARPASS_RATE_LIMIT";
const RATE_WINDOW_VAR: &str = "STARPASS_RATE_WINDOW_SECS";

/// Configuration for a client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.galaxydigital.com/api`.
    pub base_url: String,
    /// Bearer credential.
    pub credential: Credential,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Records requested per page on list endpoints.
    pub page_size: u32,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Rate ceiling configuration.
    pub rate_limit: RateLimitConfig,
}

impl ClientConfig {
    /// Creates a configuration with defaults.
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
            timeout: Duration::from_secs(3),
            page_size: 100,
            user_agent: format!("star_pass/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// `BASE_URL` and `GC_TOKEN` are required. Tuning variables fall back to
    /// defaults when unset and are rejected when unparsable.
    pub fn from_env() -> ClientResult<Self> {
        let base_url = required_var(BASE_URL_VAR)?;
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ClientError::Config(format!(
                "{BASE_URL_VAR} must be an http(s) URL, got `{base_url}`"
            )));
        }
        let credential = Credential::new(required_var(TOKEN_VAR)?)?;

        let mut config = Self::new(base_url, credential);
        if let Some(secs) = parsed_var::<u64>(TIMEOUT_VAR)? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = parsed_var::<u32>(MAX_RETRIES_VAR)? {
            config.retry.max_retries = retries;
        }
        if let Some(limit) = parsed_var::<u32>(RATE_LIMIT_VAR)? {
            config.rate_limit.max_requests = limit;
        }
        if let Some(secs) = parsed_var::<u64>(RATE_WINDOW_VAR)? {
            config.rate_limit.window = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the rate ceiling configuration.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

fn required_var(name: &str) -> ClientResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ClientError::Config(format!("{name} is not set"))),
    }
}

fn parsed_var<T: FromStr>(name: &str) -> ClientResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("{name} has an invalid value `{raw}`"))),
        _ => Ok(None),
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt for network errors and 5xx responses.
    pub max_retries: u32,
    /// Upper bound on the summed backoff for one call.
    pub max_total_wait: Duration,
    /// Retries allowed for 429 responses, counted separately.
    pub rate_limit_retries: u32,
    /// Upper bound applied to a single `Retry-After` hint.
    pub max_retry_after: Duration,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given retry count.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            max_total_wait: Duration::from_secs(30),
            rate_limit_retries: 5,
            max_retry_after: Duration::from_secs(60),
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            max_total_wait: Duration::ZERO,
            rate_limit_retries: 0,
            max_retry_after: Duration::ZERO,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the total wait budget.
    pub fn with_max_total_wait(mut self, budget: Duration) -> Self {
        self.max_total_wait = budget;
        self
    }

    /// Sets the 429 retry ceiling.
    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.rate_limit_retries = retries;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before retry number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);

        // Negative or NaN products (from a bad multiplier) mean no delay
        let delay_secs = base_delay.max(0.0).min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Add up to 25% jitter
            let jitter = delay_secs * rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Configuration for the rate governor.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per rolling window.
    pub max_requests: u32,
    /// Length of the rolling window.
    pub window: Duration,
    /// Permits that may be held at the same time.
    pub max_in_flight: usize,
    /// How long `acquire` may block. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl RateLimitConfig {
    /// Creates a ceiling of `max_requests` per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            max_in_flight: 8,
            acquire_timeout: None,
        }
    }

    /// Sets the concurrent permit ceiling.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Sets the acquisition timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(60, Duration::from_secs(60))
    }
}
