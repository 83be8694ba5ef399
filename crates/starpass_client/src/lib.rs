//! # star_pass Client
//!
//! Authenticated HTTP access to the GalaxyDigital API.
//!
//! This crate provides:
//! - `Transport`: bearer-token injection, retry with exponential backoff,
//!   `Retry-After` handling for 429 responses
//! - `RetryMachine`: the explicit retry state machine driving `Transport`
//! - `RateGovernor`: shared sliding-window request ceiling with scoped permits
//! - `Pages`: lazy, strictly ordered traversal of list endpoints
//! - `HttpClient`: the HTTP seam, with a `reqwest` implementation and a
//!   scripted mock for tests
//!
//! ## Key Invariants
//!
//! - Every request carries the `Authorization` header
//! - Every HTTP attempt holds exactly one governor permit
//! - 4xx responses other than 429 are never retried
//! - Pages are fetched one at a time, in cursor order

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod clock;
mod config;
mod credential;
mod error;
mod governor;
mod http;
mod mock;
mod pagination;
mod retry;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, RateLimitConfig, RetryConfig, BASE_URL_VAR, TOKEN_VAR};
pub use credential::Credential;
pub use error::{ClientError, ClientResult};
pub use governor::{GovernorStats, RateGovernor, RatePermit};
pub use http::{HttpClient, HttpRequest, NetworkError, NetworkErrorKind, ReqwestClient};
pub use mock::MockHttpClient;
pub use pagination::Pages;
pub use retry::{RetryMachine, RetryState, TransientFailure};
pub use transport::{Transport, TransportStats};
