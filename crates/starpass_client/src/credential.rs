//! Bearer credential held by the transport.

use crate::error::{ClientError, ClientResult};
use std::fmt;
use zeroize::Zeroizing;

/// An opaque API token.
///
/// Immutable once loaded. The token text is wiped from memory when the
/// credential is dropped and is never shown by `Debug`.
#[derive(Clone)]
pub struct Credential {
    token: Zeroizing<String>,
}

impl Credential {
    /// Creates a credential from a token. Empty tokens are rejected.
    pub fn new(token: impl Into<String>) -> ClientResult<Self> {
        let token = Zeroizing::new(token.into().trim().to_string());
        if token.is_empty() {
            return Err(ClientError::Config("API token is empty".into()));
        }
        Ok(Self { token })
    }

    /// Returns the `Authorization` header value.
    pub fn authorization(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("Bearer {}", self.token.as_str()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .finish()
    }
}
