//! Standalone token validation without token acquisition
//!
//! A [`TokenValidator`] wraps a key endpoint for services that only ever
//! receive tokens and never mint them. The underlying key cache is the
//! same process-wide cache used by the token manager, so validators and
//! managers pointing at the same endpoint share one refresh loop.

use crate::{
    clock::System,
    error::Error,
    jwt::{self, Claims},
    keys::KeyCache,
};

/// Validates access tokens against one key endpoint
#[derive(Clone, Debug)]
pub struct TokenValidator {
    key_endpoint: String,
}

impl TokenValidator {
    /// Constructs a validator and primes the key cache for its endpoint
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is empty.
    pub async fn new(key_endpoint: &str) -> Result<Self, Error> {
        if key_endpoint.is_empty() {
            return Err(Error::MissingEndpoints);
        }

        KeyCache::obtain(key_endpoint).await;

        Ok(Self {
            key_endpoint: key_endpoint.to_owned(),
        })
    }

    /// Decodes a token, verifying its signature and expiry unless
    /// `skip_validation` is set
    ///
    /// # Errors
    ///
    /// Returns a token error: malformed, unexpected algorithm, unknown
    /// `kid`, bad signature, or expired.
    pub async fn claims(&self, token: &str, skip_validation: bool) -> Result<Claims, Error> {
        jwt::parse_and_validate_with_clock(token, &self.key_endpoint, skip_validation, &System)
            .await
    }

    /// The key endpoint this validator verifies against
    pub fn key_endpoint(&self) -> &str {
        &self.key_endpoint
    }
}
