//! Common errors
//!
//! The taxonomy mirrors how failures propagate: configuration errors
//! surface synchronously from constructors, transport and identity-service
//! errors feed the retry policy, and token errors come out of the
//! parse/verify path and are never retried.

use std::sync::Arc;

use thiserror::Error;

use crate::{clock::DurationSecs, jwks::KeyNotFound};

/// An error returned by the token parse/verify routine
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token does not have exactly three dot-separated segments, or a
    /// segment could not be decoded
    #[error("token is malformed")]
    Malformed,

    /// The token is signed with something other than RS256
    #[error("unexpected signing algorithm '{alg}': only RS256 is accepted")]
    UnexpectedAlgorithm {
        /// The algorithm named in the token header
        alg: String,
    },

    /// The token header does not carry a usable `kid`
    #[error("token header does not contain a usable kid")]
    InvalidKeyId,

    /// No key with the token's `kid` is present in the key cache
    #[error(transparent)]
    NoKeyForKeyId(#[from] KeyNotFound),

    /// The signature did not verify against the selected key
    #[error("signature verification error: {reason}")]
    Verification {
        /// The underlying failure, verbatim from the crypto primitive or
        /// the key reconstitution step
        reason: String,
    },

    /// The token carries no `exp` claim to check
    #[error("token does not contain an exp claim")]
    MissingExpiration,

    /// The token's `exp` claim lies in the past
    #[error("token is expired by {0}")]
    Expired(DurationSecs),
}

/// An error produced when obtaining, exchanging, or validating tokens
#[derive(Debug, Error)]
pub enum Error {
    /// No API key was supplied
    #[error("api key must not be empty")]
    MissingApiKey,

    /// The environment selector was not recognized
    #[error("'{0}' is not a recognized environment")]
    InvalidEnvironment(String),

    /// The custom environment was selected without supplying both endpoints
    #[error("the custom environment requires both a token endpoint and a key endpoint")]
    MissingEndpoints,

    /// A delegation exchange was attempted without a token endpoint
    #[error("token exchange requires a token endpoint")]
    MissingTokenEndpoint,

    /// The configured token lifetime fraction is outside (0, 1]
    #[error("token lifetime fraction must lie in (0, 1]: got {0}")]
    InvalidLifetimeFraction(f64),

    /// The request never produced a response from the identity service
    #[error("error sending request to the identity service (transaction {transaction_id})")]
    Transport {
        /// The `Transaction-Id` attached to the failed request
        transaction_id: String,
        /// The underlying transport failure
        #[source]
        source: reqwest::Error,
    },

    /// The identity service answered with a non-success status
    #[error("identity service returned status {status} (transaction {transaction_id}): {detail}")]
    IdentityService {
        /// The HTTP status code of the response
        status: u16,
        /// The `Transaction-Id` attached to the request
        transaction_id: String,
        /// The decoded identity-service error body, or a snippet of the
        /// raw payload when it was not JSON
        detail: String,
    },

    /// The response body could not be decoded into the token envelope
    #[error("error decoding identity service response (transaction {transaction_id})")]
    Decode {
        /// The `Transaction-Id` attached to the request
        transaction_id: String,
        /// The underlying decode failure
        #[source]
        source: serde_json::Error,
    },

    /// The token failed parsing or validation
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The token carries no `iam_id` claim
    #[error("token does not contain an iam_id claim")]
    MissingIamId,

    /// No token has ever been stored; the last recorded fetch error follows
    #[error("no token is available: {0}")]
    Unavailable(Arc<Error>),

    /// No token and no error have been recorded
    #[error("token manager is not initialized")]
    Uninitialized,
}

impl From<KeyNotFound> for Error {
    fn from(err: KeyNotFound) -> Self {
        Error::Token(TokenError::from(err))
    }
}
