//! DTOs for the identity service's token endpoint

use std::fmt;

use serde::Deserialize;

use crate::{
    braids::{AccessToken, RefreshToken},
    clock::UnixTime,
};

/// The envelope returned by the token endpoint on success
///
/// Only the access token is exercised by this crate; the refresh token is
/// retained but unused, as tokens are always reacquired with the API-key
/// grant.
#[derive(Debug, Deserialize)]
pub struct TokenEnvelope {
    /// The encoded access token
    pub access_token: AccessToken,

    /// The encoded refresh token
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,

    /// The token type, normally `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,

    /// Token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Absolute expiration instant
    #[serde(default)]
    pub expiration: Option<UnixTime>,

    /// The scope the token was issued with
    #[serde(default)]
    pub scope: Option<String>,
}

/// The error body returned by the identity service
///
/// Error payloads that are not JSON are tolerated; the raw body is
/// reported instead.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<String>,

    /// Human-readable error message
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,

    /// Additional context supplied by the identity service
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.error_code.as_deref().unwrap_or("<no code>"),
            self.error_message.as_deref().unwrap_or("<no message>"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_envelope() {
        let envelope: TokenEnvelope = serde_json::from_str(
            r#"{
                "access_token": "eyJ.abc.def",
                "refresh_token": "refresh",
                "token_type": "Bearer",
                "expires_in": 3600,
                "expiration": 1787000000,
                "scope": "ibm openid"
            }"#,
        )
        .unwrap();

        assert_eq!(envelope.access_token.as_str(), "eyJ.abc.def");
        assert_eq!(envelope.expires_in, Some(3600));
        assert_eq!(envelope.expiration, Some(UnixTime(1_787_000_000)));
    }

    #[test]
    fn decodes_minimal_envelope() {
        let envelope: TokenEnvelope =
            serde_json::from_str(r#"{"access_token": "tok"}"#).unwrap();
        assert!(envelope.refresh_token.is_none());
    }

    #[test]
    fn error_body_displays_code_and_message() {
        let error: ErrorResponse = serde_json::from_str(
            r#"{"errorCode": "BXNIM0415E", "errorMessage": "Provided API key could not be found", "context": {"requestId": "abc"}}"#,
        )
        .unwrap();
        assert_eq!(
            error.to_string(),
            "BXNIM0415E: Provided API key could not be found"
        );
    }
}
