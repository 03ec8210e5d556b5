//! Parsing and validation of identity-service access tokens
//!
//! An access token is a compact JWT: three base64url segments separated
//! by `.`. The parse/verify path checks the RS256 signature against the
//! [key cache][crate::keys] and the `exp` claim against the clock.
//! `iat`, `nbf`, issuer, and audience are deliberately not checked, to
//! tolerate clock skew at adopters; `exp` is the only time-based claim
//! honored.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::{
    braids::KeyId,
    clock::{Clock, System, UnixTime},
    error::{Error, TokenError},
    keys::KeyCache,
};

const ALG_RS256: &str = "RS256";

/// The header segment of an access token
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Headers {
    /// The signing algorithm identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// The ID of the key that signed the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<KeyId>,

    /// Token type, normally `JWT`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// The account descriptor embedded in an access token
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Whether the account is valid
    #[serde(default)]
    pub valid: bool,

    /// The account number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bss: Option<String>,

    /// Whether the account is frozen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen: Option<bool>,
}

/// The inner authentication subject block of an access token
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Authn {
    /// The authenticated subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// The authenticated principal's IAM ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_id: Option<String>,

    /// The kind of principal, e.g. `ServiceId`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,

    /// Display name of the principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Given name of a human principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name of a human principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Email of a human principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The claims of an identity-service access token
///
/// A superset of the standard JWT claims plus the identity service's
/// domain fields. Every field is optional on decode; fields this crate
/// does not model are preserved in [`extra`][Claims::extra] but never
/// validated.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issued-at time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<UnixTime>,

    /// Expiration time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<UnixTime>,

    /// Not-before time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<UnixTime>,

    /// Token identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// The principal's IAM ID, e.g. `iam-ServiceId-…`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_id: Option<String>,

    /// The realm the principal belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realmid: Option<String>,

    /// The principal's identifier within its realm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    /// Display name of the principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The kind of principal, e.g. `ServiceId`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,

    /// The account the principal belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,

    /// Authentication methods used to obtain the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,

    /// Authentication assurance level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<u32>,

    /// The grant the token was issued under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,

    /// The scope the token was issued with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// The client the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// CRNs of the service instances the token is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crn: Option<Vec<String>>,

    /// The inner authentication subject block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authn: Option<Authn>,

    /// Claims this crate does not model, preserved as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
pub(crate) struct Decomposed<'a> {
    pub headers: Headers,
    pub claims: Claims,
    /// The signed portion: `<header>.<claims>`
    pub message: &'a str,
    pub signature: Vec<u8>,
}

/// Splits a compact token into its structured parts
///
/// Any deviation from three well-formed base64url segments is malformed.
pub(crate) fn decompose(token: &str) -> Result<Decomposed<'_>, TokenError> {
    let mut segments = token.split('.');
    let (header, claims, signature) = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => return Err(TokenError::Malformed),
    };

    let message = &token[..header.len() + 1 + claims.len()];

    let header_raw = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Malformed)?;
    let headers: Headers =
        serde_json::from_slice(&header_raw).map_err(|_| TokenError::Malformed)?;

    let claims_raw = URL_SAFE_NO_PAD
        .decode(claims)
        .map_err(|_| TokenError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&claims_raw).map_err(|_| TokenError::Malformed)?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed)?;

    Ok(Decomposed {
        headers,
        claims,
        message,
        signature,
    })
}

/// Parses a token and validates it against the keys cached for
/// `key_endpoint`, using the system clock
///
/// See [`parse_and_validate_with_clock`].
///
/// # Errors
///
/// Returns an error when the token is malformed, signed with an
/// unexpected algorithm, signed by an unknown key, carries a bad
/// signature, or is expired.
pub async fn parse_and_validate(
    token: &str,
    key_endpoint: &str,
    skip_validation: bool,
) -> Result<Claims, Error> {
    parse_and_validate_with_clock(token, key_endpoint, skip_validation, &System).await
}

/// Parses a token and validates it against the keys cached for
/// `key_endpoint`
///
/// With `skip_validation` set, the claims are returned without any
/// signature or expiry check — even when `alg` or `kid` are absent — but
/// a malformed token still fails.
///
/// # Errors
///
/// As [`parse_and_validate`].
pub async fn parse_and_validate_with_clock<C: Clock>(
    token: &str,
    key_endpoint: &str,
    skip_validation: bool,
    clock: &C,
) -> Result<Claims, Error> {
    let decomposed = decompose(token).map_err(Error::Token)?;

    if skip_validation {
        return Ok(decomposed.claims);
    }

    let alg = decomposed.headers.alg.as_deref().unwrap_or_default();
    if alg != ALG_RS256 {
        return Err(Error::Token(TokenError::UnexpectedAlgorithm {
            alg: alg.to_owned(),
        }));
    }

    let kid = decomposed
        .headers
        .kid
        .as_deref()
        .filter(|kid| !kid.as_str().is_empty())
        .ok_or(Error::Token(TokenError::InvalidKeyId))?;

    let cache = KeyCache::obtain(key_endpoint).await;
    let jwk = cache.key(kid)?;

    let key = jwk
        .verification_key()
        .map_err(|err| TokenError::Verification {
            reason: err.to_string(),
        })?;

    key.verify_rs256(decomposed.message.as_bytes(), &decomposed.signature)
        .map_err(|err| TokenError::Verification {
            reason: err.to_string(),
        })?;

    let exp = decomposed
        .claims
        .exp
        .ok_or(Error::Token(TokenError::MissingExpiration))?;
    let now = clock.now();
    if now >= exp {
        return Err(Error::Token(TokenError::Expired(now - exp)));
    }

    Ok(decomposed.claims)
}
