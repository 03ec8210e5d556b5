//! JSON Web Keys as published at the identity service's key endpoint
//!
//! Only RSA signing keys are modeled; the identity service signs its
//! tokens with RS256. See [RFC7517][].
//!
//! [RFC7517]: https://tools.ietf.org/html/rfc7517

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::braids::KeyId;

/// RSA public exponent 65537, the value the `AQAB` fast path resolves to
const F4_BYTES: [u8; 3] = [0x01, 0x00, 0x01];

/// A single key record from a JWKS document
///
/// Unknown fields are tolerated on decode; the fields listed here are the
/// ones the verification path consumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, expected `RSA`
    pub kty: String,

    /// Signing algorithm, expected `RS256` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Intended usage, `sig` for signing keys
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    /// Key ID, matched against the `kid` of token headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<KeyId>,

    /// The public modulus, base64url
    pub n: String,

    /// The public exponent, base64url
    pub e: String,

    /// X.509 certificate thumbprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5t: Option<String>,

    /// X.509 certificate chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

/// The JWK's public components could not be decoded
#[derive(Debug, Error)]
#[error("unable to decode JWK component '{component}': {source}")]
pub struct KeyDecodeError {
    component: &'static str,
    source: base64::DecodeError,
}

impl Jwk {
    /// Reconstitutes the RSA public key from the JWK's components
    ///
    /// The exponent value `AQAB` is recognized as 65537 without decoding;
    /// any other correctly base64url-encoded exponent is decoded normally.
    ///
    /// # Errors
    ///
    /// Returns an error if the modulus or exponent is not valid base64url.
    pub fn verification_key(&self) -> Result<RsaPublicKey, KeyDecodeError> {
        let modulus = URL_SAFE_NO_PAD
            .decode(&self.n)
            .map_err(|source| KeyDecodeError {
                component: "n",
                source,
            })?;

        let exponent = if self.e == "AQAB" {
            F4_BYTES.to_vec()
        } else {
            URL_SAFE_NO_PAD
                .decode(&self.e)
                .map_err(|source| KeyDecodeError {
                    component: "e",
                    source,
                })?
        };

        Ok(RsaPublicKey { modulus, exponent })
    }
}

/// An RSA public key reconstituted from a JWK's `(n, e)` pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaPublicKey {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl RsaPublicKey {
    /// Verifies an RS256 signature over `message`
    ///
    /// # Errors
    ///
    /// Returns the crypto primitive's error verbatim when the signature
    /// does not match.
    pub fn verify_rs256(
        &self,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), ring::error::Unspecified> {
        let components = ring::signature::RsaPublicKeyComponents {
            n: self.modulus.as_slice(),
            e: self.exponent.as_slice(),
        };

        components.verify(
            &ring::signature::RSA_PKCS1_2048_8192_SHA256,
            message,
            signature,
        )
    }
}
