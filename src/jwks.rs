//! JSON Web Key Sets
//!
//! The container published at the key endpoint: `{ "keys": [ <JWK>, … ] }`.
//! Ordering of the keys is not significant but is preserved on copy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    braids::{KeyId, KeyIdRef},
    jwk::Jwk,
};

/// A JSON Web Key Set (JWKS)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    keys: Vec<Jwk>,
}

/// No key with the requested `kid` is present in the set
///
/// The message quotes the requested key ID and every key ID currently in
/// the set for diagnostic purposes.
#[derive(Debug, Error)]
#[error("Key does not exist for the token's KID: {kid}; cached KIDs: {known:?}")]
pub struct KeyNotFound {
    kid: KeyId,
    known: Vec<KeyId>,
}

impl KeyNotFound {
    /// The key ID that was requested
    pub fn kid(&self) -> &KeyIdRef {
        &self.kid
    }

    /// The key IDs that were available at the time of the lookup
    pub fn known(&self) -> &[KeyId] {
        &self.known
    }
}

impl Jwks {
    /// Adds a key to the set
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// A view of the keys in this set
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Whether the set contains no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Gets the key matching the given key ID
    ///
    /// # Errors
    ///
    /// Returns a [`KeyNotFound`] naming the requested `kid` and every
    /// currently known `kid` when no key matches.
    pub fn get_key(&self, kid: &KeyIdRef) -> Result<&Jwk, KeyNotFound> {
        self.keys
            .iter()
            .find(|k| k.kid.as_deref() == Some(kid))
            .ok_or_else(|| KeyNotFound {
                kid: kid.to_owned(),
                known: self.keys.iter().filter_map(|k| k.kid.clone()).collect(),
            })
    }
}
