use aliri_braid::braid;
use std::fmt;

macro_rules! redacted {
    ($ty:ty: $hidden:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }
    };
}

/// A long-lived API key exchanged at the token endpoint for a
/// short-lived access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct ApiKey;

redacted!(ApiKeyRef: "API KEY");

/// An encoded access token issued by the identity service
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef: "ACCESS TOKEN");

/// An encoded refresh token
///
/// Returned alongside the access token; retained but never exercised, as
/// only the API-key grant is issued.
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef: "REFRESH TOKEN");

/// A client ID used for basic authorization against the identity service
#[braid(serde)]
pub struct ClientId;

/// A client secret used for basic authorization against the identity service
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef: "CLIENT SECRET");

/// The ID of a JSON Web Key, used to select the verification key
/// for a token's signature
#[braid(serde)]
pub struct KeyId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        let key = ApiKey::new("super-secret-api-key".to_string());
        assert_eq!(format!("{:?}", key), "***API KEY***");
        assert_eq!(format!("{}", key), "***API KEY***");
        assert_eq!(key.as_str(), "super-secret-api-key");
    }

    #[test]
    fn key_ids_are_plain() {
        let kid = KeyId::new("20260815-ab12cd34".to_string());
        assert_eq!(format!("{}", kid), "20260815-ab12cd34");
    }
}
