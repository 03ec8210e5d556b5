//! Background management, caching, and validation of IAM access tokens
//!
//! This library keeps one fresh access token per API credential without
//! the application having to think about token lifetimes. A
//! [`TokenManager`] performs the initial token grant when constructed and
//! then refreshes the token in the background ahead of its expiry, so
//! callers always read a current token from memory. The signing keys
//! used to validate tokens are cached per key endpoint in a
//! process-wide [`KeyCache`] with its own background refresh, shared by
//! every manager and validator pointing at the same endpoint.
//!
//! Services that only receive tokens and never mint them can use a
//! [`TokenValidator`] on its own.
//!
//! # Obtaining and using a token
//!
//! ```no_run
//! use iam_tokens::{ApiKey, Environment, TokenManager, TokenManagerConfig};
//!
//! # async fn example() -> Result<(), iam_tokens::Error> {
//! let manager = TokenManager::new(
//!     ApiKey::new(std::env::var("IAM_API_KEY").unwrap()),
//!     Environment::Production,
//!     TokenManagerConfig::default(),
//! )
//! .await?;
//!
//! // Cheap to call on every request; refreshed in the background
//! let token = manager.token()?;
//! println!("Bearer {}", token.as_str());
//! # Ok(())
//! # }
//! ```
//!
//! # Validating a token
//!
//! ```no_run
//! use iam_tokens::TokenValidator;
//!
//! # async fn example() -> Result<(), iam_tokens::Error> {
//! let validator =
//!     TokenValidator::new("https://iam.cloud.ibm.com/identity/keys").await?;
//!
//! let claims = validator.claims("eyJhbGciOi...", false).await?;
//! println!("subject: {:?}", claims.sub);
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod cache;
pub mod clock;
pub mod environment;
pub mod error;
pub mod jwk;
pub mod jwks;
pub mod jwt;
pub mod keys;
pub mod manager;
pub mod scheduler;
pub mod validator;

pub use braids::*;
pub use environment::Environment;
pub use error::{Error, TokenError};
pub use jwt::Claims;
pub use keys::KeyCache;
pub use manager::{TokenManager, TokenManagerConfig};
pub use validator::TokenValidator;
