//! Identity-service environments and their endpoints

use std::{fmt, str::FromStr};

use crate::error::Error;

/// Selects which identity-service deployment to talk to
///
/// Every selector except [`Custom`][Environment::Custom] maps to a
/// built-in pair of token and key endpoints. `Custom` requires both URLs
/// to be supplied and relaxes TLS verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Environment {
    /// The public production deployment
    Production,
    /// The public staging deployment
    Staging,
    /// The network-private production deployment
    PrivateProduction,
    /// The network-private staging deployment
    PrivateStaging,
    /// A caller-supplied deployment, e.g. a local stub
    Custom,
}

/// The resolved pair of endpoints for one environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// Absolute URL of the token endpoint
    pub token_url: String,
    /// Absolute URL of the key endpoint
    pub key_url: String,
    /// Whether TLS certificate verification is relaxed (custom only)
    pub accept_invalid_certs: bool,
}

impl Environment {
    fn host(self) -> Option<&'static str> {
        match self {
            Environment::Production => Some("iam.cloud.ibm.com"),
            Environment::Staging => Some("iam.test.cloud.ibm.com"),
            Environment::PrivateProduction => Some("private.iam.cloud.ibm.com"),
            Environment::PrivateStaging => Some("private.iam.test.cloud.ibm.com"),
            Environment::Custom => None,
        }
    }

    /// Resolves the endpoint pair for this environment
    ///
    /// # Errors
    ///
    /// Selecting [`Custom`][Environment::Custom] without supplying both
    /// URLs is a configuration error.
    pub fn endpoints(
        self,
        token_url: Option<&str>,
        key_url: Option<&str>,
    ) -> Result<Endpoints, Error> {
        match self.host() {
            Some(host) => Ok(Endpoints {
                token_url: format!("https://{host}/identity/token"),
                key_url: format!("https://{host}/identity/keys"),
                accept_invalid_certs: false,
            }),
            None => match (token_url, key_url) {
                (Some(token_url), Some(key_url)) if !token_url.is_empty() && !key_url.is_empty() => {
                    Ok(Endpoints {
                        token_url: token_url.to_owned(),
                        key_url: key_url.to_owned(),
                        accept_invalid_certs: true,
                    })
                }
                _ => Err(Error::MissingEndpoints),
            },
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::PrivateProduction => "private-production",
            Environment::PrivateStaging => "private-staging",
            Environment::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "private-production" => Ok(Environment::PrivateProduction),
            "private-staging" => Ok(Environment::PrivateStaging),
            "custom" => Ok(Environment::Custom),
            other => Err(Error::InvalidEnvironment(other.to_owned())),
        }
    }
}
