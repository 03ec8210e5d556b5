//! Background management of one access token per API credential
//!
//! A [`TokenManager`] keeps exactly one current access token for one API
//! key. Construction performs a synchronous first fetch with bounded
//! retry; after that, a refresh is scheduled ahead of the token's expiry
//! and callers read the current token cheaply. The refresh loop retries
//! indefinitely between scheduled ticks and never surfaces errors to
//! readers directly; a failed refresh leaves the previous token in place
//! until it crosses its own expiry.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::header;

use crate::{
    braids::{AccessToken, ApiKey, ClientId, ClientSecret},
    cache::{self, CacheFrame, CacheState},
    clock::{Clock, DurationSecs, System, UnixTime},
    environment::{Endpoints, Environment},
    error::{Error, TokenError},
    jwt::{self, Claims},
    scheduler,
};

pub mod dto;

const GRANT_TYPE_APIKEY: &str = "urn:ibm:params:oauth:grant-type:apikey";
const GRANT_TYPE_DELEGATION: &str = "urn:ibm:params:oauth:grant-type:iam-authz";
const DELEGATION_PREFIX: &str = "crn-";

const DEFAULT_LIFETIME_FRACTION: f64 = 0.75;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15);
const FALLBACK_REFRESH_DELAY: DurationSecs = DurationSecs(300);
const MAX_INITIAL_ATTEMPTS: u32 = 3;

/// Optional knobs for a [`TokenManager`]
#[derive(Clone, Debug, Default)]
pub struct TokenManagerConfig {
    /// Client ID for basic authorization against the token endpoint
    pub client_id: Option<ClientId>,

    /// Client secret for basic authorization against the token endpoint
    pub client_secret: Option<ClientSecret>,

    /// Fraction of the token lifetime after which to refresh, in (0, 1]
    ///
    /// Deprecated knob; defaults to 0.75.
    pub lifetime_fraction: Option<f64>,

    /// Fixed refresh interval in seconds; 0 derives the interval from the
    /// token's claims
    pub expiry_seconds: u64,

    /// Scope requested with each grant
    pub scope: Option<String>,

    /// Per-attempt retry delay, overriding `Retry-After` and the default
    pub retry_delay: Option<Duration>,

    /// Per-request HTTP timeout; defaults to 15 seconds
    pub http_timeout: Option<Duration>,

    /// Token endpoint URL, required for [`Environment::Custom`]
    pub token_endpoint: Option<String>,

    /// Key endpoint URL, required for [`Environment::Custom`]
    pub key_endpoint: Option<String>,
}

#[derive(Debug, Default)]
struct Current {
    token: Option<AccessToken>,
    claims: Option<Claims>,
    error: Option<Arc<Error>>,
}

/// The outcome of one failed fetch attempt, carrying what the retry
/// policy needs
#[derive(Debug)]
struct FetchFailure {
    error: Error,
    /// The response status, or the synthetic status assigned to a
    /// transport failure
    status: Option<u16>,
    /// Parsed `Retry-After` value from a 429 response
    retry_after: Option<u64>,
    retryable: bool,
}

impl FetchFailure {
    fn fatal(error: Error) -> Self {
        Self {
            error,
            status: None,
            retry_after: None,
            retryable: false,
        }
    }
}

#[derive(Debug)]
struct Inner<C> {
    api_key: ApiKey,
    endpoints: Endpoints,
    client_id: Option<ClientId>,
    client_secret: Option<ClientSecret>,
    lifetime_fraction: f64,
    expiry_seconds: u64,
    scope: Option<String>,
    retry_delay: Option<Duration>,
    http_timeout: Duration,
    current: RwLock<Current>,
    state: CacheState,
    clock: C,
}

/// Maintains one current access token for one API credential
///
/// Cloning is cheap and clones observe the same token slot. Dropping the
/// last clone quiesces the background refresh; [`shutdown`][Self::shutdown]
/// stops it explicitly.
#[derive(Clone, Debug)]
pub struct TokenManager<C = System> {
    inner: Arc<Inner<C>>,
}

impl TokenManager<System> {
    /// Constructs a manager and performs the initial token fetch
    ///
    /// Up to three attempts are made against retryable responses (429 and
    /// 5xx, including synthetic 502/504 for transport failures). On
    /// success the manager is initialized and a refresh is scheduled; on
    /// failure the error is returned and no background activity remains.
    ///
    /// # Errors
    ///
    /// Returns a configuration error synchronously (empty API key,
    /// missing custom endpoints, invalid lifetime fraction), or the final
    /// fetch error once retries are exhausted.
    pub async fn new(
        api_key: ApiKey,
        environment: Environment,
        config: TokenManagerConfig,
    ) -> Result<Self, Error> {
        Self::with_clock(api_key, environment, config, System).await
    }

    /// Performs a single token fetch without installing a cache or a
    /// refresh loop
    ///
    /// Exactly one HTTP request is made regardless of outcome. Returns
    /// the encoded token and the HTTP status code.
    ///
    /// # Errors
    ///
    /// The same error space as [`new`][Self::new], but without retry.
    pub async fn fetch_token_once(
        api_key: ApiKey,
        environment: Environment,
        config: TokenManagerConfig,
    ) -> Result<(AccessToken, u16), Error> {
        let inner = Inner::build(api_key, environment, config, System)?;

        match inner.fetch_once().await {
            Ok((envelope, status)) => Ok((envelope.access_token, status)),
            Err(failure) => Err(failure.error),
        }
    }
}

impl<C: Clock + Send + Sync + 'static> TokenManager<C> {
    /// Constructs a manager using the given clock
    ///
    /// See [`new`][TokenManager::new].
    ///
    /// # Errors
    ///
    /// As [`new`][TokenManager::new].
    pub async fn with_clock(
        api_key: ApiKey,
        environment: Environment,
        config: TokenManagerConfig,
        clock: C,
    ) -> Result<Self, Error> {
        let inner = Arc::new(Inner::build(api_key, environment, config, clock)?);

        cache::initialize_if_needed(&inner).await;

        let failure = {
            let current = inner.current.read().expect("token slot lock poisoned");
            if current.token.is_some() {
                None
            } else {
                current.error.clone()
            }
        };

        match failure {
            None => Ok(Self { inner }),
            Some(error) => Err(Error::Unavailable(error)),
        }
    }

    /// The current encoded access token
    ///
    /// # Errors
    ///
    /// Returns an expired-token error once the cached token's `exp` has
    /// passed, or the last recorded fetch error if no token has ever been
    /// stored.
    pub fn token(&self) -> Result<AccessToken, Error> {
        let current = self.inner.current.read().expect("token slot lock poisoned");

        if let Some(token) = &current.token {
            if let Some(exp) = current.claims.as_ref().and_then(|c| c.exp) {
                let now = self.inner.clock.now();
                if now >= exp {
                    return Err(Error::Token(TokenError::Expired(now - exp)));
                }
            }
            return Ok(token.clone());
        }

        match &current.error {
            Some(error) => Err(Error::Unavailable(Arc::clone(error))),
            None => Err(Error::Uninitialized),
        }
    }

    /// Decodes a candidate token, verifying its signature and expiry
    /// against this manager's key endpoint unless `skip_validation` is
    /// set
    ///
    /// # Errors
    ///
    /// Returns a token error: malformed, unexpected algorithm, unknown
    /// `kid`, bad signature, or expired.
    pub async fn claims(&self, token: &str, skip_validation: bool) -> Result<Claims, Error> {
        jwt::parse_and_validate_with_clock(
            token,
            &self.inner.endpoints.key_url,
            skip_validation,
            &self.inner.clock,
        )
        .await
    }

    /// The `iam_id` claim of a candidate token
    ///
    /// # Errors
    ///
    /// As [`claims`][Self::claims], or an error when the claim is absent.
    pub async fn subject_as_iam_id(
        &self,
        token: &str,
        skip_validation: bool,
    ) -> Result<String, Error> {
        let claims = self.claims(token, skip_validation).await?;
        claims.iam_id.ok_or(Error::MissingIamId)
    }

    /// Exchanges the current access token for a delegation token whose
    /// subject is `desired_iam_id`
    ///
    /// The `crn-` prefix is prepended when missing. No retry is
    /// performed; callers re-invoke if desired.
    ///
    /// # Errors
    ///
    /// Requires a valid current token; any exchange error surfaces
    /// verbatim with its `Transaction-Id`.
    pub async fn delegation_token(&self, desired_iam_id: &str) -> Result<AccessToken, Error> {
        if self.inner.endpoints.token_url.is_empty() {
            return Err(Error::MissingTokenEndpoint);
        }

        let current = self.token()?;
        let desired = ensure_crn_prefix(desired_iam_id);

        let transaction_id = uuid::Uuid::new_v4().to_string();
        let client = self
            .inner
            .build_client()
            .map_err(|source| Error::Transport {
                transaction_id: transaction_id.clone(),
                source,
            })?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", GRANT_TYPE_DELEGATION),
            ("access_token", current.as_str()),
            ("desired_iam_id", &desired),
        ];
        if let Some(scope) = &self.inner.scope {
            form.push(("scope", scope));
        }

        let (envelope, _status) = self
            .inner
            .post_form(&client, &form, &transaction_id)
            .await
            .map_err(|failure| failure.error)?;

        Ok(envelope.access_token)
    }

    /// Stops the background refresh
    ///
    /// A refresh already in flight completes, but no further refresh is
    /// scheduled.
    pub fn shutdown(&self) {
        self.inner.state.stop();
    }
}

impl<C: Clock + Send + Sync + 'static> Inner<C> {
    fn build(
        api_key: ApiKey,
        environment: Environment,
        config: TokenManagerConfig,
        clock: C,
    ) -> Result<Self, Error> {
        if api_key.as_str().is_empty() {
            return Err(Error::MissingApiKey);
        }

        let endpoints = environment.endpoints(
            config.token_endpoint.as_deref(),
            config.key_endpoint.as_deref(),
        )?;

        let lifetime_fraction = match config.lifetime_fraction {
            Some(f) if f > 0.0 && f <= 1.0 => f,
            Some(f) => return Err(Error::InvalidLifetimeFraction(f)),
            None => DEFAULT_LIFETIME_FRACTION,
        };

        Ok(Self {
            api_key,
            endpoints,
            client_id: config.client_id,
            client_secret: config.client_secret,
            lifetime_fraction,
            expiry_seconds: config.expiry_seconds,
            scope: config.scope,
            retry_delay: config.retry_delay,
            http_timeout: config.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT),
            current: RwLock::default(),
            state: CacheState::default(),
            clock,
        })
    }

    /// Builds a fresh client for one request; connections are not pooled
    /// across fetches
    fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder().timeout(self.http_timeout);
        if self.endpoints.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder.build()
    }

    /// One acquisition attempt against the token endpoint
    async fn fetch_once(&self) -> Result<(dto::TokenEnvelope, u16), FetchFailure> {
        let transaction_id = uuid::Uuid::new_v4().to_string();
        let client = self.build_client().map_err(|source| {
            FetchFailure::fatal(Error::Transport {
                transaction_id: transaction_id.clone(),
                source,
            })
        })?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", GRANT_TYPE_APIKEY),
            ("apikey", self.api_key.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope));
        }

        self.post_form(&client, &form, &transaction_id).await
    }

    async fn post_form(
        &self,
        client: &reqwest::Client,
        form: &[(&str, &str)],
        transaction_id: &str,
    ) -> Result<(dto::TokenEnvelope, u16), FetchFailure> {
        tracing::debug!(
            token.url = %self.endpoints.token_url,
            transaction.id = %transaction_id,
            "requesting token from identity service"
        );

        let mut request = client
            .post(&self.endpoints.token_url)
            .header(header::ACCEPT, "application/json")
            .header("Transaction-Id", transaction_id)
            .form(form);

        if let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) {
            request = request.basic_auth(id.as_str(), Some(secret.as_str()));
        }

        let response = request
            .send()
            .await
            .map_err(|source| classify_transport(source, transaction_id))?;

        let status = response.status();
        tracing::debug!(
            response.status = status.as_u16(),
            transaction.id = %transaction_id,
            "received token response"
        );

        if status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|source| classify_transport(source, transaction_id))?;
            let envelope = serde_json::from_slice(&body).map_err(|source| {
                FetchFailure::fatal(Error::Decode {
                    transaction_id: transaction_id.to_owned(),
                    source,
                })
            })?;
            Ok((envelope, status.as_u16()))
        } else {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());

            let body = response.bytes().await.unwrap_or_default();
            let detail = match serde_json::from_slice::<dto::ErrorResponse>(&body) {
                Ok(error) => error.to_string(),
                Err(_) => String::from_utf8_lossy(&body).chars().take(256).collect(),
            };

            let status = status.as_u16();
            Err(FetchFailure {
                error: Error::IdentityService {
                    status,
                    transaction_id: transaction_id.to_owned(),
                    detail,
                },
                status: Some(status),
                retry_after,
                retryable: status == 429 || status >= 500,
            })
        }
    }

    /// Fetches a token, verifies it, and installs it with its claims
    ///
    /// Token, claims, and the cleared error are assigned under one write,
    /// so readers observing the new token observe matching claims.
    async fn fetch_and_install(&self) -> Result<(), FetchFailure> {
        let (envelope, _status) = self.fetch_once().await?;
        let token = envelope.access_token;

        let claims = jwt::parse_and_validate_with_clock(
            token.as_str(),
            &self.endpoints.key_url,
            false,
            &self.clock,
        )
        .await
        .map_err(FetchFailure::fatal)?;

        {
            let mut current = self.current.write().expect("token slot lock poisoned");
            current.token = Some(token);
            current.claims = Some(claims);
            current.error = None;
        }

        tracing::debug!("installed fresh access token");
        Ok(())
    }

    fn record_error(&self, error: Arc<Error>) {
        let mut current = self.current.write().expect("token slot lock poisoned");
        current.error = Some(error);
    }

    fn next_refresh_delay(&self) -> DurationSecs {
        let window = {
            let current = self.current.read().expect("token slot lock poisoned");
            current
                .claims
                .as_ref()
                .and_then(|c| Some((c.iat?, c.exp?)))
        };
        next_refresh_delay(self.expiry_seconds, self.lifetime_fraction, window)
    }

    fn schedule_refresh(self: &Arc<Self>, delay: DurationSecs) {
        if self.state.is_stopped() {
            return;
        }

        tracing::debug!(delay = delay.0, "scheduling next token refresh");

        let weak = Arc::downgrade(self);
        scheduler::once(delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                if !inner.state.is_stopped() {
                    inner.update_cache().await;
                }
            }
        });
    }
}

#[async_trait]
impl<C: Clock + Send + Sync + 'static> CacheFrame for Inner<C> {
    fn state(&self) -> &CacheState {
        &self.state
    }

    fn expiry_interval(&self) -> Duration {
        self.next_refresh_delay().into()
    }

    async fn init_cache(self: Arc<Self>) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_and_install().await {
                Ok(()) => {
                    self.schedule_refresh(self.next_refresh_delay());
                    return;
                }
                Err(failure) => {
                    tracing::error!(
                        error = &failure.error as &dyn std::error::Error,
                        attempt,
                        "initial token fetch failed"
                    );

                    let retryable = failure.retryable;
                    let delay = attempt_retry_delay(
                        self.retry_delay,
                        failure.status,
                        failure.retry_after,
                    );
                    self.record_error(Arc::new(failure.error));

                    if !retryable || attempt >= MAX_INITIAL_ATTEMPTS {
                        return;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn update_cache(self: Arc<Self>) {
        match self.fetch_and_install().await {
            Ok(()) => {
                self.schedule_refresh(self.next_refresh_delay());
            }
            Err(failure) => {
                tracing::error!(
                    error = &failure.error as &dyn std::error::Error,
                    "token refresh failed; keeping previous token"
                );
                self.record_error(Arc::new(failure.error));
                self.schedule_refresh(failure_refresh_delay(self.expiry_seconds));
            }
        }
    }
}

/// Assigns a synthetic status to transport failures for the retry
/// policy: a request timeout acts as a gateway timeout (504), a
/// connection failure as a bad gateway (502); everything else is not
/// retried
fn classify_transport(source: reqwest::Error, transaction_id: &str) -> FetchFailure {
    let (status, retryable) = if source.is_timeout() {
        (Some(504), true)
    } else if source.is_connect() {
        (Some(502), true)
    } else {
        (None, false)
    };

    FetchFailure {
        error: Error::Transport {
            transaction_id: transaction_id.to_owned(),
            source,
        },
        status,
        retry_after: None,
        retryable,
    }
}

/// The delay before the next refresh after a successful fetch
fn next_refresh_delay(
    expiry_seconds: u64,
    fraction: f64,
    window: Option<(UnixTime, UnixTime)>,
) -> DurationSecs {
    if expiry_seconds > 0 {
        return DurationSecs(expiry_seconds);
    }
    match window {
        Some((iat, exp)) => (exp - iat) * fraction,
        None => FALLBACK_REFRESH_DELAY,
    }
}

/// The delay before the next attempt after a failed refresh
fn failure_refresh_delay(expiry_seconds: u64) -> DurationSecs {
    if expiry_seconds > 0 {
        DurationSecs(expiry_seconds).min(FALLBACK_REFRESH_DELAY)
    } else {
        FALLBACK_REFRESH_DELAY
    }
}

/// The delay between attempts of the bounded initial fetch
fn attempt_retry_delay(
    override_delay: Option<Duration>,
    status: Option<u16>,
    retry_after: Option<u64>,
) -> Duration {
    if let Some(delay) = override_delay {
        if !delay.is_zero() {
            return delay;
        }
    }
    if status == Some(429) {
        if let Some(secs) = retry_after {
            if secs > 0 {
                return Duration::from_secs(secs);
            }
        }
    }
    DEFAULT_RETRY_DELAY
}

fn ensure_crn_prefix(desired_iam_id: &str) -> String {
    if desired_iam_id.starts_with(DELEGATION_PREFIX) {
        desired_iam_id.to_owned()
    } else {
        format!("{DELEGATION_PREFIX}{desired_iam_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::TestClock;

    #[test]
    fn refresh_delay_prefers_the_override() {
        let window = Some((UnixTime(1_000), UnixTime(4_600)));
        assert_eq!(next_refresh_delay(600, 0.75, window), DurationSecs(600));
    }

    #[test]
    fn refresh_delay_derives_from_claims() {
        let window = Some((UnixTime(1_000), UnixTime(4_600)));
        assert_eq!(next_refresh_delay(0, 0.75, window), DurationSecs(2_700));
        assert_eq!(next_refresh_delay(0, 0.5, window), DurationSecs(1_800));
    }

    #[test]
    fn refresh_delay_falls_back_without_claims() {
        assert_eq!(next_refresh_delay(0, 0.75, None), DurationSecs(300));
    }

    #[test]
    fn failure_delay_is_capped() {
        assert_eq!(failure_refresh_delay(0), DurationSecs(300));
        assert_eq!(failure_refresh_delay(60), DurationSecs(60));
        assert_eq!(failure_refresh_delay(3_600), DurationSecs(300));
    }

    #[test]
    fn retry_delay_precedence() {
        let override_delay = Some(Duration::from_secs(2));

        // override wins over Retry-After and the default
        assert_eq!(
            attempt_retry_delay(override_delay, Some(429), Some(30)),
            Duration::from_secs(2)
        );
        // a positive Retry-After on 429 wins over the default
        assert_eq!(
            attempt_retry_delay(None, Some(429), Some(30)),
            Duration::from_secs(30)
        );
        // Retry-After is ignored off the 429 path
        assert_eq!(
            attempt_retry_delay(None, Some(500), Some(30)),
            DEFAULT_RETRY_DELAY
        );
        // a zero override falls through
        assert_eq!(
            attempt_retry_delay(Some(Duration::ZERO), Some(500), None),
            DEFAULT_RETRY_DELAY
        );
    }

    #[test]
    fn crn_prefixing() {
        assert_eq!(ensure_crn_prefix("iam-ServiceId-1"), "crn-iam-ServiceId-1");
        assert_eq!(ensure_crn_prefix("crn-already"), "crn-already");
    }

    #[test]
    fn build_rejects_empty_api_key() {
        let err = Inner::build(
            ApiKey::new("".to_string()),
            Environment::Production,
            TokenManagerConfig::default(),
            System,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingApiKey));
    }

    #[test]
    fn build_rejects_bad_fraction() {
        for fraction in [0.0, -0.5, 1.5] {
            let err = Inner::build(
                ApiKey::new("key".to_string()),
                Environment::Production,
                TokenManagerConfig {
                    lifetime_fraction: Some(fraction),
                    ..TokenManagerConfig::default()
                },
                System,
            )
            .unwrap_err();
            assert!(matches!(err, Error::InvalidLifetimeFraction(_)));
        }
    }

    fn manager_with_clock(clock: TestClock) -> TokenManager<TestClock> {
        let inner = Inner::build(
            ApiKey::new("key".to_string()),
            Environment::Custom,
            TokenManagerConfig {
                token_endpoint: Some("http://localhost/identity/token".into()),
                key_endpoint: Some("http://localhost/identity/keys".into()),
                ..TokenManagerConfig::default()
            },
            clock,
        )
        .unwrap();
        TokenManager {
            inner: Arc::new(inner),
        }
    }

    fn install(manager: &TokenManager<TestClock>, token: &str, exp: UnixTime) {
        let mut current = manager
            .inner
            .current
            .write()
            .expect("token slot lock poisoned");
        current.token = Some(AccessToken::new(token.to_string()));
        current.claims = Some(Claims {
            exp: Some(exp),
            ..Claims::default()
        });
    }

    #[test]
    fn token_serves_while_current() {
        let manager = manager_with_clock(TestClock::new(UnixTime(1_000)));
        install(&manager, "tok", UnixTime(1_200));
        assert_eq!(manager.token().unwrap().as_str(), "tok");
    }

    #[test]
    fn token_reports_expiry_from_the_clock() {
        let manager = manager_with_clock(TestClock::new(UnixTime(1_000)));
        install(&manager, "tok", UnixTime(900));
        let err = manager.token().unwrap_err();
        assert!(err.to_string().contains("token is expired by 100s"));
    }

    #[test]
    fn token_without_any_fetch_is_uninitialized() {
        let manager = manager_with_clock(TestClock::new(UnixTime(1_000)));
        assert!(matches!(manager.token(), Err(Error::Uninitialized)));
    }

    #[test]
    fn token_surfaces_the_last_recorded_error() {
        let manager = manager_with_clock(TestClock::new(UnixTime(1_000)));
        manager.inner.record_error(Arc::new(Error::MissingApiKey));
        let err = manager.token().unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[test]
    fn build_rejects_custom_without_endpoints() {
        let err = Inner::build(
            ApiKey::new("key".to_string()),
            Environment::Custom,
            TokenManagerConfig::default(),
            System,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingEndpoints));
    }
}
