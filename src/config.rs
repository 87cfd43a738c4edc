// src/config.rs

use crate::error::RealmGateError;
use jsonwebtoken::Algorithm;
use std::fmt;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const ENV_SERVER_URL: &str = "KEYCLOAK_SERVER_URL";
pub const ENV_REALM_NAME: &str = "KEYCLOAK_REALM_NAME";
pub const ENV_CLIENT_ID: &str = "KEYCLOAK_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "KEYCLOAK_CLIENT_SECRET";
pub const ENV_STRICT_BEARER: &str = "KEYCLOAK_STRICT_BEARER";
pub const ENV_LEEWAY_SECS: &str = "KEYCLOAK_LEEWAY_SECS";
pub const ENV_JWKS_TIMEOUT_SECS: &str = "KEYCLOAK_JWKS_TIMEOUT_SECS";

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
pub const DEFAULT_REALM_NAME: &str = "master";

/// Contains the validation settings applied to every bearer token.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The signing algorithms that are permitted.
    /// Tokens signed with any other algorithm will be rejected.
    pub algorithms: Vec<Algorithm>,
    /// Tolerance added to `exp` before a token counts as expired.
    /// Defaults to zero: a token expires the second its `exp` is reached.
    pub leeway: Duration,
    /// When set, the token's `aud` claim must contain this value.
    pub audience: Option<String>,
    /// When set, the `Authorization` header must use the `Bearer` scheme.
    /// Otherwise a bare token without any scheme is accepted as well.
    pub strict_bearer: bool,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            // Keycloak realms sign with RS256 unless reconfigured.
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::ZERO,
            audience: None,
            strict_bearer: false,
        }
    }
}

/// How the realm's key set is fetched and kept.
#[derive(Clone, Debug)]
pub struct KeyCacheConfig {
    /// Upper bound on a single key-set request.
    pub fetch_timeout: Duration,
    /// After a failed fetch, further calls fail fast for this long.
    pub retry_backoff: Duration,
    /// Refetch the key set once when a token names a key ID that is not cached.
    pub refresh_on_unknown_kid: bool,
    /// A cached key set younger than this is never refetched for an unknown key ID.
    pub min_refresh_interval: Duration,
    /// Expire the cached key set after this long. `None` keeps it for the
    /// lifetime of the client.
    pub cache_ttl: Option<Duration>,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(5),
            refresh_on_unknown_kid: true,
            min_refresh_interval: Duration::from_secs(30),
            cache_ttl: None,
        }
    }
}

/// Identity provider configuration.
///
/// Holds the realm coordinates from which the issuer, key-set, token and
/// logout URLs are derived. Construct it with [`ConfigBuilder`] or
/// [`Config::from_env`]; it is not meant to change after startup.
#[derive(Clone)]
pub struct Config {
    server_url: String,
    realm_name: String,
    issuer_url: String,
    key_set_url: Url,
    /// The client ID registered with the realm. Only the token endpoint flows need it.
    pub client_id: Option<String>,
    /// The client secret for confidential clients.
    pub client_secret: Option<String>,
    /// The specific validation parameters to apply to tokens.
    pub validation: ValidationDetails,
    /// Key-set fetching and caching parameters.
    pub key_cache: KeyCacheConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("realm_name", &self.realm_name)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("validation", &self.validation)
            .field("key_cache", &self.key_cache)
            .finish()
    }
}

impl Config {
    /// Base URL of the identity provider, without a trailing slash.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn realm_name(&self) -> &str {
        &self.realm_name
    }

    /// `{server_url}/realms/{realm_name}`. Tokens must carry exactly this `iss`.
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    /// `{issuer_url}/protocol/openid-connect/certs`.
    pub fn key_set_url(&self) -> &Url {
        &self.key_set_url
    }

    pub fn token_url(&self) -> Result<Url, RealmGateError> {
        endpoint(&self.issuer_url, "token")
    }

    pub fn logout_url(&self) -> Result<Url, RealmGateError> {
        endpoint(&self.issuer_url, "logout")
    }

    /// Reads the configuration from the process environment.
    ///
    /// See [`Config::from_lookup`] for the recognised variables.
    pub fn from_env() -> Result<Self, RealmGateError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from a variable lookup function.
    ///
    /// `KEYCLOAK_SERVER_URL` defaults to `http://localhost:8080` and
    /// `KEYCLOAK_REALM_NAME` to `master`. Client credentials are optional.
    /// `KEYCLOAK_STRICT_BEARER`, `KEYCLOAK_LEEWAY_SECS` and
    /// `KEYCLOAK_JWKS_TIMEOUT_SECS` override the validation defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RealmGateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let server_url = get(ENV_SERVER_URL).unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let realm_name = get(ENV_REALM_NAME).unwrap_or_else(|| {
            warn!(
                "{} is not set, falling back to realm '{}'. Set it explicitly in production.",
                ENV_REALM_NAME, DEFAULT_REALM_NAME
            );
            DEFAULT_REALM_NAME.to_string()
        });

        let mut builder = ConfigBuilder::new()
            .server_url(&server_url)?
            .realm_name(realm_name);

        if let Some(client_id) = get(ENV_CLIENT_ID) {
            builder = builder.client_id(client_id);
        }
        if let Some(secret) = get(ENV_CLIENT_SECRET) {
            builder = builder.client_secret(secret);
        }
        if let Some(strict) = get(ENV_STRICT_BEARER) {
            builder = builder.strict_bearer(parse_bool(ENV_STRICT_BEARER, &strict)?);
        }
        if let Some(secs) = get(ENV_LEEWAY_SECS) {
            builder = builder.leeway(Duration::from_secs(parse_secs(ENV_LEEWAY_SECS, &secs)?));
        }
        if let Some(secs) = get(ENV_JWKS_TIMEOUT_SECS) {
            let timeout = parse_secs(ENV_JWKS_TIMEOUT_SECS, &secs)?;
            builder = builder.fetch_timeout(Duration::from_secs(timeout));
        }

        builder.build()
    }
}

fn endpoint(issuer_url: &str, leaf: &str) -> Result<Url, RealmGateError> {
    Url::parse(&format!("{issuer_url}/protocol/openid-connect/{leaf}"))
        .map_err(|e| RealmGateError::InvalidUrl(e.to_string()))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, RealmGateError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RealmGateError::InvalidConfiguration(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_secs(name: &str, value: &str) -> Result<u64, RealmGateError> {
    value.trim().parse::<u64>().map_err(|_| {
        RealmGateError::InvalidConfiguration(format!(
            "{name} must be a whole number of seconds, got '{value}'"
        ))
    })
}

/// A builder for creating a `Config` instance.
///
/// The server URL and realm name are required; everything else has a default.
#[derive(Default)]
pub struct ConfigBuilder {
    server_url: Option<Url>,
    realm_name: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    validation: ValidationDetails,
    key_cache: KeyCacheConfig,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL of the identity provider, e.g. `http://localhost:8080`.
    pub fn server_url(mut self, url: &str) -> Result<Self, RealmGateError> {
        let parsed_url = Url::parse(url).map_err(|e| RealmGateError::InvalidUrl(e.to_string()))?;
        if parsed_url.cannot_be_a_base() {
            return Err(RealmGateError::InvalidUrl(format!("{url} cannot be used as a base URL")));
        }
        self.server_url = Some(parsed_url);
        Ok(self)
    }

    /// Sets the realm (tenant) name.
    pub fn realm_name(mut self, realm_name: impl Into<String>) -> Self {
        self.realm_name = Some(realm_name.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Sets the allowed signing algorithms.
    /// Defaults to `[Algorithm::RS256]` if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance applied to `exp`.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Requires the token's `aud` claim to contain `audience`.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.validation.audience = Some(audience.into());
        self
    }

    pub fn strict_bearer(mut self, strict: bool) -> Self {
        self.validation.strict_bearer = strict;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.key_cache.fetch_timeout = timeout;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.key_cache.retry_backoff = backoff;
        self
    }

    /// Controls the key-set refetch on an unknown key ID and how often it may happen.
    pub fn refresh_on_unknown_kid(mut self, enabled: bool, min_interval: Duration) -> Self {
        self.key_cache.refresh_on_unknown_kid = enabled;
        self.key_cache.min_refresh_interval = min_interval;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.key_cache.cache_ttl = Some(ttl);
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if `server_url` or `realm_name` is missing, the realm
    /// name is blank, or no algorithm is allowed.
    pub fn build(self) -> Result<Config, RealmGateError> {
        let server_url = self
            .server_url
            .ok_or(RealmGateError::MissingConfiguration("server_url".to_string()))?;
        let realm_name = self
            .realm_name
            .ok_or(RealmGateError::MissingConfiguration("realm_name".to_string()))?;

        let realm_name = realm_name.trim().to_string();
        if realm_name.is_empty() || realm_name.contains('/') {
            return Err(RealmGateError::InvalidConfiguration(format!(
                "realm_name '{realm_name}' must be non-empty and contain no '/'"
            )));
        }
        if self.validation.algorithms.is_empty() {
            return Err(RealmGateError::InvalidConfiguration(
                "at least one signing algorithm must be allowed".to_string(),
            ));
        }

        let server_url = server_url.as_str().trim_end_matches('/').to_string();
        let issuer_url = format!("{server_url}/realms/{realm_name}");
        let key_set_url = endpoint(&issuer_url, "certs")?;

        Ok(Config {
            server_url,
            realm_name,
            issuer_url,
            key_set_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            validation: self.validation,
            key_cache: self.key_cache,
        })
    }
}
