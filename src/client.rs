// src/client.rs

use crate::config::{Config, KeyCacheConfig};
use crate::error::{InvalidTokenReason, RealmGateError};
use crate::model::{JsonWebKey, JsonWebKeySet};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use moka::future::Cache;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// A public key from the realm's key set, ready for signature checks.
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    /// The `alg` the provider published for this key, if any.
    pub algorithm: Option<Algorithm>,
}

/// A fetched key set: key ID to verification key, plus when it was fetched.
pub struct KeySet {
    keys: HashMap<String, VerificationKey>,
    fetched_at: DateTime<Utc>,
    fetched_instant: Instant,
}

impl KeySet {
    fn from_jwks(jwks: JsonWebKeySet) -> Self {
        let mut keys = HashMap::with_capacity(jwks.keys.len());

        for jwk in jwks.keys {
            let Some(kid) = jwk.kid.clone() else {
                debug!("Skipping JWK without 'kid'");
                continue;
            };
            // Keycloak publishes encryption keys next to the signing keys.
            if jwk.use_purpose.as_deref() == Some("enc") {
                debug!("Skipping encryption key {}", kid);
                continue;
            }
            match verification_key(&jwk) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(reason) => debug!("Skipping JWK {}: {}", kid, reason),
            }
        }

        Self {
            keys,
            fetched_at: Utc::now(),
            fetched_instant: Instant::now(),
        }
    }

    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    fn age(&self) -> Duration {
        self.fetched_instant.elapsed()
    }
}

fn verification_key(jwk: &JsonWebKey) -> Result<VerificationKey, String> {
    let key = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or("RSA key missing 'n' component")?;
            let e = jwk.e.as_deref().ok_or("RSA key missing 'e' component")?;
            DecodingKey::from_rsa_components(n, e).map_err(|e| e.to_string())?
        }
        "EC" => {
            let x = jwk.x.as_deref().ok_or("EC key missing 'x' component")?;
            let y = jwk.y.as_deref().ok_or("EC key missing 'y' component")?;
            DecodingKey::from_ec_components(x, y).map_err(|e| e.to_string())?
        }
        other => return Err(format!("unsupported key type '{other}'")),
    };

    let algorithm = jwk
        .alg
        .as_deref()
        .map(Algorithm::from_str)
        .transpose()
        .map_err(|e| format!("unrecognised 'alg': {e}"))?;

    Ok(VerificationKey { key, algorithm })
}

/// Fetches and caches the realm's JSON Web Key Set.
///
/// The cache belongs to this client; clones share it. Callers that find it
/// empty at the same time share a single fetch. Failed fetches are not cached,
/// and after one, calls fail fast until the retry backoff has passed.
#[derive(Clone)]
pub struct JwksClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    key_set_url: Url,
    settings: KeyCacheConfig,
    // Single entry: the current key set.
    key_cache: Cache<(), Arc<KeySet>>,
    last_failure: Mutex<Option<Instant>>,
    // Held while refreshing for an unknown kid; records the last attempt.
    refresh_lock: Mutex<Option<Instant>>,
}

impl JwksClient {
    /// Creates a new `JwksClient` for the configured realm. Nothing is fetched yet.
    pub fn new(config: &Config) -> Result<Self, RealmGateError> {
        let settings = config.key_cache.clone();

        let http_client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .build()
            .map_err(|e| {
                RealmGateError::InvalidConfiguration(format!("failed to build HTTP client: {e}"))
            })?;

        let mut cache_builder = Cache::builder().max_capacity(1);
        if let Some(ttl) = settings.cache_ttl {
            cache_builder = cache_builder.time_to_live(ttl);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                key_set_url: config.key_set_url().clone(),
                settings,
                key_cache: cache_builder.build(),
                last_failure: Mutex::new(None),
                refresh_lock: Mutex::new(None),
            }),
        })
    }

    pub fn key_set_url(&self) -> &Url {
        &self.inner.key_set_url
    }

    /// Returns the cached key set, fetching it from the provider on a miss.
    ///
    /// # Errors
    ///
    /// `KeySetUnavailable` when the fetch fails or a recent failure is still
    /// within the retry backoff.
    #[instrument(skip(self), err)]
    pub async fn key_set(&self) -> Result<Arc<KeySet>, RealmGateError> {
        if let Some(key_set) = self.inner.key_cache.get(&()).await {
            debug!("Key set cache hit ({} keys)", key_set.len());
            return Ok(key_set);
        }

        if let Some(failed_at) = *self.inner.last_failure.lock().await {
            let since = failed_at.elapsed();
            if since < self.inner.settings.retry_backoff {
                return Err(RealmGateError::KeySetUnavailable(format!(
                    "last fetch failed {since:?} ago, retrying after {:?}",
                    self.inner.settings.retry_backoff
                )));
            }
        }

        debug!("Key set cache miss. Fetching from provider.");
        match self.inner.key_cache.try_get_with((), self.fetch_key_set()).await {
            Ok(key_set) => {
                *self.inner.last_failure.lock().await = None;
                Ok(key_set)
            }
            Err(err) => {
                *self.inner.last_failure.lock().await = Some(Instant::now());
                Err(Arc::unwrap_or_clone(err))
            }
        }
    }

    /// Retrieves the verification key for the given Key ID (`kid`).
    ///
    /// An unknown key ID triggers one refetch of the key set when enabled and
    /// neither the cached set nor the last refetch attempt is younger than the
    /// minimum refresh interval, so rotated provider keys are picked up without
    /// a restart. A failed refetch leaves the cached set in place.
    pub async fn get_key(&self, kid: &str) -> Result<VerificationKey, RealmGateError> {
        let key_set = self.key_set().await?;
        if let Some(key) = key_set.get(kid) {
            debug!("JWK cache hit for kid: {}", kid);
            return Ok(key.clone());
        }

        let unknown =
            || RealmGateError::InvalidToken(InvalidTokenReason::UnknownKeyId(kid.to_string()));

        if !self.inner.settings.refresh_on_unknown_kid {
            return Err(unknown());
        }

        let refreshed = match self.refresh_stale(&key_set).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                warn!("Refetch for unknown kid {} failed, keeping cached key set: {}", kid, err);
                return Err(unknown());
            }
        };
        match refreshed.get(kid) {
            Some(key) => Ok(key.clone()),
            None => {
                warn!("Key not found for kid: {} after refresh", kid);
                Err(unknown())
            }
        }
    }

    /// Warms the cache, e.g. at process start.
    pub async fn prefetch(&self) -> Result<(), RealmGateError> {
        let key_set = self.key_set().await?;
        info!("Key set ready with {} keys", key_set.len());
        Ok(())
    }

    /// Drops the cached key set; the next call fetches again.
    pub async fn invalidate(&self) {
        self.inner.key_cache.invalidate(&()).await;
    }

    /// The cached key set, without fetching.
    pub async fn cached(&self) -> Option<Arc<KeySet>> {
        self.inner.key_cache.get(&()).await
    }

    /// Replaces `seen` with a freshly fetched set unless it, or the last
    /// refetch attempt, is too young, or someone else already replaced it.
    ///
    /// The cached set is only swapped once the new one is in hand.
    async fn refresh_stale(&self, seen: &Arc<KeySet>) -> Result<Arc<KeySet>, RealmGateError> {
        let mut last_attempt = self.inner.refresh_lock.lock().await;
        let min_interval = self.inner.settings.min_refresh_interval;

        if let Some(current) = self.inner.key_cache.get(&()).await {
            let attempted_recently = last_attempt.is_some_and(|at| at.elapsed() < min_interval);
            if !Arc::ptr_eq(&current, seen) || current.age() < min_interval || attempted_recently {
                return Ok(current);
            }
        }

        debug!("Refetching key set for an unknown kid");
        *last_attempt = Some(Instant::now());
        let fresh = self.fetch_key_set().await?;
        self.inner.key_cache.insert((), Arc::clone(&fresh)).await;
        *self.inner.last_failure.lock().await = None;
        Ok(fresh)
    }

    /// Fetches the key set from the provider.
    #[instrument(skip(self), fields(url = %self.inner.key_set_url))]
    async fn fetch_key_set(&self) -> Result<Arc<KeySet>, RealmGateError> {
        let response = self
            .inner
            .http_client
            .get(self.inner.key_set_url.clone())
            .send()
            .await
            .map_err(|e| {
                error!("Failed to fetch key set: {}", e);
                RealmGateError::KeySetUnavailable(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Key set endpoint returned {}", status);
            return Err(RealmGateError::KeySetUnavailable(format!(
                "provider answered HTTP {status}"
            )));
        }

        let jwks: JsonWebKeySet = response.json().await.map_err(|e| {
            error!("Failed to parse key set: {}", e);
            RealmGateError::KeySetUnavailable(format!("malformed key set: {e}"))
        })?;

        let published = jwks.keys.len();
        let key_set = KeySet::from_jwks(jwks);
        info!(
            "Successfully fetched {} keys ({} usable for verification)",
            published,
            key_set.len()
        );

        Ok(Arc::new(key_set))
    }
}
