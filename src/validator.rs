// src/validator.rs

use crate::client::JwksClient;
use crate::config::Config;
use crate::error::{InvalidTokenReason, RealmGateError};
use crate::model::RawClaims;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// The claims of a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    /// `sub`: the provider-assigned identity. Empty when the token has none.
    pub subject: String,
    pub issuer: String,
    pub expiry: DateTime<Utc>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    /// `realm_access.roles`.
    pub roles: BTreeSet<String>,
    /// `azp`: the client the token was issued to.
    pub authorized_party: Option<String>,
    /// `resource_access.<client>.roles`, keyed by client.
    pub client_roles: BTreeMap<String, BTreeSet<String>>,
}

impl Claims {
    /// Normalizes decoded claims; `expiry` is `raw.exp` already checked to be
    /// a representable instant.
    fn from_raw(raw: RawClaims, expiry: DateTime<Utc>) -> Self {
        Self {
            subject: raw.sub.unwrap_or_default(),
            expiry,
            issuer: raw.iss,
            preferred_username: raw.preferred_username,
            email: raw.email,
            roles: raw
                .realm_access
                .map(|access| access.roles.into_iter().collect())
                .unwrap_or_default(),
            authorized_party: raw.azp,
            client_roles: raw
                .resource_access
                .into_iter()
                .map(|(client, access)| (client, access.roles.into_iter().collect()))
                .collect(),
        }
    }
}

/// Verifies bearer tokens issued by the configured realm.
///
/// This struct is initialized with a `Config` and should be created once
/// and reused for all verification requests. Clones share the key-set cache.
#[derive(Clone)]
pub struct Validator {
    config: Config,
    jwks_client: JwksClient,
}

impl Validator {
    /// Creates a new `Validator` with its own key-set client.
    pub fn new(config: Config) -> Result<Self, RealmGateError> {
        let jwks_client = JwksClient::new(&config)?;
        Ok(Self { config, jwks_client })
    }

    /// Creates a `Validator` around an existing key-set client.
    pub fn with_client(config: Config, jwks_client: JwksClient) -> Self {
        Self { config, jwks_client }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn jwks_client(&self) -> &JwksClient {
        &self.jwks_client
    }

    /// Verifies `token` as of the current time.
    pub async fn verify_now(&self, token: &str) -> Result<Claims, RealmGateError> {
        self.verify(token, Utc::now()).await
    }

    /// Verifies a bearer token as of `now`. A leading `Bearer` scheme is
    /// removed first.
    ///
    /// This method performs:
    /// 1. Shape checks on the token and its header, before any key lookup.
    /// 2. Key lookup by `kid` in the realm's key set.
    /// 3. Signature verification, requiring `exp` and `iss`.
    /// 4. Expiry against `now` (`exp <= now` is expired, plus leeway).
    /// 5. Exact comparison of `iss` with the configured issuer URL.
    ///
    /// # Errors
    ///
    /// `InvalidToken`, `ExpiredToken`, or `KeySetUnavailable` when the
    /// provider's keys cannot be obtained.
    pub async fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, RealmGateError> {
        self.verify_compact(strip_bearer(token), now).await
    }

    /// Verifies a token that has already been taken out of its header value.
    #[instrument(skip(self, token))]
    pub(crate) async fn verify_compact(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims, RealmGateError> {
        if token.is_empty() {
            return Err(InvalidTokenReason::Empty.into());
        }
        check_shape(token)?;

        let header =
            decode_header(token).map_err(|e| InvalidTokenReason::Malformed(e.to_string()))?;
        if !self.config.validation.algorithms.contains(&header.alg) {
            return Err(InvalidTokenReason::UnsupportedAlgorithm(header.alg).into());
        }
        let kid = header.kid.ok_or(InvalidTokenReason::MissingKeyId)?;

        let key = self.jwks_client.get_key(&kid).await?;
        if let Some(expected) = key.algorithm {
            if expected != header.alg {
                return Err(InvalidTokenReason::AlgorithmMismatch {
                    kid,
                    expected,
                    actual: header.alg,
                }
                .into());
            }
        }

        // Expiry and issuer are checked below against the caller's clock and
        // configuration, so the decoder only enforces their presence.
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss"]);
        match &self.config.validation.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let raw = decode::<RawClaims>(token, &key.key, &validation)
            .map_err(InvalidTokenReason::from)?
            .claims;

        let expiry = DateTime::from_timestamp(raw.exp, 0).ok_or_else(|| {
            InvalidTokenReason::Malformed(format!("'exp' is out of range: {}", raw.exp))
        })?;

        let leeway = i64::try_from(self.config.validation.leeway.as_secs()).unwrap_or(i64::MAX);
        if raw.exp.saturating_add(leeway) <= now.timestamp() {
            debug!("Token for kid {} expired at {}", kid, expiry);
            return Err(RealmGateError::ExpiredToken { expired_at: expiry });
        }

        if raw.iss != self.config.issuer_url() {
            return Err(InvalidTokenReason::IssuerMismatch {
                expected: self.config.issuer_url().to_string(),
                actual: raw.iss,
            }
            .into());
        }

        Ok(Claims::from_raw(raw, expiry))
    }
}

/// Removes a leading `Bearer` scheme, if present.
fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => raw,
    }
}

/// A compact JWS has exactly three non-empty segments.
fn check_shape(token: &str) -> Result<(), InvalidTokenReason> {
    let segments = token.split('.').collect::<Vec<_>>();
    if segments.len() != 3 || segments.iter().any(|segment| segment.is_empty()) {
        return Err(InvalidTokenReason::Malformed(format!(
            "expected 3 non-empty segments, found {}",
            segments.len()
        )));
    }
    Ok(())
}
