// src/gate.rs

//! Request authentication.
//!
//! [`AuthGate`] is the pre-handler step every protected operation goes through:
//! it reads the `Authorization` header, verifies the token and either yields an
//! [`AuthenticatedIdentity`] or an [`Unauthorized`] rejection. The specific
//! verification failure is logged, never returned to the caller.

use crate::config::Config;
use crate::error::RealmGateError;
use crate::validator::{Claims, Validator};
use chrono::{DateTime, Utc};
use http::header::AUTHORIZATION;
use http::{HeaderMap, Request, StatusCode};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, error, warn};

/// The caller of a request, as established by a verified token.
///
/// Lives in the request's extensions for the duration of that request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    pub subject: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub roles: BTreeSet<String>,
}

impl AuthenticatedIdentity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

impl From<Claims> for AuthenticatedIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.subject,
            email: claims.email,
            username: claims.preferred_username,
            roles: claims.roles,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingHeader,
    MalformedHeader,
    /// Any verifier failure: bad token, expired token, or unavailable keys.
    InvalidToken,
    /// The token verified but names no subject.
    MalformedIdentity,
}

impl RejectReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingHeader => "missing header",
            Self::MalformedHeader => "malformed header",
            Self::InvalidToken => "invalid token",
            Self::MalformedIdentity => "malformed identity",
        }
    }
}

/// Rejection returned by the gate. Always rendered as HTTP 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unauthorized: {}", .reason.message())]
pub struct Unauthorized {
    pub reason: RejectReason,
}

impl Unauthorized {
    pub fn new(reason: RejectReason) -> Self {
        Self { reason }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    /// `{"message": <reason>}`
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({ "message": self.reason.message() })
    }
}

impl From<RejectReason> for Unauthorized {
    fn from(reason: RejectReason) -> Self {
        Self::new(reason)
    }
}

#[derive(Clone)]
pub struct AuthGate {
    validator: Validator,
}

impl AuthGate {
    pub fn new(validator: Validator) -> Self {
        Self { validator }
    }

    pub fn from_config(config: Config) -> Result<Self, RealmGateError> {
        Ok(Self::new(Validator::new(config)?))
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Authenticates a request by its headers as of the current time.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<AuthenticatedIdentity, Unauthorized> {
        self.authenticate_at(headers, Utc::now()).await
    }

    /// Authenticates a request by its headers as of `now`.
    pub async fn authenticate_at(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedIdentity, Unauthorized> {
        let strict = self.validator.config().validation.strict_bearer;
        let token = extract_token(headers, strict).map_err(|reason| {
            debug!("Rejecting request: {}", reason.message());
            Unauthorized::new(reason)
        })?;

        // The scheme is already gone; a second `Bearer` is part of the token.
        let claims = match self.validator.verify_compact(token, now).await {
            Ok(claims) => claims,
            Err(err @ RealmGateError::KeySetUnavailable(_)) => {
                error!("Cannot authenticate request, provider keys unavailable: {}", err);
                return Err(RejectReason::InvalidToken.into());
            }
            Err(err) => {
                warn!("Token verification failed: {}", err);
                return Err(RejectReason::InvalidToken.into());
            }
        };

        if claims.subject.trim().is_empty() {
            warn!("Verified token carries no subject");
            return Err(RejectReason::MalformedIdentity.into());
        }

        Ok(AuthenticatedIdentity::from(claims))
    }

    /// Authenticates `request` and stores the identity in its extensions.
    pub async fn authenticate_request<B>(
        &self,
        request: &mut Request<B>,
    ) -> Result<(), Unauthorized> {
        let identity = self.authenticate(request.headers()).await?;
        debug!("Authenticated subject {}", identity.subject);
        request.extensions_mut().insert(identity);
        Ok(())
    }

    /// Runs `handler` with the caller's identity, or rejects without running it.
    pub async fn protect<F, Fut, T>(
        &self,
        headers: &HeaderMap,
        handler: F,
    ) -> Result<T, Unauthorized>
    where
        F: FnOnce(AuthenticatedIdentity) -> Fut,
        Fut: Future<Output = T>,
    {
        let identity = self.authenticate(headers).await?;
        Ok(handler(identity).await)
    }
}

/// Takes the token out of the `Authorization` header.
///
/// The value is split on its first space and the scheme dropped. A value
/// without a space is taken as the token itself unless `strict` demands the
/// `Bearer` scheme.
fn extract_token(headers: &HeaderMap, strict: bool) -> Result<&str, RejectReason> {
    let value = headers.get(AUTHORIZATION).ok_or(RejectReason::MissingHeader)?;
    let value = value.to_str().map_err(|_| RejectReason::MalformedHeader)?.trim();
    if value.is_empty() {
        return Err(RejectReason::MalformedHeader);
    }

    match value.split_once(' ') {
        Some((scheme, token)) => {
            if strict && !scheme.eq_ignore_ascii_case("bearer") {
                return Err(RejectReason::MalformedHeader);
            }
            Ok(token.trim())
        }
        None if strict => Err(RejectReason::MalformedHeader),
        None => Ok(value),
    }
}
