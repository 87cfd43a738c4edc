// src/error.rs

use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use thiserror::Error;

/// The primary error type for the `realm-gate` library.
///
/// The type is `Clone` so that a single failed key-set fetch can be handed to
/// every caller that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RealmGateError {
    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The provider's key set could not be fetched or parsed.
    /// Transient: a later call may succeed.
    #[error("Key set unavailable: {0}")]
    KeySetUnavailable(String),

    /// The token is malformed, badly signed, or carries claims that do not
    /// match the configuration.
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] InvalidTokenReason),

    /// The token verified but its lifetime has lapsed.
    #[error("Token expired at {expired_at}")]
    ExpiredToken { expired_at: DateTime<Utc> },

    /// A token endpoint call was attempted with missing inputs.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The provider's token or logout endpoint answered with a non-success status.
    #[error("Token endpoint returned HTTP {status}")]
    TokenEndpoint { status: u16 },

    /// An HTTP request to the provider failed outside of key-set fetching.
    #[error("HTTP request error: {0}")]
    HttpError(String),
}

impl RealmGateError {
    /// Whether retrying later with the same input can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::KeySetUnavailable(_) | Self::HttpError(_))
    }
}

/// Why a token was rejected as invalid.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvalidTokenReason {
    #[error("token is empty")]
    Empty,

    #[error("token is malformed: {0}")]
    Malformed(String),

    /// The JWT header is missing the 'kid' (Key ID) field.
    #[error("the JWT header is missing the 'kid' (Key ID) field")]
    MissingKeyId,

    #[error("unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// No key with this ID exists in the provider's key set.
    #[error("no key found for kid: {0}")]
    UnknownKeyId(String),

    /// The key's declared `alg` disagrees with the token header.
    #[error("key {kid} is for {expected:?}, token uses {actual:?}")]
    AlgorithmMismatch {
        kid: String,
        expected: Algorithm,
        actual: Algorithm,
    },

    #[error("signature or claim decoding failed: {0}")]
    Signature(String),

    #[error("required claim is missing: {0}")]
    MissingClaim(String),

    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    #[error("audience mismatch")]
    AudienceMismatch,
}

impl From<jsonwebtoken::errors::Error> for InvalidTokenReason {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::MissingRequiredClaim(claim) => Self::MissingClaim(claim.clone()),
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => Self::Malformed(err.to_string()),
            _ => Self::Signature(err.to_string()),
        }
    }
}
