// src/lib.rs

//! Bearer-token authentication for services behind a Keycloak-style realm.
//!
//! - [`client::JwksClient`] fetches and caches the realm's signing keys.
//! - [`validator::Validator`] verifies a token against those keys, the
//!   configured issuer and a given instant.
//! - [`gate::AuthGate`] turns an `Authorization` header into an
//!   [`gate::AuthenticatedIdentity`] or a 401 rejection.
//! - [`token_client::TokenClient`] runs the password, refresh and logout flows.

pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod model;
pub mod token_client;
pub mod validator;

#[cfg(feature = "axum-integration")]
pub mod axum_layer;

/// The public prelude for the `realm-gate` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    #[cfg(feature = "axum-integration")]
    pub use crate::axum_layer::{AuthLayer, AuthService};
    pub use crate::client::JwksClient;
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::error::{InvalidTokenReason, RealmGateError};
    pub use crate::gate::{AuthGate, AuthenticatedIdentity, RejectReason, Unauthorized};
    pub use crate::model::TokenResponse;
    pub use crate::token_client::TokenClient;
    pub use crate::validator::{Claims, Validator};
    pub use jsonwebtoken::Algorithm;
}
