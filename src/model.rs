// src/model.rs

use serde::Deserialize;
use std::collections::HashMap;

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
///
/// Only the members needed to build RSA and EC verification keys are kept;
/// anything else the provider publishes (certificate chains, thumbprints) is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonWebKey {
    pub kid: Option<String>,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    // RSA
    pub n: Option<String>,
    pub e: Option<String>,
    // EC
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
#[derive(Debug, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// `realm_access` / `resource_access.<client>` claim shape.
#[derive(Debug, Default, Deserialize)]
pub struct RoleClaim {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The token payload as Keycloak issues it.
///
/// `exp` and `iss` are enforced by the decoder before this is built, every
/// other member is optional.
#[derive(Debug, Deserialize)]
pub struct RawClaims {
    pub iss: String,
    pub exp: i64,
    pub sub: Option<String>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    pub azp: Option<String>,
    pub realm_access: Option<RoleClaim>,
    #[serde(default)]
    pub resource_access: HashMap<String, RoleClaim>,
}

/// Successful response of the realm's token endpoint.
#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}
