// src/token_client.rs

use crate::config::Config;
use crate::error::RealmGateError;
use crate::model::TokenResponse;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

/// Client for the realm's token and logout endpoints.
///
/// Covers the flows a backend runs on behalf of its users: exchanging a
/// username and password for tokens, refreshing them, and ending the session.
#[derive(Clone)]
pub struct TokenClient {
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    token_url: Url,
    logout_url: Url,
    client_id: String,
    client_secret: Option<String>,
}

impl TokenClient {
    /// Creates a `TokenClient`.
    ///
    /// # Errors
    ///
    /// Returns `MissingConfiguration("client_id")` when no client is configured.
    pub fn new(config: &Config) -> Result<Self, RealmGateError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or(RealmGateError::MissingConfiguration("client_id".to_string()))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.key_cache.fetch_timeout)
            .build()
            .map_err(|e| {
                RealmGateError::InvalidConfiguration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                token_url: config.token_url()?,
                logout_url: config.logout_url()?,
                client_id,
                client_secret: config.client_secret.clone(),
            }),
        })
    }

    /// Exchanges user credentials for tokens (`grant_type=password`).
    #[instrument(skip(self, password), err)]
    pub async fn password_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, RealmGateError> {
        if username.is_empty() || password.is_empty() {
            return Err(RealmGateError::InvalidRequest(
                "username and password are required".to_string(),
            ));
        }
        self.token_request(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ])
        .await
    }

    /// Exchanges a refresh token for new tokens (`grant_type=refresh_token`).
    #[instrument(skip(self, refresh_token), err)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, RealmGateError> {
        if refresh_token.is_empty() {
            return Err(RealmGateError::InvalidRequest("missing refresh token".to_string()));
        }
        self.token_request(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
    }

    /// Ends the session the access token belongs to.
    #[instrument(skip(self, access_token), err)]
    pub async fn logout(&self, access_token: &str) -> Result<(), RealmGateError> {
        let response = self
            .inner
            .http_client
            .post(self.inner.logout_url.clone())
            .bearer_auth(access_token)
            .form(&self.client_form(&[]))
            .send()
            .await
            .map_err(|e| RealmGateError::HttpError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Logout rejected by provider: {}", status);
            return Err(RealmGateError::TokenEndpoint { status: status.as_u16() });
        }
        debug!("Session logged out");
        Ok(())
    }

    fn client_form<'a>(&'a self, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut form = vec![("client_id", self.inner.client_id.as_str())];
        if let Some(secret) = &self.inner.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        form.extend_from_slice(extra);
        form
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, RealmGateError> {
        let response = self
            .inner
            .http_client
            .post(self.inner.token_url.clone())
            .form(&self.client_form(params))
            .send()
            .await
            .map_err(|e| RealmGateError::HttpError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Token endpoint rejected the request: {}", status);
            return Err(RealmGateError::TokenEndpoint { status: status.as_u16() });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RealmGateError::HttpError(format!("malformed token response: {e}")))
    }
}
