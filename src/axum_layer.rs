// src/axum_layer.rs

//! `tower` middleware and extractor for `axum` applications.
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use realm_gate::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = AuthGate::from_config(Config::from_env()?)?;
//! let app: Router = Router::new()
//!     .route("/me", get(|identity: AuthenticatedIdentity| async move { identity.subject }))
//!     .layer(AuthLayer::new(gate));
//! # Ok(())
//! # }
//! ```

use crate::gate::{AuthGate, AuthenticatedIdentity, RejectReason, Unauthorized};
use axum::extract::{FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Reads the identity [`AuthLayer`] attached to the request.
///
/// The extractor never verifies a token itself. On a route without the layer
/// every request is rejected with 401, whatever its `Authorization` header.
impl<S> FromRequestParts<S> for AuthenticatedIdentity
where
    S: Send + Sync,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<AuthenticatedIdentity>() {
            return Ok(identity.clone());
        }
        if parts.headers.contains_key(AUTHORIZATION) {
            warn!("AuthenticatedIdentity extracted on {} without AuthLayer", parts.uri.path());
        }
        Err(Unauthorized::new(RejectReason::MissingHeader))
    }
}

/// Runs [`AuthGate`] in front of the wrapped service.
#[derive(Clone)]
pub struct AuthLayer {
    gate: AuthGate,
}

impl AuthLayer {
    pub fn new(gate: AuthGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    gate: AuthGate,
}

impl<S> Service<Request> for AuthService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // Call the service that was polled ready, leave the clone behind.
        let inner_clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner_clone);

        let gate = self.gate.clone();
        Box::pin(async move {
            match gate.authenticate_request(&mut req).await {
                Ok(()) => inner.call(req).await,
                Err(rejection) => Ok(rejection.into_response()),
            }
        })
    }
}
