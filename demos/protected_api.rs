//! A small axum service whose `/api` routes require a realm-issued bearer token.
//!
//! Configure it through `KEYCLOAK_SERVER_URL`, `KEYCLOAK_REALM_NAME` and friends,
//! either in the environment or a `.env` file, then:
//!
//! ```text
//! cargo run --example protected_api
//! curl -H "Authorization: Bearer $TOKEN" localhost:3000/api/me
//! ```

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use realm_gate::prelude::*;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn me(identity: AuthenticatedIdentity) -> Json<AuthenticatedIdentity> {
    Json(identity)
}

async fn professional(identity: AuthenticatedIdentity) -> Result<String, StatusCode> {
    if !identity.has_role("professional") {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(format!("welcome back, {}", identity.username.unwrap_or(identity.subject)))
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "protected_api=info,realm_gate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    info!(issuer = %config.issuer_url(), keys = %config.key_set_url(), "Configuration loaded");

    let gate = AuthGate::from_config(config)?;
    if let Err(e) = gate.validator().jwks_client().prefetch().await {
        warn!("Provider keys not loaded at startup, will retry on first request: {}", e);
    }

    let api = Router::new()
        .route("/me", get(me))
        .route("/professional", get(professional))
        .layer(AuthLayer::new(gate));
    let app = Router::new().route("/health", get(health)).nest("/api", api);

    let addr: SocketAddr = std::env::var("BIND_ADDRESS")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Shut down");
    Ok(())
}
