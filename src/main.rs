// This is the entry point of the Drive image proxy.
//
// **Architecture Overview:**
// - `core/` = Business logic (token model, file proxy rules)
// - `infra/` = Implementations of core traits (Google OAuth, Drive API)
// - `web/` = HTTP adapter (axum routes, error responses)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Serve HTTP until Ctrl-C

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "web/web_layer.rs"]
mod web;

mod config;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, ServiceAccountSource};
use crate::core::auth::{AccessTokenProvider, CachedTokenProvider};
use crate::core::proxy::FileProxyService;
use crate::infra::google_drive::{build_http_client, DriveFileStore, ServiceAccountAuth};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists) before the
    // log filter is read
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // One shared HTTP client, one authenticator, one Drive store.

    let client = build_http_client(config.upstream_timeout)
        .context("Failed to build HTTP client")?;

    let auth = match &config.service_account {
        ServiceAccountSource::Json(json) => ServiceAccountAuth::from_json(json, client.clone()),
        ServiceAccountSource::File(path) => {
            ServiceAccountAuth::from_file(path, client.clone()).await
        }
    }
    .context("Failed to load service account credentials")?
    .with_timeout(config.upstream_timeout);

    tracing::info!(
        client_email = auth.client_email(),
        token_cache = config.token_cache,
        "Loaded service account"
    );

    let tokens: Box<dyn AccessTokenProvider> = if config.token_cache {
        Box::new(CachedTokenProvider::new(auth))
    } else {
        Box::new(auth)
    };

    let store = DriveFileStore::new(
        client,
        config.drive_api_base_url.clone(),
        config.upstream_timeout,
    );
    let proxy = Arc::new(FileProxyService::new(tokens, store));

    // ========================================================================
    // HTTP SERVER
    // ========================================================================

    let app = web::router(proxy);
    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    tracing::info!("Google Drive proxy listening on {}", bind_address);
    tracing::info!("Usage: GET /img/{{FILE_ID}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
