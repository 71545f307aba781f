// src/main.rs
use axum::{extract::Extension, middleware, Router};
use dotenv::dotenv;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// MODULE IMPORTS
// ============================================================================

mod auth;
mod backend;
mod common;
mod gate;
mod logging_middleware;
mod sync;
mod views;

// ============================================================================
// COMMON IMPORTS
// ============================================================================

use auth::SessionStore;
use common::config::print_backend_status;
use common::{AppConfig, AppState};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // ========================================================================
    // ENVIRONMENT CONFIGURATION
    // ========================================================================

    let config = AppConfig::from_env();
    print_backend_status(&config);

    // ========================================================================
    // BACKEND AND SESSION
    // ========================================================================

    let backends = backend::connect(&config).await?;
    info!(backend = ?config.backend, "Backend connected");

    let session = SessionStore::start(
        backends.auth.clone(),
        backends.store.clone(),
        config.request_timeout,
    );
    info!("Session store started");

    // ========================================================================
    // APPLICATION STATE
    // ========================================================================

    let port = config.port;
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let app_state = AppState {
        config: Arc::new(config),
        session,
        store: backends.store,
        feed: backends.feed,
        provisioner: backends.provisioner,
    };

    // ========================================================================
    // ROUTER COMPOSITION
    // ========================================================================

    let app = Router::new()
        // Sign-in, sign-out and the session snapshot
        .merge(auth::auth_routes())
        // Dashboard, threat map, comms monitor, incidents, user management, live views
        .merge(views::views_routes())
        // ====================================================================
        // MIDDLEWARE AND LAYERS
        // ====================================================================
        .layer(middleware::from_fn(logging_middleware::log_request_response))
        .layer(Extension(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                    axum::http::HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true),
        )
        .layer(TraceLayer::new_for_http());

    // ========================================================================
    // SERVER STARTUP
    // ========================================================================

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
