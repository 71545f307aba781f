//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /api/auth/sign-in` - Password sign-in
/// - `POST /api/auth/sign-out` - Sign-out (local first, remote best effort)
/// - `GET /api/session` - Current session snapshot with navigation
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/sign-in", post(handlers::sign_in_handler))
        .route("/api/auth/sign-out", post(handlers::sign_out_handler))
        .route("/api/session", get(handlers::session_handler))
}
