// src/views/routes.rs

use axum::{
    routing::{get, post},
    Router,
};

use super::{admin_users, communications, dashboard, incidents, live, threats};

/// Create the router for every console view
pub fn views_routes() -> Router {
    Router::new()
        // Operator views
        .route("/api/dashboard", get(dashboard::dashboard_handler))
        .route("/api/threats", get(threats::list_threats))
        .route("/api/communications", get(communications::list_communications))
        .route(
            "/api/communications/:id/review",
            post(communications::review_communication),
        )
        .route(
            "/api/incidents",
            get(incidents::list_incidents).post(incidents::report_incident),
        )
        // Admin views
        .route(
            "/api/admin/users",
            get(admin_users::list_users).post(admin_users::create_user_handler),
        )
        .route(
            "/api/admin/users/:id/approval",
            post(admin_users::set_approval_handler),
        )
        // Bootstrap, reachable before anyone can sign in
        .route("/api/setup/init-admin", post(admin_users::init_admin_handler))
        // Live list views
        .route("/ws/views/:view", get(live::live_view_handler))
}
