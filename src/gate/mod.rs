//! # Gate Module
//!
//! The single place that decides whether the current session may see a view.
//! Handlers never decide access themselves; they take a `Protected`
//! or `AdminOnly` extractor, both of which go through [`evaluate`].

pub mod extractors;

#[cfg(test)]
mod tests;

use axum::{
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::auth::models::Session;
use crate::auth::SessionStore;

pub use extractors::{AdminOnly, Protected};

pub const LOGIN_PATH: &str = "/login";
pub const DEFAULT_PATH: &str = "/dashboard";

pub const PENDING_TITLE: &str = "Account Pending Approval";
pub const PENDING_MESSAGE: &str =
    "Your account is awaiting administrator approval. Please contact your system administrator.";

/// Outcome of running a session through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Loading,
    Redirect(&'static str),
    PendingApproval,
    Allow,
}

/// Order matters: loading dominates, then sign-in, then role, then approval.
pub fn evaluate(session: &Session, require_admin: bool) -> AccessDecision {
    if session.is_loading {
        return AccessDecision::Loading;
    }
    if session.identity.is_none() {
        return AccessDecision::Redirect(LOGIN_PATH);
    }
    if require_admin && !session.is_admin {
        return AccessDecision::Redirect(DEFAULT_PATH);
    }
    if !session.is_approved() && !session.is_admin {
        return AccessDecision::PendingApproval;
    }
    AccessDecision::Allow
}

/// A non-`Allow` decision rendered as an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    Loading,
    Redirect(&'static str),
    PendingApproval,
    MissingState,
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::Loading => (
                StatusCode::ACCEPTED,
                Json(json!({ "view": "loading", "message": "Authenticating..." })),
            )
                .into_response(),
            GateRejection::Redirect(location) => (
                StatusCode::SEE_OTHER,
                [(LOCATION, location)],
                Json(json!({ "view": "redirect", "location": location })),
            )
                .into_response(),
            GateRejection::PendingApproval => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "view": "pending_approval",
                    "title": PENDING_TITLE,
                    "message": PENDING_MESSAGE,
                })),
            )
                .into_response(),
            GateRejection::MissingState => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "missing app state", "code": "INTERNAL_SERVER_ERROR" })),
            )
                .into_response(),
        }
    }
}

/// Snapshot of the current session if it passes the gate.
pub fn require(sessions: &SessionStore, require_admin: bool) -> Result<Session, GateRejection> {
    let session = sessions.current();
    match evaluate(&session, require_admin) {
        AccessDecision::Allow => Ok(session),
        AccessDecision::Loading => Err(GateRejection::Loading),
        AccessDecision::Redirect(location) => Err(GateRejection::Redirect(location)),
        AccessDecision::PendingApproval => Err(GateRejection::PendingApproval),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavItem {
    pub label: &'static str,
    pub path: &'static str,
    #[serde(skip)]
    pub admin_only: bool,
}

const NAV: [NavItem; 5] = [
    NavItem { label: "Dashboard", path: "/dashboard", admin_only: false },
    NavItem { label: "Threat Map", path: "/threats", admin_only: false },
    NavItem { label: "Comms Monitor", path: "/communications", admin_only: false },
    NavItem { label: "Incidents", path: "/incidents", admin_only: false },
    NavItem { label: "User Management", path: "/admin/users", admin_only: true },
];

/// Navigation entries the session may see; admin-only items only reach admins.
pub fn navigation(session: &Session) -> Vec<NavItem> {
    if session.identity.is_none() || session.is_loading {
        return Vec::new();
    }
    NAV.iter()
        .filter(|item| !item.admin_only || session.is_admin)
        .cloned()
        .collect()
}
