//! Authentication handlers

use axum::extract::{Extension, Json};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::models::SignInRequest;
use crate::common::validation::is_valid_email;
use crate::common::{safe_email_log, ApiError, AppState, ValidationResult, Validator};
use crate::gate::{self, DEFAULT_PATH, LOGIN_PATH};

pub struct SignInValidator;

impl Validator<SignInRequest> for SignInValidator {
    fn validate(&self, data: &SignInRequest) -> ValidationResult {
        let mut result = ValidationResult::new();
        if result.require("email", &data.email, "Email") && !is_valid_email(data.email.trim()) {
            result.add_error("email", "Email address is not valid");
        }
        if data.password.is_empty() {
            result.add_error("password", "Password is required");
        }
        result
    }
}

/// POST /api/auth/sign-in
///
/// # Request Body
/// ```json
/// { "email": "operator@atiews.gov", "password": "..." }
/// ```
///
/// # Response
/// ```json
/// { "identity": { "id": "...", "email": "..." }, "redirect": "/dashboard" }
/// ```
pub async fn sign_in_handler(
    Extension(state): Extension<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<Value>, ApiError> {
    SignInValidator.validate(&payload).into_result()?;

    let identity = state
        .session
        .sign_in(payload.email.trim(), &payload.password)
        .await
        .map_err(|e| {
            warn!(email = %safe_email_log(&payload.email), error = %e, "Sign-in rejected");
            ApiError::from(e)
        })?;

    Ok(Json(json!({
        "identity": identity,
        "redirect": DEFAULT_PATH,
    })))
}

/// POST /api/auth/sign-out
pub async fn sign_out_handler(Extension(state): Extension<AppState>) -> Json<Value> {
    let user_id = state.session.current().user_id().map(str::to_string);
    state.session.sign_out().await;
    info!(user_id = ?user_id, "Operator signed out");
    Json(json!({ "redirect": LOGIN_PATH }))
}

/// GET /api/session
///
/// Session snapshot for the shell: phase, identity, profile, role and the
/// navigation the operator may see. Never gated.
pub async fn session_handler(Extension(state): Extension<AppState>) -> Json<Value> {
    let session = state.session.current();
    Json(json!({
        "phase": session.phase(),
        "identity": session.identity,
        "profile": session.profile,
        "is_admin": session.is_admin,
        "is_loading": session.is_loading,
        "nav": gate::navigation(&session),
    }))
}
