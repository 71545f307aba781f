//! User management (admin only) and the one-time admin bootstrap

use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::models::{InitAdminRequest, SetApprovalRequest};
use super::validators::CreateUserValidator;
use crate::auth::models::Profile;
use crate::backend::{CreateUserRequest, DataStore, Provisioner, Query, Table};
use crate::common::{safe_email_log, ApiError, AppState, Validator};
use crate::gate::AdminOnly;
use crate::sync::{fetch_once, ListSource};

/// Operator profiles, newest first
pub struct ProfileSource {
    pub limit: usize,
}

impl ListSource for ProfileSource {
    type Row = Profile;

    fn query(&self) -> Query {
        Query::table(Table::Profiles)
            .order_desc("created_at")
            .limit(self.limit)
    }
}

pub async fn set_approval(
    store: &dyn DataStore,
    profile_id: &str,
    approved: bool,
) -> Result<Profile, ApiError> {
    let row = store
        .update(Table::Profiles, profile_id, json!({ "is_approved": approved }))
        .await?;
    let profile: Profile = serde_json::from_value(row)
        .map_err(|e| ApiError::InternalServer(format!("unreadable profile row: {}", e)))?;
    info!(
        profile_id = %profile.id,
        user_id = %profile.user_id,
        approved = approved,
        "Operator approval changed"
    );
    Ok(profile)
}

/// Validates, then provisions through the `admin-create-user` function.
pub async fn create_user(
    provisioner: &dyn Provisioner,
    request: &CreateUserRequest,
) -> Result<(), ApiError> {
    CreateUserValidator.validate(request).into_result()?;

    let request = CreateUserRequest {
        email: request.email.trim().to_lowercase(),
        password: request.password.clone(),
        full_name: request.full_name.trim().to_string(),
        username: request.username.trim().to_string(),
    };
    provisioner.create_user(&request).await?.into_result()?;
    info!(email = %safe_email_log(&request.email), "Operator account created");
    Ok(())
}

/// GET /api/admin/users
pub async fn list_users(
    AdminOnly(_session): AdminOnly,
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let source = ProfileSource {
        limit: state.config.list_limit,
    };
    let profiles = fetch_once(state.store.as_ref(), &source, state.config.request_timeout).await?;
    let pending = profiles.iter().filter(|p| !p.is_approved).count();

    Ok(Json(json!({
        "profiles": profiles,
        "pending": pending,
    })))
}

/// POST /api/admin/users
///
/// # Request Body
/// ```json
/// {
///   "email": "analyst@atiews.gov",
///   "password": "at least 8 chars",
///   "full_name": "Analyst One",
///   "username": "analyst"
/// }
/// ```
pub async fn create_user_handler(
    AdminOnly(_session): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    create_user(state.provisioner.as_ref(), &payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "User created successfully" })),
    ))
}

/// POST /api/admin/users/:id/approval
pub async fn set_approval_handler(
    AdminOnly(_session): AdminOnly,
    Extension(state): Extension<AppState>,
    Path(profile_id): Path<String>,
    Json(payload): Json<SetApprovalRequest>,
) -> Result<Json<Profile>, ApiError> {
    let profile = set_approval(state.store.as_ref(), &profile_id, payload.is_approved).await?;
    Ok(Json(profile))
}

/// POST /api/setup/init-admin
///
/// Ungated: nobody can sign in before the first admin exists.
pub async fn init_admin_handler(
    Extension(state): Extension<AppState>,
    Json(payload): Json<InitAdminRequest>,
) -> Result<Json<Value>, ApiError> {
    if payload.secret.trim().is_empty() {
        return Err(ApiError::ValidationError("secret: Secret is required".to_string()));
    }
    let response = state
        .provisioner
        .init_admin(&payload.secret)
        .await?
        .into_result()
        .map_err(|e| {
            warn!(error = %e, "Admin bootstrap refused");
            ApiError::from(e)
        })?;

    Ok(Json(json!({
        "success": true,
        "message": response.message,
    })))
}
