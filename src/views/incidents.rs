//! Incident reports: the shared feed and the operator's report form

use axum::extract::{Extension, Json};
use axum::http::StatusCode;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::models::{Incident, ReportIncidentRequest};
use super::validators::IncidentValidator;
use crate::auth::models::Identity;
use crate::backend::{DataStore, Query, Table};
use crate::common::{ApiError, AppState, Validator};
use crate::gate::Protected;
use crate::sync::{fetch_once, ListSource};

/// Incident feed, newest first
pub struct IncidentSource {
    pub limit: usize,
}

impl ListSource for IncidentSource {
    type Row = Incident;

    fn query(&self) -> Query {
        Query::table(Table::Incidents)
            .order_desc("created_at")
            .limit(self.limit)
    }
}

pub fn heading(is_admin: bool) -> &'static str {
    if is_admin {
        "All Incident Reports"
    } else {
        "My Incident Reports"
    }
}

/// Validates and inserts a report filed by `reporter`.
pub async fn report(
    store: &dyn DataStore,
    reporter: &Identity,
    request: &ReportIncidentRequest,
) -> Result<Incident, ApiError> {
    IncidentValidator.validate(request).into_result()?;

    let row = json!({
        "title": request.title.trim(),
        "description": request.description.trim(),
        "location": request.location.trim(),
        "severity": request.severity.unwrap_or_default(),
        "latitude": request.latitude,
        "longitude": request.longitude,
        "reported_by": reporter.id,
    });
    let stored = store.insert(Table::Incidents, row).await.map_err(|e| {
        warn!(user_id = %reporter.id, error = %e, "Incident report rejected");
        ApiError::from(e)
    })?;
    let incident: Incident = serde_json::from_value(stored)
        .map_err(|e| ApiError::InternalServer(format!("unreadable incident row: {}", e)))?;

    info!(
        incident_id = %incident.id,
        user_id = %reporter.id,
        severity = incident.severity.as_str(),
        "Incident reported"
    );
    Ok(incident)
}

/// GET /api/incidents
pub async fn list_incidents(
    Protected(session): Protected,
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let source = IncidentSource {
        limit: state.config.list_limit,
    };
    let incidents = fetch_once(state.store.as_ref(), &source, state.config.request_timeout).await?;

    Ok(Json(json!({
        "heading": heading(session.is_admin),
        "can_report": !session.is_admin,
        "count": incidents.len(),
        "incidents": incidents,
    })))
}

/// POST /api/incidents
///
/// # Request Body
/// ```json
/// {
///   "title": "Roadblock",
///   "description": "Unmarked vehicles stopping buses",
///   "location": "Morogoro road",
///   "severity": "high"
/// }
/// ```
pub async fn report_incident(
    Protected(session): Protected,
    Extension(state): Extension<AppState>,
    Json(payload): Json<ReportIncidentRequest>,
) -> Result<(StatusCode, Json<Incident>), ApiError> {
    if session.is_admin {
        return Err(ApiError::Forbidden(
            "Incident reports are filed by operators".to_string(),
        ));
    }
    let reporter = session
        .identity
        .as_ref()
        .ok_or_else(|| ApiError::Unauthorized("You must be logged in".to_string()))?;

    let incident = report(state.store.as_ref(), reporter, &payload).await?;
    Ok((StatusCode::CREATED, Json(incident)))
}
