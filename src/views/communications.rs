//! Communications monitor

use axum::extract::{Extension, Json, Path};
use serde_json::{json, Value};
use tracing::info;

use super::models::CommunicationAlert;
use crate::backend::{DataStore, Query, Table};
use crate::common::{ApiError, AppState};
use crate::gate::Protected;
use crate::sync::{fetch_once, ListSource};

/// Flagged communications, most recently detected first
pub struct CommunicationSource {
    pub limit: usize,
}

impl ListSource for CommunicationSource {
    type Row = CommunicationAlert;

    fn query(&self) -> Query {
        Query::table(Table::CommunicationAlerts)
            .order_desc("detected_at")
            .limit(self.limit)
    }
}

/// Sets `is_reviewed`. Reviewing an already reviewed alert is a no-op write.
pub async fn mark_reviewed(store: &dyn DataStore, id: &str) -> Result<CommunicationAlert, ApiError> {
    let row = store
        .update(Table::CommunicationAlerts, id, json!({ "is_reviewed": true }))
        .await?;
    let alert: CommunicationAlert = serde_json::from_value(row)
        .map_err(|e| ApiError::InternalServer(format!("unreadable alert row: {}", e)))?;
    info!(alert_id = %alert.id, "Communication alert marked reviewed");
    Ok(alert)
}

/// GET /api/communications
pub async fn list_communications(
    Protected(_session): Protected,
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let source = CommunicationSource {
        limit: state.config.list_limit,
    };
    let alerts = fetch_once(state.store.as_ref(), &source, state.config.request_timeout).await?;
    let unreviewed = alerts.iter().filter(|a| !a.is_reviewed).count();

    Ok(Json(json!({
        "alerts": alerts,
        "unreviewed": unreviewed,
    })))
}

/// POST /api/communications/:id/review
pub async fn review_communication(
    Protected(_session): Protected,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommunicationAlert>, ApiError> {
    let alert = mark_reviewed(state.store.as_ref(), &id).await?;
    Ok(Json(alert))
}
