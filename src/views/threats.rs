//! Threat map view

use axum::extract::{Extension, Json};
use serde_json::{json, Value};
use tracing::debug;

use super::models::{Threat, ThreatLevel, ThreatMarker, MAP_DEFAULTS};
use crate::backend::{Query, Table};
use crate::common::{ApiError, AppState};
use crate::gate::Protected;
use crate::sync::{fetch_once, ListSource};

/// Active threats, newest first
pub struct ThreatSource {
    pub limit: usize,
}

impl ListSource for ThreatSource {
    type Row = Threat;

    fn query(&self) -> Query {
        Query::table(Table::Threats)
            .eq("is_active", true)
            .order_desc("created_at")
            .limit(self.limit)
    }
}

pub fn markers(threats: Vec<Threat>) -> Vec<ThreatMarker> {
    threats.into_iter().map(ThreatMarker::from).collect()
}

/// GET /api/threats
pub async fn list_threats(
    Protected(session): Protected,
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let source = ThreatSource {
        limit: state.config.list_limit,
    };
    let threats = fetch_once(state.store.as_ref(), &source, state.config.request_timeout).await?;
    debug!(user_id = ?session.user_id(), count = threats.len(), "Listed active threats");

    let legend: Vec<Value> = [
        ThreatLevel::Critical,
        ThreatLevel::High,
        ThreatLevel::Medium,
        ThreatLevel::Low,
    ]
    .iter()
    .map(|level| json!({ "level": level, "marker": level.marker() }))
    .collect();

    Ok(Json(json!({
        "count": threats.len(),
        "threats": markers(threats),
        "map": MAP_DEFAULTS,
        "legend": legend,
    })))
}
