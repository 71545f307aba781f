//! Dashboard overview counters

use axum::extract::{Extension, Json};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::backend::{BackendError, DataStore, Query, Table};
use crate::common::{ApiError, AppState};
use crate::gate::{self, Protected};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub active_threats: u64,
    pub critical_alerts: u64,
    pub unreviewed_comms: u64,
    pub pending_incidents: u64,
}

pub fn title(is_admin: bool) -> &'static str {
    if is_admin {
        "Command Center"
    } else {
        "Operations Dashboard"
    }
}

/// Four exact counts, issued together.
pub async fn load_stats(store: &dyn DataStore, timeout: Duration) -> Result<DashboardStats, BackendError> {
    let active = Query::table(Table::Threats).eq("is_active", true);
    let critical = Query::table(Table::Threats)
        .eq("threat_level", "critical")
        .eq("is_active", true);
    let unreviewed = Query::table(Table::CommunicationAlerts).eq("is_reviewed", false);
    let pending = Query::table(Table::Incidents).eq("status", "pending");

    let counts = async {
        tokio::try_join!(
            store.count(&active),
            store.count(&critical),
            store.count(&unreviewed),
            store.count(&pending),
        )
    };
    let (active_threats, critical_alerts, unreviewed_comms, pending_incidents) =
        tokio::time::timeout(timeout, counts)
            .await
            .map_err(|_| BackendError::Network("dashboard counts timed out".to_string()))??;

    Ok(DashboardStats {
        active_threats,
        critical_alerts,
        unreviewed_comms,
        pending_incidents,
    })
}

/// GET /api/dashboard
pub async fn dashboard_handler(
    Protected(session): Protected,
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let stats = load_stats(state.store.as_ref(), state.config.request_timeout).await?;

    Ok(Json(json!({
        "title": title(session.is_admin),
        "subtitle": "Real-time threat intelligence overview",
        "stats": stats,
        "incident_heading": super::incidents::heading(session.is_admin),
        "nav": gate::navigation(&session),
    })))
}
