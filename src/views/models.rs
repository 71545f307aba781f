//! Row types and request payloads for the console views

use serde::{Deserialize, Serialize};

use crate::auth::models::Profile;
use crate::sync::Record;

/// `threat_level` enum shared by threats, alerts and incident severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }

    /// Map marker for this level
    pub fn marker(&self) -> MarkerStyle {
        let (color, radius) = match self {
            ThreatLevel::Critical => ("#ef4444", 14),
            ThreatLevel::High => ("#f97316", 11),
            ThreatLevel::Medium => ("#eab308", 8),
            ThreatLevel::Low => ("#06b6d4", 6),
        };
        MarkerStyle { color, radius }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkerStyle {
    pub color: &'static str,
    pub radius: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapDefaults {
    pub center: [f64; 2],
    pub zoom: u8,
}

pub const MAP_DEFAULTS: MapDefaults = MapDefaults {
    center: [-6.7924, 39.2083],
    zoom: 6,
};

/// `threats` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub threat_level: ThreatLevel,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A threat with the marker a map front end should draw for it
#[derive(Debug, Clone, Serialize)]
pub struct ThreatMarker {
    #[serde(flatten)]
    pub threat: Threat,
    pub marker: MarkerStyle,
}

impl From<Threat> for ThreatMarker {
    fn from(threat: Threat) -> Self {
        let marker = threat.threat_level.marker();
        Self { threat, marker }
    }
}

/// `incidents` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub severity: ThreatLevel,
    pub status: String,
    pub reported_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// `communication_alerts` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationAlert {
    pub id: String,
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub threat_level: ThreatLevel,
    #[serde(default)]
    pub detected_keywords: Vec<String>,
    #[serde(default)]
    pub network_type: String,
    #[serde(default)]
    pub is_reviewed: bool,
    pub detected_at: String,
    pub created_at: String,
}

impl Record for Threat {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for Incident {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for CommunicationAlert {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for Profile {
    fn record_id(&self) -> &str {
        &self.id
    }
}

// ============================================================================
// Request payloads
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ReportIncidentRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub severity: Option<ThreatLevel>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetApprovalRequest {
    pub is_approved: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitAdminRequest {
    #[serde(default)]
    pub secret: String,
}
