//! # Backend Module
//!
//! Contracts for the managed backend the console delegates to:
//! - `AuthProvider`: password sign-in, sign-out, auth-state events
//! - `DataStore`: table queries, counts, inserts and updates
//! - `ChangeFeed`: per-table change notifications
//! - `Provisioner`: the administrative serverless functions
//!
//! `supabase` talks to a hosted project; `memory` keeps everything in process.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::auth::models::{AuthEvent, AuthSession};
use crate::common::config::{AppConfig, BackendKind};

pub use memory::MemoryBackend;
pub use supabase::SupabaseClient;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("write rejected: {0}")]
    RemoteWrite(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("{0}")]
    Function(String),
}

impl BackendError {
    /// Failures that clear up by themselves; background sync swallows these.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Network(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Network("request timed out".to_string())
        } else if err.is_connect() || err.is_request() {
            BackendError::Network(err.to_string())
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

/// Tables the console reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Threats,
    Incidents,
    CommunicationAlerts,
    Profiles,
    UserRoles,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Threats,
        Table::Incidents,
        Table::CommunicationAlerts,
        Table::Profiles,
        Table::UserRoles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Threats => "threats",
            Table::Incidents => "incidents",
            Table::CommunicationAlerts => "communication_alerts",
            Table::Profiles => "profiles",
            Table::UserRoles => "user_roles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `select *` with equality filters, newest-first ordering and a row limit
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<(String, Value)>,
    pub order_desc: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order_desc: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order_desc = Some(column.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when `row` satisfies every equality filter
    pub fn matches(&self, row: &Value) -> bool {
        self.filters
            .iter()
            .all(|(column, expected)| row.get(column) == Some(expected))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Unknown,
}

impl ChangeKind {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => ChangeKind::Unknown,
        }
    }
}

/// Something changed in `table`. The payload is deliberately not carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

/// Runs its release action exactly once, when dropped.
pub struct ReleaseGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ReleaseGuard {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Live change subscription for one table; dropping it unsubscribes.
pub struct Subscription {
    table: Table,
    events: mpsc::Receiver<ChangeEvent>,
    _guard: ReleaseGuard,
}

impl Subscription {
    pub fn new(table: Table, events: mpsc::Receiver<ChangeEvent>, guard: ReleaseGuard) -> Self {
        Self {
            table,
            events,
            _guard: guard,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Next notification, or `None` once the feed has gone away
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .finish()
    }
}

/// Provisioning request for `admin-create-user`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub username: String,
}

/// `{ success } | { error }` body returned by the serverless functions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionResponse {
    pub fn ok(message: Option<String>) -> Self {
        Self {
            success: true,
            message,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }

    /// An `error` field wins over `success`, matching how the dashboard read these
    pub fn into_result(self) -> Result<FunctionResponse, BackendError> {
        match self.error {
            Some(error) => Err(BackendError::Function(error)),
            None if self.success => Ok(self),
            None => Err(BackendError::Function("Function reported failure".to_string())),
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Session restored at boot, if any
    async fn initial_session(&self) -> Option<AuthSession>;

    /// Provider-originated transitions (token refresh, expiry)
    fn events(&self) -> broadcast::Receiver<AuthEvent>;
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError>;

    /// Exact row count for the query's filters (order and limit ignored)
    async fn count(&self, query: &Query) -> Result<u64, BackendError>;

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError>;

    /// Patches the row with primary key `id` and returns it as stored
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, BackendError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: Table) -> Result<Subscription, BackendError>;
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_user(&self, request: &CreateUserRequest)
        -> Result<FunctionResponse, BackendError>;

    async fn init_admin(&self, secret: &str) -> Result<FunctionResponse, BackendError>;
}

/// The four collaborators, backed by the same client
#[derive(Clone)]
pub struct Backends {
    pub auth: Arc<dyn AuthProvider>,
    pub store: Arc<dyn DataStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub provisioner: Arc<dyn Provisioner>,
}

impl Backends {
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: AuthProvider + DataStore + ChangeFeed + Provisioner + 'static,
    {
        Self {
            auth: backend.clone(),
            store: backend.clone(),
            feed: backend.clone(),
            provisioner: backend,
        }
    }
}

/// Builds the configured backend
pub async fn connect(config: &AppConfig) -> anyhow::Result<Backends> {
    match config.backend {
        BackendKind::Supabase => {
            let url = config
                .supabase_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("SUPABASE_URL is required for the supabase backend"))?;
            let anon_key = config.supabase_anon_key.clone().ok_or_else(|| {
                anyhow::anyhow!("SUPABASE_ANON_KEY is required for the supabase backend")
            })?;
            let client = SupabaseClient::new(&url, &anon_key, config.request_timeout)?;
            Ok(Backends::from_shared(Arc::new(client)))
        }
        BackendKind::Memory => {
            let backend = MemoryBackend::new(config.memory.clone());
            backend.bootstrap_admin().await;
            if config.memory.seed_demo {
                backend.seed_demo().await;
            }
            Ok(Backends::from_shared(Arc::new(backend)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_builder_and_matching() {
        let query = Query::table(Table::Threats)
            .eq("is_active", true)
            .eq("threat_level", "critical")
            .order_desc("created_at")
            .limit(50);

        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.limit, Some(50));
        assert!(query.matches(&json!({ "is_active": true, "threat_level": "critical" })));
        assert!(!query.matches(&json!({ "is_active": false, "threat_level": "critical" })));
        assert!(!query.matches(&json!({ "threat_level": "critical" })));
    }

    #[test]
    fn test_function_response_error_wins() {
        let body: FunctionResponse =
            serde_json::from_value(json!({ "success": true, "error": "Admin already exists" }))
                .unwrap();
        assert_eq!(
            body.into_result(),
            Err(BackendError::Function("Admin already exists".into()))
        );

        let ok: FunctionResponse = serde_json::from_value(json!({ "success": true })).unwrap();
        assert!(ok.into_result().is_ok());

        let empty: FunctionResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.into_result().is_err());
    }

    #[test]
    fn test_release_guard_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let guard = ReleaseGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(guard);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_change_kind_parse() {
        assert_eq!(ChangeKind::parse("INSERT"), ChangeKind::Insert);
        assert_eq!(ChangeKind::parse("delete"), ChangeKind::Delete);
        assert_eq!(ChangeKind::parse("TRUNCATE"), ChangeKind::Unknown);
    }
}
