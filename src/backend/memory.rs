// src/backend/memory.rs
//! In-process backend used for local development and by the test suite.
//!
//! Mirrors the hosted project closely enough for the console: password
//! accounts with HS256 access tokens, row-level rules on writes, per-table
//! change broadcast and the two provisioning functions.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AuthProvider, BackendError, ChangeEvent, ChangeFeed, ChangeKind, CreateUserRequest,
    DataStore, FunctionResponse, Provisioner, Query, ReleaseGuard, Subscription, Table,
};
use crate::auth::models::{AuthEvent, AuthSession, Claims, Identity};
use crate::common::config::MemoryConfig;
use crate::common::{now_timestamp, safe_email_log};

const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
const CHANGE_BUFFER: usize = 64;

#[derive(Debug, Clone)]
struct Account {
    id: String,
    email: String,
    password: String,
}

struct Inner {
    config: MemoryConfig,
    tables: RwLock<HashMap<Table, Vec<Value>>>,
    accounts: RwLock<HashMap<String, Account>>,
    current_token: RwLock<Option<String>>,
    changes: HashMap<Table, broadcast::Sender<ChangeEvent>>,
    auth_events: broadcast::Sender<AuthEvent>,
    active_subscriptions: Arc<AtomicUsize>,
    offline: AtomicBool,
    fail_sign_out: AtomicBool,
    select_calls: AtomicUsize,
}

/// Shared handle; clones see the same data.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new(config: MemoryConfig) -> Self {
        let changes = Table::ALL
            .iter()
            .map(|table| (*table, broadcast::channel(CHANGE_BUFFER).0))
            .collect();
        let tables = Table::ALL.iter().map(|table| (*table, Vec::new())).collect();

        Self {
            inner: Arc::new(Inner {
                config,
                tables: RwLock::new(tables),
                accounts: RwLock::new(HashMap::new()),
                current_token: RwLock::new(None),
                changes,
                auth_events: broadcast::channel(16).0,
                active_subscriptions: Arc::new(AtomicUsize::new(0)),
                offline: AtomicBool::new(false),
                fail_sign_out: AtomicBool::new(false),
                select_calls: AtomicUsize::new(0),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Test hooks
    // ------------------------------------------------------------------

    #[cfg(test)]
    /// Makes every call fail with a network error until turned back off.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, AtomicOrdering::SeqCst);
    }

    #[cfg(test)]
    /// Makes the remote half of sign-out fail.
    pub fn set_sign_out_failure(&self, fail: bool) {
        self.inner.fail_sign_out.store(fail, AtomicOrdering::SeqCst);
    }

    #[cfg(test)]
    pub fn active_subscriptions(&self) -> usize {
        self.inner.active_subscriptions.load(AtomicOrdering::SeqCst)
    }

    #[cfg(test)]
    pub fn select_calls(&self) -> usize {
        self.inner.select_calls.load(AtomicOrdering::SeqCst)
    }

    #[cfg(test)]
    /// Ends the current session the way an expired refresh token would.
    pub async fn expire_session(&self) {
        *self.inner.current_token.write().await = None;
        let _ = self.inner.auth_events.send(AuthEvent::SignedOut);
    }

    /// Registers a password account with its profile and role rows.
    pub async fn register_account(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        username: &str,
        approved: bool,
        admin: bool,
    ) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            email: email.trim().to_lowercase(),
        };
        self.inner.accounts.write().await.insert(
            identity.email.clone(),
            Account {
                id: identity.id.clone(),
                email: identity.email.clone(),
                password: password.to_string(),
            },
        );

        let now = now_timestamp();
        self.seed(
            Table::Profiles,
            json!({
                "user_id": identity.id,
                "full_name": full_name,
                "username": username,
                "is_approved": approved,
                "created_at": now,
                "updated_at": now,
            }),
        )
        .await;
        self.seed(
            Table::UserRoles,
            json!({
                "user_id": identity.id,
                "role": if admin { "admin" } else { "user" },
            }),
        )
        .await;

        debug!(
            user_id = %identity.id,
            email = %safe_email_log(&identity.email),
            admin = admin,
            "Registered in-memory account"
        );
        identity
    }

    /// Inserts a row with service-role rights (no row-level rules).
    pub async fn seed(&self, table: Table, row: Value) -> Value {
        let row = with_defaults(table, row);
        self.inner
            .tables
            .write()
            .await
            .entry(table)
            .or_default()
            .push(row.clone());
        self.notify(table, ChangeKind::Insert);
        row
    }

    /// Creates the configured bootstrap admin unless an admin already exists.
    pub async fn bootstrap_admin(&self) {
        match self.create_bootstrap_admin().await {
            Ok(response) => info!(message = ?response.message, "In-memory bootstrap admin ready"),
            Err(e) => debug!(reason = %e, "In-memory bootstrap admin skipped"),
        }
    }

    /// A handful of threats, alerts and incidents to look at.
    pub async fn seed_demo(&self) {
        let threats = [
            ("Armed group movement", "Convoy sighted heading south", "critical", -6.7924, 39.2083, "Dar es Salaam"),
            ("Border incursion", "Unverified crossing reports", "high", -1.2921, 36.8219, "Namanga"),
            ("Protest gathering", "Crowd forming near port", "medium", -5.0689, 39.0988, "Tanga"),
            ("Suspicious vessel", "Unregistered dhow offshore", "low", -8.0, 39.7, "Kilwa"),
        ];
        for (title, description, level, lat, lng, place) in threats {
            self.seed(
                Table::Threats,
                json!({
                    "title": title,
                    "description": description,
                    "threat_level": level,
                    "latitude": lat,
                    "longitude": lng,
                    "location_name": place,
                }),
            )
            .await;
        }

        let alerts = [
            ("SMS gateway 4", "meet at the bridge with the package", "high", vec!["package", "bridge"]),
            ("Social feed", "rally tomorrow at noon", "low", vec!["rally"]),
        ];
        for (source, content, level, keywords) in alerts {
            self.seed(
                Table::CommunicationAlerts,
                json!({
                    "source": source,
                    "content": content,
                    "threat_level": level,
                    "detected_keywords": keywords,
                    "network_type": "GSM",
                }),
            )
            .await;
        }
        info!("Seeded in-memory demo data");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn notify(&self, table: Table, kind: ChangeKind) {
        if let Some(sender) = self.inner.changes.get(&table) {
            // No receivers is fine: nobody has that view mounted.
            let _ = sender.send(ChangeEvent { table, kind });
        }
    }

    fn ensure_online(&self) -> Result<(), BackendError> {
        if self.inner.offline.load(AtomicOrdering::SeqCst) {
            Err(BackendError::Network("backend unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn mint_token(&self, account: &Account) -> Result<(String, i64), BackendError> {
        let expires_at = (Utc::now() + ChronoDuration::seconds(ACCESS_TOKEN_TTL_SECS)).timestamp();
        let claims = Claims {
            sub: account.id.clone(),
            email: Some(account.email.clone()),
            exp: expires_at,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.inner.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| BackendError::Auth(format!("token issue failed: {}", e)))?;
        Ok((token, expires_at))
    }

    /// Verifies the current access token and returns the caller's user id.
    async fn caller(&self) -> Result<String, BackendError> {
        let token = self
            .inner
            .current_token
            .read()
            .await
            .clone()
            .ok_or_else(|| BackendError::Auth("not signed in".to_string()))?;

        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(self.inner.config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| BackendError::Auth(format!("invalid session: {}", e)))?;
        Ok(data.claims.sub)
    }

    async fn is_admin(&self, user_id: &str) -> bool {
        self.inner
            .tables
            .read()
            .await
            .get(&Table::UserRoles)
            .map(|rows| {
                rows.iter().any(|row| {
                    row.get("user_id").and_then(Value::as_str) == Some(user_id)
                        && row.get("role").and_then(Value::as_str) == Some("admin")
                })
            })
            .unwrap_or(false)
    }

    async fn any_admin(&self) -> bool {
        self.inner
            .tables
            .read()
            .await
            .get(&Table::UserRoles)
            .map(|rows| {
                rows.iter()
                    .any(|row| row.get("role").and_then(Value::as_str) == Some("admin"))
            })
            .unwrap_or(false)
    }

    async fn matching_rows(&self, query: &Query, caller: &str) -> Vec<Value> {
        let own_rows_only = matches!(query.table, Table::Profiles | Table::UserRoles)
            && !self.is_admin(caller).await;

        let tables = self.inner.tables.read().await;
        let rows = match tables.get(&query.table) {
            Some(rows) => rows,
            None => return Vec::new(),
        };

        let mut matched: Vec<(usize, &Value)> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| query.matches(row))
            .filter(|(_, row)| {
                !own_rows_only || row.get("user_id").and_then(Value::as_str) == Some(caller)
            })
            .collect();

        if let Some(column) = &query.order_desc {
            // Newest first; insertion order breaks timestamp ties.
            matched.sort_by(|(ia, a), (ib, b)| {
                compare_values(b.get(column), a.get(column)).then(ib.cmp(ia))
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        matched
            .into_iter()
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect()
    }

    async fn check_write(&self, table: Table, caller: &str, row: &Value) -> Result<(), BackendError> {
        let admin = self.is_admin(caller).await;
        let allowed = match table {
            Table::Incidents => {
                admin || row.get("reported_by").and_then(Value::as_str) == Some(caller)
            }
            Table::CommunicationAlerts => true,
            Table::Threats | Table::Profiles | Table::UserRoles => admin,
        };
        if allowed {
            Ok(())
        } else {
            Err(BackendError::RemoteWrite(format!(
                "permission denied for table {}",
                table
            )))
        }
    }

    async fn create_bootstrap_admin(&self) -> Result<FunctionResponse, BackendError> {
        if self.any_admin().await {
            return Err(BackendError::Function("Admin already exists".to_string()));
        }
        let email = self.inner.config.admin_email.clone();
        let password = self.inner.config.admin_password.clone();
        self.register_account(&email, &password, "System Administrator", "admin", true, true)
            .await;
        Ok(FunctionResponse::ok(Some(format!("Admin created: {}", email))))
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Column defaults the hosted schema would fill in
fn with_defaults(table: Table, row: Value) -> Value {
    let mut map = match row {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let now = now_timestamp();
    let mut default = |key: &str, value: Value| {
        map.entry(key.to_string()).or_insert(value);
    };

    default("id", Value::String(Uuid::new_v4().to_string()));
    match table {
        Table::Threats => {
            default("is_active", Value::Bool(true));
            default("threat_level", json!("medium"));
            default("created_by", Value::Null);
            default("created_at", json!(now));
            default("updated_at", json!(now));
        }
        Table::Incidents => {
            default("severity", json!("medium"));
            default("status", json!("pending"));
            default("latitude", Value::Null);
            default("longitude", Value::Null);
            default("created_at", json!(now));
            default("updated_at", json!(now));
        }
        Table::CommunicationAlerts => {
            default("is_reviewed", Value::Bool(false));
            default("threat_level", json!("low"));
            default("network_type", json!("unknown"));
            default("detected_keywords", json!([]));
            default("detected_at", json!(now));
            default("created_at", json!(now));
        }
        Table::Profiles => {
            default("is_approved", Value::Bool(false));
            default("created_at", json!(now));
            default("updated_at", json!(now));
        }
        Table::UserRoles => {
            default("role", json!("user"));
        }
    }
    Value::Object(map)
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, BackendError> {
        self.ensure_online()?;
        let account = self
            .inner
            .accounts
            .read()
            .await
            .get(&email.trim().to_lowercase())
            .cloned();

        let account = match account {
            Some(account) if account.password == password => account,
            _ => {
                warn!(email = %safe_email_log(email), "In-memory sign-in rejected");
                return Err(BackendError::Auth("Invalid login credentials".to_string()));
            }
        };

        let (access_token, expires_at) = self.mint_token(&account)?;
        *self.inner.current_token.write().await = Some(access_token.clone());

        Ok(AuthSession {
            access_token,
            refresh_token: Uuid::new_v4().to_string(),
            expires_at,
            identity: Identity {
                id: account.id,
                email: account.email,
            },
        })
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if self.inner.fail_sign_out.load(AtomicOrdering::SeqCst) {
            return Err(BackendError::Network("sign-out request failed".to_string()));
        }
        self.ensure_online()?;
        *self.inner.current_token.write().await = None;
        Ok(())
    }

    async fn initial_session(&self) -> Option<AuthSession> {
        None
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.auth_events.subscribe()
    }
}

#[async_trait]
impl DataStore for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.inner.select_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.ensure_online()?;
        let caller = self.caller().await?;
        Ok(self.matching_rows(query, &caller).await)
    }

    async fn count(&self, query: &Query) -> Result<u64, BackendError> {
        self.ensure_online()?;
        let caller = self.caller().await?;
        let unbounded = Query {
            limit: None,
            order_desc: None,
            ..query.clone()
        };
        Ok(self.matching_rows(&unbounded, &caller).await.len() as u64)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        self.ensure_online()?;
        let caller = self
            .caller()
            .await
            .map_err(|e| BackendError::RemoteWrite(e.to_string()))?;
        self.check_write(table, &caller, &row).await?;
        Ok(self.seed(table, row).await)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, BackendError> {
        self.ensure_online()?;
        let caller = self
            .caller()
            .await
            .map_err(|e| BackendError::RemoteWrite(e.to_string()))?;

        let existing = {
            let tables = self.inner.tables.read().await;
            tables
                .get(&table)
                .and_then(|rows| {
                    rows.iter()
                        .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
                })
                .cloned()
        };
        let existing = existing
            .ok_or_else(|| BackendError::NotFound(format!("{} row {}", table, id)))?;
        self.check_write(table, &caller, &existing).await?;

        let updated = {
            let mut tables = self.inner.tables.write().await;
            let row = tables
                .get_mut(&table)
                .and_then(|rows| {
                    rows.iter_mut()
                        .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
                })
                .ok_or_else(|| BackendError::NotFound(format!("{} row {}", table, id)))?;

            if let (Value::Object(target), Value::Object(changes)) = (&mut *row, patch) {
                for (key, value) in changes {
                    target.insert(key, value);
                }
                if target.contains_key("updated_at") {
                    target.insert("updated_at".to_string(), json!(now_timestamp()));
                }
            }
            row.clone()
        };

        self.notify(table, ChangeKind::Update);
        Ok(updated)
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, table: Table) -> Result<Subscription, BackendError> {
        self.ensure_online()?;
        let mut source = self
            .inner
            .changes
            .get(&table)
            .ok_or_else(|| BackendError::NotFound(format!("no change topic for {}", table)))?
            .subscribe();

        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let forwarder = tokio::spawn(async move {
            loop {
                let event = match source.recv().await {
                    Ok(event) => event,
                    // Missed events collapse into one invalidation.
                    Err(broadcast::error::RecvError::Lagged(_)) => ChangeEvent {
                        table,
                        kind: ChangeKind::Unknown,
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let counter = self.inner.active_subscriptions.clone();
        counter.fetch_add(1, AtomicOrdering::SeqCst);
        let guard = ReleaseGuard::new(move || {
            forwarder.abort();
            counter.fetch_sub(1, AtomicOrdering::SeqCst);
        });

        Ok(Subscription::new(table, rx, guard))
    }
}

#[async_trait]
impl Provisioner for MemoryBackend {
    async fn create_user(
        &self,
        request: &CreateUserRequest,
    ) -> Result<FunctionResponse, BackendError> {
        self.ensure_online()?;
        let caller = match self.caller().await {
            Ok(caller) => caller,
            Err(_) => return Ok(FunctionResponse::failed("Unauthorized")),
        };
        if !self.is_admin(&caller).await {
            return Ok(FunctionResponse::failed("Only administrators can create users"));
        }

        let email = request.email.trim().to_lowercase();
        if self.inner.accounts.read().await.contains_key(&email) {
            return Ok(FunctionResponse::failed(
                "A user with this email address has already been registered",
            ));
        }

        self.register_account(
            &email,
            &request.password,
            request.full_name.trim(),
            request.username.trim(),
            false,
            false,
        )
        .await;
        Ok(FunctionResponse::ok(None))
    }

    async fn init_admin(&self, secret: &str) -> Result<FunctionResponse, BackendError> {
        self.ensure_online()?;
        if secret != self.inner.config.init_secret {
            return Ok(FunctionResponse::failed("Invalid secret"));
        }
        match self.create_bootstrap_admin().await {
            Ok(response) => Ok(response),
            Err(BackendError::Function(msg)) => Ok(FunctionResponse::failed(msg)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> MemoryConfig {
    MemoryConfig {
        jwt_secret: "test-secret".to_string(),
        init_secret: "let-me-in".to_string(),
        admin_email: "admin@atiews.gov".to_string(),
        admin_password: "Admin@2024!".to_string(),
        seed_demo: false,
    }
}
