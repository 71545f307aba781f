//! Tests for auth module
//!
//! These tests drive the session store through its lifecycle:
//! - Sign-in for approved, pending and admin operators
//! - Sign-out, including a failing remote call and provider-side expiry
//! - Superseded and failed authorization loads
//! - Token refresh for the current and for a stale identity

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::auth::models::{AuthEvent, AuthSession, Identity, Session, SessionPhase};
    use crate::backend::memory::test_config;
    use crate::backend::{
        AuthProvider, BackendError, DataStore, MemoryBackend, Query, Table,
    };
    use crate::gate::{self, AccessDecision};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::{broadcast, watch};

    const SETTLE: Duration = Duration::from_secs(2);
    const LOAD_TIMEOUT: Duration = Duration::from_secs(5);

    // ------------------------------------------------------------------
    // Scripted collaborators
    // ------------------------------------------------------------------

    struct ScriptedProvider {
        events: broadcast::Sender<AuthEvent>,
        fail_sign_out: AtomicBool,
    }

    impl ScriptedProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: broadcast::channel(16).0,
                fail_sign_out: AtomicBool::new(false),
            })
        }

        fn emit(&self, event: AuthEvent) {
            self.events.send(event).unwrap();
        }
    }

    fn auth_session(user_id: &str) -> AuthSession {
        AuthSession {
            access_token: format!("access-{}", user_id),
            refresh_token: format!("refresh-{}", user_id),
            expires_at: 4_000_000_000,
            identity: Identity {
                id: user_id.to_string(),
                email: format!("{}@atiews.gov", user_id),
            },
        }
    }

    #[async_trait]
    impl AuthProvider for ScriptedProvider {
        async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, BackendError> {
            if password != "correct-horse" {
                return Err(BackendError::Auth("Invalid login credentials".into()));
            }
            let user_id = email.split('@').next().unwrap_or_default();
            Ok(auth_session(user_id))
        }

        async fn sign_out(&self) -> Result<(), BackendError> {
            if self.fail_sign_out.load(Ordering::SeqCst) {
                Err(BackendError::Network("logout unreachable".into()))
            } else {
                Ok(())
            }
        }

        async fn initial_session(&self) -> Option<AuthSession> {
            None
        }

        fn events(&self) -> broadcast::Receiver<AuthEvent> {
            self.events.subscribe()
        }
    }

    /// Profiles and roles keyed by user id; selects can be held open.
    struct ScriptedStore {
        profiles: Mutex<HashMap<String, bool>>,
        admins: Mutex<HashSet<String>>,
        /// Returned as-is for every `user_roles` select
        raw_roles: Mutex<Vec<Value>>,
        hold: watch::Sender<bool>,
        fail: AtomicBool,
        selects: AtomicUsize,
    }

    impl ScriptedStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                profiles: Mutex::new(HashMap::new()),
                admins: Mutex::new(HashSet::new()),
                raw_roles: Mutex::new(Vec::new()),
                hold: watch::channel(false).0,
                fail: AtomicBool::new(false),
                selects: AtomicUsize::new(0),
            })
        }

        fn with_profile(self: Arc<Self>, user_id: &str, approved: bool) -> Arc<Self> {
            self.profiles
                .lock()
                .unwrap()
                .insert(user_id.to_string(), approved);
            self
        }

        fn with_admin(self: Arc<Self>, user_id: &str) -> Arc<Self> {
            self.admins.lock().unwrap().insert(user_id.to_string());
            self
        }

        fn with_role_row(self: Arc<Self>, row: Value) -> Arc<Self> {
            self.raw_roles.lock().unwrap().push(row);
            self
        }

        fn hold(&self, held: bool) {
            self.hold.send_replace(held);
        }
    }

    fn user_filter(query: &Query) -> String {
        query
            .filters
            .iter()
            .find(|(column, _)| column == "user_id")
            .and_then(|(_, value)| value.as_str())
            .unwrap_or_default()
            .to_string()
    }

    #[async_trait]
    impl DataStore for ScriptedStore {
        async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
            self.selects.fetch_add(1, Ordering::SeqCst);
            let mut released = self.hold.subscribe();
            let _ = released.wait_for(|held| !*held).await;

            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Network("profiles unreachable".into()));
            }
            let user_id = user_filter(query);
            let rows = match query.table {
                Table::Profiles => self
                    .profiles
                    .lock()
                    .unwrap()
                    .get(&user_id)
                    .map(|approved| {
                        vec![json!({
                            "id": format!("profile-{}", user_id),
                            "user_id": user_id,
                            "full_name": "Scripted Operator",
                            "username": user_id,
                            "is_approved": approved,
                            "created_at": "2026-01-01T00:00:00Z",
                            "updated_at": "2026-01-01T00:00:00Z",
                        })]
                    })
                    .unwrap_or_default(),
                Table::UserRoles if !self.raw_roles.lock().unwrap().is_empty() => {
                    self.raw_roles.lock().unwrap().clone()
                }
                Table::UserRoles if self.admins.lock().unwrap().contains(&user_id) => {
                    vec![json!({ "id": "role-1", "user_id": user_id, "role": "admin" })]
                }
                _ => Vec::new(),
            };
            Ok(rows)
        }

        async fn count(&self, _query: &Query) -> Result<u64, BackendError> {
            Ok(0)
        }

        async fn insert(&self, table: Table, _row: Value) -> Result<Value, BackendError> {
            Err(BackendError::RemoteWrite(format!("{} is read-only here", table)))
        }

        async fn update(&self, table: Table, id: &str, _patch: Value) -> Result<Value, BackendError> {
            Err(BackendError::NotFound(format!("{} row {}", table, id)))
        }
    }

    async fn settle(store: &SessionStore) -> Session {
        store
            .wait_settled(SETTLE)
            .await
            .expect("session should settle")
    }

    async fn memory_store() -> (MemoryBackend, SessionStore) {
        let backend = MemoryBackend::new(test_config());
        let shared = Arc::new(backend.clone());
        let store = SessionStore::start(shared.clone(), shared, LOAD_TIMEOUT);
        (backend, store)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_boots_loading_then_unauthenticated() {
        let provider = ScriptedProvider::new();
        let store = SessionStore::start(provider, ScriptedStore::new(), LOAD_TIMEOUT);
        let session = settle(&store).await;
        assert_eq!(session.phase(), SessionPhase::Unauthenticated);
        assert_eq!(gate::evaluate(&session, false), AccessDecision::Redirect("/login"));
    }

    #[tokio::test]
    async fn test_approved_operator_reaches_dashboard_without_admin_nav() {
        let (backend, store) = memory_store().await;
        backend
            .register_account("analyst@atiews.gov", "Field@2024!", "Analyst One", "analyst", true, false)
            .await;
        settle(&store).await;

        let identity = store.sign_in("analyst@atiews.gov", "Field@2024!").await.unwrap();
        assert_eq!(identity.email, "analyst@atiews.gov");

        let session = settle(&store).await;
        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(!session.is_admin);
        assert_eq!(gate::evaluate(&session, false), AccessDecision::Allow);
        assert!(gate::navigation(&session)
            .iter()
            .all(|item| item.path != "/admin/users"));
    }

    #[tokio::test]
    async fn test_unapproved_operator_is_pending() {
        let (backend, store) = memory_store().await;
        backend
            .register_account("recruit@atiews.gov", "Recruit@2024!", "New Recruit", "recruit", false, false)
            .await;
        settle(&store).await;

        store.sign_in("recruit@atiews.gov", "Recruit@2024!").await.unwrap();
        let session = settle(&store).await;

        assert_eq!(session.phase(), SessionPhase::PendingApproval);
        assert_eq!(gate::evaluate(&session, false), AccessDecision::PendingApproval);
    }

    #[tokio::test]
    async fn test_admin_bypasses_approval() {
        let (backend, store) = memory_store().await;
        backend.bootstrap_admin().await;
        settle(&store).await;

        store.sign_in("admin@atiews.gov", "Admin@2024!").await.unwrap();
        let session = settle(&store).await;

        assert!(session.is_admin);
        assert_eq!(gate::evaluate(&session, true), AccessDecision::Allow);
    }

    #[tokio::test]
    async fn test_sign_in_is_loading_until_authorization_lands() {
        let scripted = ScriptedStore::new().with_profile("analyst", true);
        scripted.hold(true);
        let store = SessionStore::start(ScriptedProvider::new(), scripted.clone(), LOAD_TIMEOUT);
        settle(&store).await;

        store.sign_in("analyst@atiews.gov", "correct-horse").await.unwrap();
        let during = store.current();
        assert!(during.is_loading);
        assert_eq!(during.user_id(), Some("analyst"));
        assert_eq!(gate::evaluate(&during, false), AccessDecision::Loading);

        scripted.hold(false);
        let after = settle(&store).await;
        assert_eq!(after.phase(), SessionPhase::Active);
    }

    #[tokio::test]
    async fn test_bad_credentials_leave_session_untouched() {
        let store = SessionStore::start(ScriptedProvider::new(), ScriptedStore::new(), LOAD_TIMEOUT);
        settle(&store).await;

        let err = store.sign_in("analyst@atiews.gov", "wrong").await.unwrap_err();
        assert!(matches!(err, BackendError::Auth(_)));
        assert_eq!(store.current(), Session::signed_out());
    }

    #[tokio::test]
    async fn test_sign_out_succeeds_locally_when_remote_fails() {
        let (backend, store) = memory_store().await;
        backend
            .register_account("analyst@atiews.gov", "Field@2024!", "Analyst One", "analyst", true, false)
            .await;
        settle(&store).await;
        store.sign_in("analyst@atiews.gov", "Field@2024!").await.unwrap();
        settle(&store).await;

        backend.set_sign_out_failure(true);
        store.sign_out().await;

        assert_eq!(store.current(), Session::signed_out());
    }

    #[tokio::test]
    async fn test_provider_expiry_signs_out() {
        let (backend, store) = memory_store().await;
        backend
            .register_account("analyst@atiews.gov", "Field@2024!", "Analyst One", "analyst", true, false)
            .await;
        settle(&store).await;
        store.sign_in("analyst@atiews.gov", "Field@2024!").await.unwrap();
        settle(&store).await;

        let mut updates = store.subscribe();
        backend.expire_session().await;
        tokio::time::timeout(SETTLE, updates.wait_for(|s| s.identity.is_none()))
            .await
            .expect("expiry should reach the session")
            .unwrap();
    }

    // ------------------------------------------------------------------
    // Load ordering
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_superseded_load_never_lands() {
        let scripted = ScriptedStore::new().with_profile("analyst", true);
        scripted.hold(true);
        let store = SessionStore::start(ScriptedProvider::new(), scripted.clone(), LOAD_TIMEOUT);
        settle(&store).await;

        store.sign_in("analyst@atiews.gov", "correct-horse").await.unwrap();
        assert!(store.current().is_loading);

        store.sign_out().await;
        assert_eq!(store.current(), Session::signed_out());

        // Let the abandoned load finish; its result must not be published.
        scripted.hold(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.current(), Session::signed_out());
    }

    #[tokio::test]
    async fn test_second_sign_in_supersedes_first_load() {
        let scripted = ScriptedStore::new()
            .with_profile("first", true)
            .with_profile("second", false);
        scripted.hold(true);
        let store = SessionStore::start(ScriptedProvider::new(), scripted.clone(), LOAD_TIMEOUT);
        settle(&store).await;

        store.sign_in("first@atiews.gov", "correct-horse").await.unwrap();
        store.sign_in("second@atiews.gov", "correct-horse").await.unwrap();
        scripted.hold(false);

        let session = settle(&store).await;
        assert_eq!(session.user_id(), Some("second"));
        assert_eq!(session.phase(), SessionPhase::PendingApproval);
    }

    #[tokio::test]
    async fn test_failed_load_signs_in_without_authorization() {
        let scripted = ScriptedStore::new().with_profile("analyst", true);
        scripted.fail.store(true, Ordering::SeqCst);
        let store = SessionStore::start(ScriptedProvider::new(), scripted, LOAD_TIMEOUT);
        settle(&store).await;

        store.sign_in("analyst@atiews.gov", "correct-horse").await.unwrap();
        let session = settle(&store).await;

        assert_eq!(session.user_id(), Some("analyst"));
        assert!(session.profile.is_none());
        assert!(!session.is_admin);
        assert_eq!(gate::evaluate(&session, false), AccessDecision::PendingApproval);
    }

    #[tokio::test]
    async fn test_token_refresh_keeps_authorization_visible() {
        let provider = ScriptedProvider::new();
        let scripted = ScriptedStore::new()
            .with_profile("chief", true)
            .with_admin("chief");
        let store = SessionStore::start(provider.clone(), scripted.clone(), LOAD_TIMEOUT);
        settle(&store).await;
        store.sign_in("chief@atiews.gov", "correct-horse").await.unwrap();
        let before = settle(&store).await;
        assert!(before.is_admin);

        scripted.hold(true);
        let selects = scripted.selects.load(Ordering::SeqCst);
        provider.emit(AuthEvent::TokenRefreshed(auth_session("chief")));

        // The reload is under way but the complete authorization stays visible.
        tokio::time::timeout(SETTLE, async {
            while scripted.selects.load(Ordering::SeqCst) == selects {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("refresh should reload authorization");
        assert_eq!(store.current(), before);

        scripted.hold(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.current(), before);
    }

    #[tokio::test]
    async fn test_token_refresh_for_other_identity_is_ignored() {
        let provider = ScriptedProvider::new();
        let store = SessionStore::start(provider.clone(), ScriptedStore::new(), LOAD_TIMEOUT);
        settle(&store).await;

        provider.emit(AuthEvent::TokenRefreshed(auth_session("ghost")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.current(), Session::signed_out());
    }

    #[tokio::test]
    async fn test_load_authorization_reads_profile_and_role() {
        let scripted = ScriptedStore::new()
            .with_profile("chief", false)
            .with_admin("chief");
        let (profile, is_admin) = session::load_authorization(scripted.as_ref(), "chief")
            .await
            .unwrap();
        assert!(is_admin);
        assert_eq!(profile.map(|p| p.is_approved), Some(false));

        let (profile, is_admin) = session::load_authorization(scripted.as_ref(), "nobody")
            .await
            .unwrap();
        assert!(profile.is_none());
        assert!(!is_admin);
    }

    #[tokio::test]
    async fn test_load_authorization_needs_an_admin_role_for_this_user() {
        let scripted = ScriptedStore::new()
            .with_profile("ops", true)
            .with_role_row(json!({ "id": "role-7", "user_id": "ops", "role": "user" }))
            .with_role_row(json!({ "id": "role-8", "user_id": "someone-else", "role": "admin" }));
        let (_, is_admin) = session::load_authorization(scripted.as_ref(), "ops")
            .await
            .unwrap();
        assert!(!is_admin);
    }

    #[tokio::test]
    async fn test_load_authorization_rejects_unknown_role() {
        let scripted = ScriptedStore::new()
            .with_profile("ops", true)
            .with_role_row(json!({ "id": "role-9", "user_id": "ops", "role": "superuser" }));
        let err = session::load_authorization(scripted.as_ref(), "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }
}
