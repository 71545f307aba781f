//! Process-wide session context
//!
//! `SessionStore` owns the one `Session` the console has. Only the auth-event
//! handler task writes it; everything else reads through `current()` or a
//! `watch` receiver and asks for changes via `sign_in` / `sign_out`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::models::{AppRole, AuthEvent, Identity, Profile, RoleAssignment, Session};
use crate::backend::{AuthProvider, BackendError, DataStore, Query, Table};
use crate::common::safe_email_log;

/// An event plus, for locally dispatched ones, a signal fired once the handler
/// has published the first state for it.
struct Envelope {
    event: AuthEvent,
    accepted: Option<oneshot::Sender<()>>,
}

struct SessionInner {
    provider: Arc<dyn AuthProvider>,
    inbox: mpsc::UnboundedSender<Envelope>,
    session: watch::Receiver<Session>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl SessionStore {
    /// Boots the store in `Loading` and starts the auth-event handler.
    ///
    /// `load_timeout` bounds the profile/role load that follows a sign-in.
    pub fn start(
        provider: Arc<dyn AuthProvider>,
        store: Arc<dyn DataStore>,
        load_timeout: Duration,
    ) -> Self {
        let (publisher, session) = watch::channel(Session::loading(None));
        let (inbox, receiver) = mpsc::unbounded_channel();

        // Subscribe before spawning so nothing the provider emits from here on is missed.
        let provider_events = provider.events();
        let forwarder = tokio::spawn(forward_provider_events(provider_events, inbox.clone()));

        let handler = Handler {
            provider: provider.clone(),
            store,
            load_timeout,
            publisher,
            inbox: receiver,
        };
        let handler = tokio::spawn(handler.run());

        Self {
            inner: Arc::new(SessionInner {
                provider,
                inbox,
                session,
                tasks: vec![forwarder, handler],
            }),
        }
    }

    pub fn current(&self) -> Session {
        self.inner.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.session.clone()
    }

    /// Resolves with the first non-loading session, or `None` on timeout.
    pub async fn wait_settled(&self, timeout: Duration) -> Option<Session> {
        let mut receiver = self.subscribe();
        let settled = match tokio::time::timeout(timeout, receiver.wait_for(|s| !s.is_loading)).await {
            Ok(Ok(session)) => Some(session.clone()),
            _ => None,
        };
        settled
    }

    /// Password sign-in. Provider errors are returned as-is, never retried.
    ///
    /// On success the session is already `Loading(identity)` when this returns;
    /// the profile and role follow from the handler task.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        let auth = self.inner.provider.sign_in(email, password).await?;
        let identity = auth.identity.clone();
        self.dispatch(AuthEvent::SignedIn(auth)).await;
        info!(
            user_id = %identity.id,
            email = %safe_email_log(&identity.email),
            "Operator signed in"
        );
        Ok(identity)
    }

    /// Clears the local session first; the remote sign-out is best effort.
    pub async fn sign_out(&self) {
        self.dispatch(AuthEvent::SignedOut).await;
        if let Err(e) = self.inner.provider.sign_out().await {
            warn!(error = %e, "Remote sign-out failed; local session already cleared");
        }
    }

    async fn dispatch(&self, event: AuthEvent) {
        let (accepted, done) = oneshot::channel();
        let name = event.name();
        if self
            .inner
            .inbox
            .send(Envelope {
                event,
                accepted: Some(accepted),
            })
            .is_err()
        {
            warn!(event = name, "Auth event handler is gone");
            return;
        }
        let _ = done.await;
    }
}

async fn forward_provider_events(
    mut events: broadcast::Receiver<AuthEvent>,
    inbox: mpsc::UnboundedSender<Envelope>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if inbox.send(Envelope { event, accepted: None }).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Auth events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Profile row (if any) and admin flag for `user_id`, loaded together.
pub(crate) async fn load_authorization(
    store: &dyn DataStore,
    user_id: &str,
) -> Result<(Option<Profile>, bool), BackendError> {
    let profile_query = Query::table(Table::Profiles).eq("user_id", user_id).limit(1);
    let role_query = Query::table(Table::UserRoles)
        .eq("user_id", user_id)
        .eq("role", AppRole::Admin.as_str());

    let (profiles, roles) =
        tokio::try_join!(store.select(&profile_query), store.select(&role_query))?;

    let profile = profiles
        .into_iter()
        .next()
        .map(serde_json::from_value::<Profile>)
        .transpose()?;
    let roles = roles
        .into_iter()
        .map(serde_json::from_value::<RoleAssignment>)
        .collect::<Result<Vec<_>, _>>()?;
    let is_admin = roles
        .iter()
        .any(|assignment| assignment.user_id == user_id && assignment.role == AppRole::Admin);
    Ok((profile, is_admin))
}

struct Handler {
    provider: Arc<dyn AuthProvider>,
    store: Arc<dyn DataStore>,
    load_timeout: Duration,
    publisher: watch::Sender<Session>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
}

impl Handler {
    async fn run(mut self) {
        let restored = self.provider.initial_session().await;
        let mut next = Some(Envelope {
            event: AuthEvent::InitialSession(restored),
            accepted: None,
        });

        loop {
            let envelope = match next.take() {
                Some(envelope) => envelope,
                None => match self.inbox.recv().await {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            next = self.handle(envelope).await;
        }
        debug!("Auth event handler stopped");
    }

    fn publish(&self, session: Session) {
        debug!(phase = ?session.phase(), user_id = ?session.user_id(), "Session updated");
        self.publisher.send_replace(session);
    }

    /// Applies one event. Returns an event that superseded an in-flight load.
    async fn handle(&mut self, envelope: Envelope) -> Option<Envelope> {
        let Envelope { event, accepted } = envelope;
        debug!(event = event.name(), "Auth event");

        match event {
            AuthEvent::InitialSession(None) | AuthEvent::SignedOut => {
                self.publish(Session::signed_out());
                ack(accepted);
                None
            }
            AuthEvent::InitialSession(Some(auth)) | AuthEvent::SignedIn(auth) => {
                self.publish(Session::loading(Some(auth.identity.clone())));
                ack(accepted);
                self.load(auth.identity, None).await
            }
            AuthEvent::TokenRefreshed(auth) => {
                let current = self.publisher.borrow().clone();
                ack(accepted);
                if current.user_id() != Some(auth.identity.id.as_str()) {
                    debug!(user_id = %auth.identity.id, "Token refresh for a different identity ignored");
                    return None;
                }
                if current.is_loading {
                    return self.load(auth.identity, None).await;
                }
                // Same identity: keep the complete authorization visible while it reloads.
                self.load(auth.identity, Some(current)).await
            }
        }
    }

    async fn load(&mut self, identity: Identity, previous: Option<Session>) -> Option<Envelope> {
        let store = self.store.clone();
        let user_id = identity.id.clone();

        tokio::select! {
            biased;
            newer = self.inbox.recv() => {
                debug!(user_id = %user_id, "Authorization load superseded");
                newer
            }
            loaded = tokio::time::timeout(self.load_timeout, load_authorization(store.as_ref(), &user_id)) => {
                let session = match loaded {
                    Ok(Ok((profile, is_admin))) => Session::authenticated(identity, profile, is_admin),
                    Ok(Err(e)) => {
                        warn!(user_id = %user_id, error = %e, "Authorization load failed");
                        previous.unwrap_or_else(|| Session::authenticated(identity, None, false))
                    }
                    Err(_) => {
                        warn!(user_id = %user_id, "Authorization load timed out");
                        previous.unwrap_or_else(|| Session::authenticated(identity, None, false))
                    }
                };
                self.publish(session);
                None
            }
        }
    }
}

fn ack(accepted: Option<oneshot::Sender<()>>) {
    if let Some(accepted) = accepted {
        let _ = accepted.send(());
    }
}
