//! Live list views over websocket
//!
//! Each connection to `/ws/views/:view` is one mount of that view's
//! synchronizer. Every published list goes out as a snapshot; closing the
//! socket unmounts.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Extension, Path, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::admin_users::{self, ProfileSource};
use super::communications::{self, CommunicationSource};
use super::incidents::IncidentSource;
use super::models::{CommunicationAlert, Incident, Threat};
use super::threats::{self, ThreatSource};
use crate::auth::models::Profile;
use crate::common::{ApiError, AppState};
use crate::gate::{self, AccessDecision};
use crate::sync::{ListSource, ListSynchronizer, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveView {
    Threats,
    Incidents,
    Communications,
    AdminUsers,
}

impl LiveView {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "threats" => Some(LiveView::Threats),
            "incidents" => Some(LiveView::Incidents),
            "communications" => Some(LiveView::Communications),
            "admin_users" => Some(LiveView::AdminUsers),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LiveView::Threats => "threats",
            LiveView::Incidents => "incidents",
            LiveView::Communications => "communications",
            LiveView::AdminUsers => "admin_users",
        }
    }

    /// Same gate as the matching GET route
    pub fn requires_admin(&self) -> bool {
        matches!(self, LiveView::AdminUsers)
    }
}

/// Frames a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    MarkReviewed { id: String },
    SetApproval { id: String, is_approved: bool },
    Refresh,
    Ping,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::MarkReviewed { .. } => "mark_reviewed",
            ClientCommand::SetApproval { .. } => "set_approval",
            ClientCommand::Refresh => "refresh",
            ClientCommand::Ping => "ping",
        }
    }
}

/// Frames the server sends
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot { view: &'static str, rows: Value },
    Ack {
        command: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Pong,
    Error { code: String, message: String },
}

impl From<ApiError> for ServerMessage {
    fn from(err: ApiError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.message(),
        }
    }
}

/// What an open socket does with snapshots under a gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Streaming {
    Live,
    /// Authorization is being re-established; hold snapshots back.
    Paused,
    Ended,
}

pub(crate) fn streaming(decision: &AccessDecision) -> Streaming {
    match decision {
        AccessDecision::Allow => Streaming::Live,
        AccessDecision::Loading => Streaming::Paused,
        AccessDecision::Redirect(_) | AccessDecision::PendingApproval => Streaming::Ended,
    }
}

/// Row types that can back a live view.
#[async_trait]
pub trait LiveRow: Record {
    fn render(rows: &[Self]) -> Value {
        serde_json::to_value(rows).unwrap_or_else(|_| Value::Array(Vec::new()))
    }

    /// Runs a write command, then patches `list` so the change shows at once.
    /// Returns the id of the row written.
    async fn execute(
        _state: &AppState,
        _list: &ListSynchronizer<Self>,
        command: &ClientCommand,
    ) -> Result<Option<String>, ApiError> {
        Err(ApiError::BadRequest(format!(
            "{} is not available on this view",
            command.name()
        )))
    }
}

impl LiveRow for Threat {
    fn render(rows: &[Self]) -> Value {
        serde_json::to_value(threats::markers(rows.to_vec()))
            .unwrap_or_else(|_| Value::Array(Vec::new()))
    }
}

impl LiveRow for Incident {}

#[async_trait]
impl LiveRow for CommunicationAlert {
    async fn execute(
        state: &AppState,
        list: &ListSynchronizer<Self>,
        command: &ClientCommand,
    ) -> Result<Option<String>, ApiError> {
        match command {
            ClientCommand::MarkReviewed { id } => {
                communications::mark_reviewed(state.store.as_ref(), id).await?;
                list.patch(id, |alert| alert.is_reviewed = true);
                Ok(Some(id.clone()))
            }
            other => Err(ApiError::BadRequest(format!(
                "{} is not available on this view",
                other.name()
            ))),
        }
    }
}

#[async_trait]
impl LiveRow for Profile {
    async fn execute(
        state: &AppState,
        list: &ListSynchronizer<Self>,
        command: &ClientCommand,
    ) -> Result<Option<String>, ApiError> {
        match command {
            ClientCommand::SetApproval { id, is_approved } => {
                let approved = *is_approved;
                admin_users::set_approval(state.store.as_ref(), id, approved).await?;
                list.patch(id, move |profile| profile.is_approved = approved);
                Ok(Some(id.clone()))
            }
            other => Err(ApiError::BadRequest(format!(
                "{} is not available on this view",
                other.name()
            ))),
        }
    }
}

/// GET /ws/views/:view
pub async fn live_view_handler(
    Path(view): Path<String>,
    Extension(state): Extension<AppState>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(live) = LiveView::parse(&view) else {
        return ApiError::NotFound(format!("unknown live view: {}", view)).into_response();
    };
    let session = match gate::require(&state.session, live.requires_admin()) {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };
    let Some(ws) = ws else {
        return ApiError::BadRequest("websocket upgrade required".to_string()).into_response();
    };

    info!(
        view = live.as_str(),
        user_id = ?session.user_id(),
        "Live view connection accepted"
    );
    let limit = state.config.list_limit;
    ws.on_upgrade(move |socket| async move {
        match live {
            LiveView::Threats => serve(socket, live, ThreatSource { limit }, state).await,
            LiveView::Incidents => serve(socket, live, IncidentSource { limit }, state).await,
            LiveView::Communications => {
                serve(socket, live, CommunicationSource { limit }, state).await
            }
            LiveView::AdminUsers => serve(socket, live, ProfileSource { limit }, state).await,
        }
    })
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ServerMessage) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode live view frame");
            true
        }
    }
}

async fn serve<S>(socket: WebSocket, view: LiveView, source: S, state: AppState)
where
    S: ListSource,
    S::Row: LiveRow,
{
    let list = Arc::new(ListSynchronizer::mount(
        source,
        state.store.clone(),
        state.feed.clone(),
        state.config.request_timeout,
    ));

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let mut snapshots = list.watch();
    let mut sessions = state.session.subscribe();
    let mut send_task = tokio::spawn(async move {
        let first = ServerMessage::Snapshot {
            view: view.as_str(),
            rows: S::Row::render(&snapshots.borrow_and_update()),
        };
        if !send_frame(&mut sender, &first).await {
            return;
        }

        let mut paused = false;
        loop {
            tokio::select! {
                changed = snapshots.changed(), if !paused => {
                    if changed.is_err() {
                        break;
                    }
                    let frame = ServerMessage::Snapshot {
                        view: view.as_str(),
                        rows: S::Row::render(&snapshots.borrow_and_update()),
                    };
                    if !send_frame(&mut sender, &frame).await {
                        break;
                    }
                }
                outgoing = rx.recv() => match outgoing {
                    Some(frame) => {
                        if !send_frame(&mut sender, &frame).await {
                            break;
                        }
                    }
                    None => break,
                },
                changed = sessions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let decision = gate::evaluate(&sessions.borrow_and_update(), view.requires_admin());
                    match streaming(&decision) {
                        Streaming::Paused => {
                            if !paused {
                                debug!(view = view.as_str(), "Live view paused while session loads");
                            }
                            paused = true;
                        }
                        Streaming::Live => {
                            if paused {
                                paused = false;
                                let frame = ServerMessage::Snapshot {
                                    view: view.as_str(),
                                    rows: S::Row::render(&snapshots.borrow_and_update()),
                                };
                                if !send_frame(&mut sender, &frame).await {
                                    break;
                                }
                            }
                        }
                        Streaming::Ended => {
                            let ended = ServerMessage::Error {
                                code: "SESSION_ENDED".to_string(),
                                message: "Session no longer grants access to this view".to_string(),
                            };
                            send_frame(&mut sender, &ended).await;
                            let _ = sender.close().await;
                            break;
                        }
                    }
                }
            }
        }
    });

    let commands = list.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    let reply = handle_command(&text, view, &state, &commands).await;
                    if tx.send(reply).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    list.close();
    info!(view = view.as_str(), "Live view connection closed");
}

/// Handles one client frame and returns the reply to send.
pub(crate) async fn handle_command<R: LiveRow>(
    text: &str,
    view: LiveView,
    state: &AppState,
    list: &ListSynchronizer<R>,
) -> ServerMessage {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            return ApiError::BadRequest(format!("invalid command: {}", e)).into();
        }
    };
    debug!(view = view.as_str(), command = command.name(), "Live view command");

    match command {
        ClientCommand::Ping => ServerMessage::Pong,
        ClientCommand::Refresh => {
            list.refresh();
            ServerMessage::Ack {
                command: "refresh",
                id: None,
            }
        }
        write => {
            // The session may have changed since the upgrade.
            if gate::require(&state.session, view.requires_admin()).is_err() {
                return ApiError::Forbidden("Session no longer grants access to this view".to_string())
                    .into();
            }
            match R::execute(state, list, &write).await {
                Ok(id) => ServerMessage::Ack {
                    command: write.name(),
                    id,
                },
                Err(e) => {
                    warn!(view = view.as_str(), command = write.name(), error = %e, "Live view command failed");
                    e.into()
                }
            }
        }
    }
}
