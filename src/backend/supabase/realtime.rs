//! Realtime `postgres_changes` channels over the Phoenix websocket protocol

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::SupabaseClient;
use crate::auth::models::AuthEvent;
use crate::backend::{
    BackendError, ChangeEvent, ChangeFeed, ChangeKind, ReleaseGuard, Subscription, Table,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const JOIN_REF: &str = "1";

/// Inbound frame, reduced to what a subscription cares about
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    JoinReply { ok: bool, reason: Option<String> },
    Change(ChangeKind),
    Closed(String),
    Other,
}

pub(crate) fn websocket_url(base_url: &str, anon_key: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        ws_base,
        urlencoding::encode(anon_key)
    )
}

pub(crate) fn channel_topic(table: Table) -> String {
    format!("realtime:{}-realtime", table)
}

fn join_message(table: Table, access_token: &str) -> Value {
    json!({
        "topic": channel_topic(table),
        "event": "phx_join",
        "ref": JOIN_REF,
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table.as_str() }
                ]
            },
            "access_token": access_token
        }
    })
}

/// Rotates the token an open channel authorizes its changes with.
pub(crate) fn access_token_message(topic: &str, access_token: &str) -> Value {
    json!({
        "topic": topic,
        "event": "access_token",
        "payload": { "access_token": access_token },
        "ref": null
    })
}

/// Token a channel should carry after `event`, if it changes.
pub(crate) fn token_after(event: &AuthEvent, anon_key: &str) -> Option<String> {
    match event {
        AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
            Some(session.access_token.clone())
        }
        AuthEvent::SignedOut => Some(anon_key.to_string()),
        AuthEvent::InitialSession(_) => None,
    }
}

pub(crate) fn parse_frame(text: &str, topic: &str) -> Frame {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return Frame::Other;
    };
    if frame.get("topic").and_then(Value::as_str) != Some(topic) {
        return Frame::Other;
    }

    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
    match frame.get("event").and_then(Value::as_str) {
        Some("phx_reply") if frame.get("ref").and_then(Value::as_str) == Some(JOIN_REF) => {
            let ok = payload.get("status").and_then(Value::as_str) == Some("ok");
            let reason = payload
                .pointer("/response/reason")
                .and_then(Value::as_str)
                .map(str::to_string);
            Frame::JoinReply { ok, reason }
        }
        Some("postgres_changes") => Frame::Change(ChangeKind::parse(
            payload
                .pointer("/data/type")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        )),
        Some("phx_error") => Frame::Closed("channel error".to_string()),
        Some("phx_close") => Frame::Closed("channel closed by server".to_string()),
        Some("system") if payload.get("status").and_then(Value::as_str) == Some("error") => {
            Frame::Closed(
                payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("realtime system error")
                    .to_string(),
            )
        }
        _ => Frame::Other,
    }
}

fn to_network(err: tokio_tungstenite::tungstenite::Error) -> BackendError {
    BackendError::Network(format!("realtime: {}", err))
}

#[async_trait]
impl ChangeFeed for SupabaseClient {
    async fn subscribe(&self, table: Table) -> Result<Subscription, BackendError> {
        let url = websocket_url(&self.shared.base_url, &self.shared.anon_key);
        let topic = channel_topic(table);
        let timeout = self.shared.timeout;

        let (stream, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| BackendError::Network("realtime connect timed out".to_string()))?
            .map_err(to_network)?;
        let (mut sink, mut source) = stream.split();

        // Subscribed before the join so no rotation slips past.
        let mut auth_events = self.shared.events.subscribe();
        let client = self.clone();

        let join = join_message(table, &self.bearer().await);
        sink.send(Message::Text(join.to_string()))
            .await
            .map_err(to_network)?;

        let joined = tokio::time::timeout(timeout, async {
            while let Some(message) = source.next().await {
                if let Message::Text(text) = message.map_err(to_network)? {
                    if let Frame::JoinReply { ok, reason } = parse_frame(&text, &topic) {
                        return if ok {
                            Ok(())
                        } else {
                            Err(BackendError::Network(format!(
                                "join {} refused: {}",
                                topic,
                                reason.unwrap_or_else(|| "unknown reason".to_string())
                            )))
                        };
                    }
                }
            }
            Err(BackendError::Network(format!("{} closed before join", topic)))
        })
        .await
        .map_err(|_| BackendError::Network(format!("join {} timed out", topic)))?;
        joined?;
        info!(table = %table, "Realtime channel joined");

        let (tx, rx) = mpsc::channel(64);
        let (release_tx, mut release_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut heartbeat_ref: u64 = 1;
            let mut auth_open = true;

            loop {
                tokio::select! {
                    _ = &mut release_rx => {
                        let leave = json!({ "topic": topic, "event": "phx_leave", "payload": {}, "ref": "leave" });
                        let _ = sink.send(Message::Text(leave.to_string())).await;
                        let _ = sink.close().await;
                        debug!(table = %table, "Realtime channel left");
                        break;
                    }
                    _ = heartbeat.tick() => {
                        heartbeat_ref += 1;
                        let beat = json!({
                            "topic": "phoenix",
                            "event": "heartbeat",
                            "payload": {},
                            "ref": heartbeat_ref.to_string()
                        });
                        if let Err(e) = sink.send(Message::Text(beat.to_string())).await {
                            warn!(table = %table, error = %e, "Realtime heartbeat failed");
                            break;
                        }
                    }
                    event = auth_events.recv(), if auth_open => {
                        let token = match event {
                            Ok(event) => token_after(&event, &client.shared.anon_key),
                            Err(broadcast::error::RecvError::Lagged(_)) => Some(client.bearer().await),
                            Err(broadcast::error::RecvError::Closed) => {
                                auth_open = false;
                                None
                            }
                        };
                        if let Some(token) = token {
                            let push = access_token_message(&topic, &token);
                            if let Err(e) = sink.send(Message::Text(push.to_string())).await {
                                warn!(table = %table, error = %e, "Realtime token push failed");
                                break;
                            }
                            debug!(table = %table, "Realtime channel token rotated");
                        }
                    }
                    message = source.next() => match message {
                        Some(Ok(Message::Text(text))) => match parse_frame(&text, &topic) {
                            Frame::Change(kind) => {
                                if tx.send(ChangeEvent { table, kind }).await.is_err() {
                                    break;
                                }
                            }
                            Frame::Closed(reason) => {
                                warn!(table = %table, reason = %reason, "Realtime channel closed");
                                break;
                            }
                            _ => {}
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!(table = %table, "Realtime socket closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(table = %table, error = %e, "Realtime socket error");
                            break;
                        }
                    }
                }
            }
        });

        let guard = ReleaseGuard::new(move || {
            let _ = release_tx.send(());
        });
        Ok(Subscription::new(table, rx, guard))
    }
}
