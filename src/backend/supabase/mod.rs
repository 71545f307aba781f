// src/backend/supabase/mod.rs
//
// Client for a hosted Supabase project. One `SupabaseClient` implements all
// four backend contracts and shares the signed-in access token between them.

mod auth;
mod functions;
mod realtime;
mod rest;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use super::BackendError;
use crate::auth::models::{AuthEvent, AuthSession};

pub(crate) struct Shared {
    pub http: Client,
    pub base_url: String,
    pub anon_key: String,
    pub timeout: Duration,
    pub session: RwLock<Option<AuthSession>>,
    pub events: broadcast::Sender<AuthEvent>,
    pub refresher: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct SupabaseClient {
    shared: Arc<Shared>,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(BackendError::from)?;

        Ok(Self {
            shared: Arc::new(Shared {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                anon_key: anon_key.to_string(),
                timeout,
                session: RwLock::new(None),
                events: broadcast::channel(16).0,
                refresher: Mutex::new(None),
            }),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.shared.base_url, path)
    }

    /// Bearer for data calls: the user's access token, else the anon key
    async fn bearer(&self) -> String {
        self.shared
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.shared.anon_key.clone())
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.shared.anon_key)
            .bearer_auth(self.bearer().await)
    }
}

/// Pulls the human-readable message out of a GoTrue/PostgREST/function error body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().chars().take(200).collect())
}

/// Classifies a non-success status from a data call.
pub(crate) fn status_error(status: StatusCode, body: &str, write: bool) -> BackendError {
    let message = error_message(body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::Network(format!("{}: {}", status, message))
    } else if write {
        BackendError::RemoteWrite(message)
    } else if status == StatusCode::UNAUTHORIZED {
        BackendError::Auth(message)
    } else {
        BackendError::Decode(format!("{}: {}", status, message))
    }
}
