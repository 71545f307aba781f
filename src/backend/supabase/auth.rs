//! GoTrue password grant, refresh and logout

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{error_message, Shared, SupabaseClient};
use crate::auth::models::{AuthEvent, AuthSession, Claims, Identity};
use crate::backend::{AuthProvider, BackendError};
use crate::common::{safe_email_log, safe_token_log};

/// Refresh this long before the access token expires
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: TokenUser,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs))
            .or_else(|| token_expiry(&self.access_token))
            .unwrap_or_else(|| Utc::now().timestamp() + 3600);

        AuthSession {
            identity: Identity {
                id: self.user.id,
                email: self.user.email.unwrap_or_default(),
            },
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

/// Reads `exp` without verifying the signature; the backend verifies tokens.
pub(crate) fn token_expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims = HashSet::new();
    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims.exp)
}

async fn request_token(
    shared: &Shared,
    grant_type: &str,
    body: serde_json::Value,
) -> Result<AuthSession, BackendError> {
    let url = format!("{}/auth/v1/token?grant_type={}", shared.base_url, grant_type);
    let response = shared
        .http
        .post(&url)
        .header("apikey", &shared.anon_key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        let token: TokenResponse = response.json().await?;
        Ok(token.into_session())
    } else {
        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            400 | 401 | 403 | 422 => Err(BackendError::Auth(error_message(&body))),
            _ => Err(BackendError::Network(format!(
                "auth service returned {}: {}",
                status,
                error_message(&body)
            ))),
        }
    }
}

/// Keeps the access token fresh until a refresh fails or the task is aborted.
async fn refresh_loop(shared: Arc<Shared>, mut current: AuthSession) {
    loop {
        let wait = (current.expires_at - REFRESH_MARGIN_SECS - Utc::now().timestamp()).max(1);
        tokio::time::sleep(Duration::from_secs(wait as u64)).await;

        let body = serde_json::json!({ "refresh_token": current.refresh_token });
        match request_token(&shared, "refresh_token", body).await {
            Ok(next) => {
                debug!(
                    user_id = %next.identity.id,
                    token = %safe_token_log(&next.access_token),
                    "Access token refreshed"
                );
                *shared.session.write().await = Some(next.clone());
                let _ = shared.events.send(AuthEvent::TokenRefreshed(next.clone()));
                current = next;
            }
            Err(e) => {
                warn!(error = %e, user_id = %current.identity.id, "Token refresh failed; session expired");
                *shared.session.write().await = None;
                let _ = shared.events.send(AuthEvent::SignedOut);
                return;
            }
        }
    }
}

impl SupabaseClient {
    fn replace_refresher(&self, next: Option<tokio::task::JoinHandle<()>>) {
        let mut slot = self
            .shared
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = next;
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, BackendError> {
        debug!(email = %safe_email_log(email), "Requesting password grant");
        let body = serde_json::json!({ "email": email.trim(), "password": password });
        let session = request_token(&self.shared, "password", body).await.map_err(|e| {
            warn!(email = %safe_email_log(email), error = %e, "Password sign-in failed");
            e
        })?;

        *self.shared.session.write().await = Some(session.clone());
        let refresher = tokio::spawn(refresh_loop(self.shared.clone(), session.clone()));
        self.replace_refresher(Some(refresher));

        info!(
            user_id = %session.identity.id,
            email = %safe_email_log(&session.identity.email),
            "Signed in"
        );
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.replace_refresher(None);
        let session = self.shared.session.write().await.take();
        let Some(session) = session else {
            return Ok(());
        };

        let response = self
            .shared
            .http
            .post(self.endpoint("/auth/v1/logout"))
            .header("apikey", &self.shared.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::Network(format!(
                "logout returned {}: {}",
                status,
                error_message(&body)
            )))
        }
    }

    async fn initial_session(&self) -> Option<AuthSession> {
        self.shared.session.read().await.clone()
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn test_token_expiry_reads_unverified_exp() {
        let claims = Claims {
            sub: "user-1".into(),
            email: Some("op@atiews.gov".into()),
            exp: 1_900_000_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"project-secret"),
        )
        .unwrap();

        assert_eq!(token_expiry(&token), Some(1_900_000_000));
        assert_eq!(token_expiry("not-a-jwt"), None);
    }

    #[test]
    fn test_token_response_prefers_expires_at() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "expires_at": 1_800_000_000,
            "user": { "id": "u1", "email": "op@atiews.gov" }
        }))
        .unwrap();
        let session = response.into_session();
        assert_eq!(session.expires_at, 1_800_000_000);
        assert_eq!(session.identity.id, "u1");
    }

    #[test]
    fn test_token_response_falls_back_to_expires_in() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 120,
            "user": { "id": "u1" }
        }))
        .unwrap();
        let before = Utc::now().timestamp();
        let session = response.into_session();
        assert!(session.expires_at >= before + 120);
        assert_eq!(session.identity.email, "");
    }
}
