//! Edge function invocation (`admin-create-user`, `init-admin`)

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use super::{error_message, SupabaseClient};
use crate::backend::{BackendError, CreateUserRequest, FunctionResponse, Provisioner};
use crate::common::safe_email_log;

impl SupabaseClient {
    async fn invoke<B: Serialize + ?Sized>(
        &self,
        name: &str,
        body: &B,
    ) -> Result<FunctionResponse, BackendError> {
        let url = self.endpoint(&format!("/functions/v1/{}", name));
        let response = self
            .authorized(self.shared.http.post(&url))
            .await
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        // Functions answer `{ error }` with 4xx/5xx; the body is the interesting part.
        match serde_json::from_str::<FunctionResponse>(&text) {
            Ok(parsed) if parsed.success || parsed.error.is_some() => Ok(parsed),
            _ if status.is_server_error() => Err(BackendError::Network(format!(
                "function {} returned {}",
                name, status
            ))),
            _ if !status.is_success() => Ok(FunctionResponse::failed(error_message(&text))),
            _ => Err(BackendError::Decode(format!(
                "function {} returned an unexpected body",
                name
            ))),
        }
    }
}

#[async_trait]
impl Provisioner for SupabaseClient {
    async fn create_user(
        &self,
        request: &CreateUserRequest,
    ) -> Result<FunctionResponse, BackendError> {
        let response = self.invoke("admin-create-user", request).await?;
        if response.success {
            info!(email = %safe_email_log(&request.email), "Provisioned user account");
        } else {
            warn!(
                email = %safe_email_log(&request.email),
                error = ?response.error,
                "User provisioning refused"
            );
        }
        Ok(response)
    }

    async fn init_admin(&self, secret: &str) -> Result<FunctionResponse, BackendError> {
        self.invoke("init-admin", &serde_json::json!({ "secret": secret }))
            .await
    }
}
