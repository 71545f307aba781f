//! Gate extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::request::Parts,
};
use tracing::{debug, error};

use super::{require, GateRejection};
use crate::auth::models::Session;
use crate::common::AppState;

/// Any signed-in, approved operator (admins always pass)
#[derive(Debug)]
pub struct Protected(pub Session);

/// Admin-only views; everyone else is redirected to the dashboard
#[derive(Debug)]
pub struct AdminOnly(pub Session);

async fn gated<S>(parts: &mut Parts, state: &S, require_admin: bool) -> Result<Session, GateRejection>
where
    S: Send + Sync,
{
    let Extension(app_state): Extension<AppState> = Extension::from_request_parts(parts, state)
        .await
        .map_err(|_| {
            error!("AppState extension missing from router");
            GateRejection::MissingState
        })?;

    require(&app_state.session, require_admin).map_err(|rejection| {
        debug!(
            path = %parts.uri.path(),
            require_admin = require_admin,
            rejection = ?rejection,
            "Gate rejected request"
        );
        rejection
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for Protected
where
    S: Send + Sync,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        gated(parts, state, false).await.map(Protected)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminOnly
where
    S: Send + Sync,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        gated(parts, state, true).await.map(AdminOnly)
    }
}
