//! Identity, profile and session data models

use serde::{Deserialize, Serialize};

/// Authenticated principal as issued by the auth provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

/// Provider credentials for one signed-in identity. Never serialized to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub expires_at: i64,
    pub identity: Identity,
}

/// Access token claims read by the console (`sub`, `email`, `exp`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

/// `profiles` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub full_name: String,
    pub username: String,
    #[serde(default)]
    pub is_approved: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Admin,
    User,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppRole::Admin => "admin",
            AppRole::User => "user",
        }
    }
}

/// `user_roles` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: String,
    pub user_id: String,
    pub role: AppRole,
}

/// Where the session sits in the sign-in lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    Unauthenticated,
    PendingApproval,
    Active,
}

/// The console's view of who is signed in and what they may do
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub is_admin: bool,
    pub is_loading: bool,
}

impl Session {
    /// Authorization not yet known. Boot state, and the state right after sign-in.
    pub fn loading(identity: Option<Identity>) -> Self {
        Self {
            identity,
            profile: None,
            is_admin: false,
            is_loading: true,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            identity: None,
            profile: None,
            is_admin: false,
            is_loading: false,
        }
    }

    pub fn authenticated(identity: Identity, profile: Option<Profile>, is_admin: bool) -> Self {
        Self {
            identity: Some(identity),
            profile,
            is_admin,
            is_loading: false,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.profile.as_ref().map(|p| p.is_approved).unwrap_or(false)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_loading {
            SessionPhase::Loading
        } else if self.identity.is_none() {
            SessionPhase::Unauthenticated
        } else if self.is_admin || self.is_approved() {
            SessionPhase::Active
        } else {
            SessionPhase::PendingApproval
        }
    }
}

/// Auth-state transitions consumed by the session store
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// Emitted once at boot with whatever session the provider restored
    InitialSession(Option<AuthSession>),
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::InitialSession(_) => "initial_session",
            AuthEvent::SignedIn(_) => "signed_in",
            AuthEvent::TokenRefreshed(_) => "token_refreshed",
            AuthEvent::SignedOut => "signed_out",
        }
    }
}

/// Sign-in request payload
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}
