// Application state shared across all modules

use std::sync::Arc;

use super::config::AppConfig;
use crate::auth::SessionStore;
use crate::backend::{ChangeFeed, DataStore, Provisioner};

/// Application state containing backend collaborators, the session and configuration
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub session: SessionStore,
    pub store: Arc<dyn DataStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub provisioner: Arc<dyn Provisioner>,
}
