// src/common/config.rs
//! Process configuration loaded from the environment (after `.env`).

use std::env;
use std::time::Duration;

/// Which managed backend the console talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Hosted Supabase project (GoTrue, PostgREST, Realtime, Edge Functions)
    Supabase,
    /// In-process backend for local development
    Memory,
}

impl BackendKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "supabase" => Some(BackendKind::Supabase),
            "memory" | "mem" | "local" => Some(BackendKind::Memory),
            _ => None,
        }
    }
}

/// Settings for the in-process backend
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub jwt_secret: String,
    pub init_secret: String,
    pub admin_email: String,
    pub admin_password: String,
    pub seed_demo: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub request_timeout: Duration,
    pub list_limit: usize,
    pub memory: MemoryConfig,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_LIST_LIMIT: usize = 50;

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("ATIEWS_BACKEND") {
            Some(raw) => BackendKind::parse(&raw).unwrap_or_else(|| {
                eprintln!("Unknown ATIEWS_BACKEND '{}', falling back to supabase", raw);
                BackendKind::Supabase
            }),
            None => BackendKind::Supabase,
        };

        // Clamped into the 1..=60s window; zero would turn every call into a timeout.
        let request_timeout_secs = lookup("ATIEWS_REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
            .clamp(1, 60);

        let list_limit = lookup("ATIEWS_LIST_LIMIT")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LIST_LIMIT);

        let memory = MemoryConfig {
            jwt_secret: lookup("ATIEWS_MEMORY_JWT_SECRET")
                .unwrap_or_else(|| "atiews-local-development-secret".to_string()),
            init_secret: lookup("ATIEWS_INIT_SECRET")
                .unwrap_or_else(|| "ATIEWS_INIT_2024".to_string()),
            admin_email: lookup("ATIEWS_BOOTSTRAP_ADMIN_EMAIL")
                .unwrap_or_else(|| "admin@atiews.gov".to_string()),
            admin_password: lookup("ATIEWS_BOOTSTRAP_ADMIN_PASSWORD")
                .unwrap_or_else(|| "Admin@2024!".to_string()),
            seed_demo: lookup("ATIEWS_SEED_DEMO")
                .map(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1")
                .unwrap_or(false),
        };

        let port = lookup("PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8080);

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173,http://localhost:8080".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Self {
            backend,
            supabase_url: lookup("SUPABASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            supabase_anon_key: lookup("SUPABASE_ANON_KEY"),
            request_timeout: Duration::from_secs(request_timeout_secs),
            list_limit,
            memory,
            port,
            cors_origins,
        }
    }
}

/// Print backend mode on startup
pub fn print_backend_status(config: &AppConfig) {
    match config.backend {
        BackendKind::Memory => {
            println!("⚠️  IN-MEMORY BACKEND ⚠️");
            println!("   Data, accounts and sessions vanish on restart");
            println!("   Bootstrap admin: {}", config.memory.admin_email);
            println!(
                "   Demo data: {}",
                if config.memory.seed_demo { "Yes" } else { "No" }
            );
            println!();
        }
        BackendKind::Supabase => {
            println!(
                "🔒 Supabase backend: {}",
                config.supabase_url.as_deref().unwrap_or("<SUPABASE_URL not set>")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.backend, BackendKind::Supabase);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.list_limit, 50);
        assert_eq!(config.port, 8080);
        assert!(!config.memory.seed_demo);
        assert_eq!(config.cors_origins.len(), 2);
    }

    #[test]
    fn test_memory_backend_and_overrides() {
        let config = config_from(&[
            ("ATIEWS_BACKEND", "Memory"),
            ("ATIEWS_LIST_LIMIT", "20"),
            ("ATIEWS_SEED_DEMO", "true"),
            ("SUPABASE_URL", "https://demo.supabase.co/"),
        ]);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.list_limit, 20);
        assert!(config.memory.seed_demo);
        assert_eq!(
            config.supabase_url.as_deref(),
            Some("https://demo.supabase.co")
        );
    }

    #[test]
    fn test_timeout_is_clamped() {
        let config = config_from(&[("ATIEWS_REQUEST_TIMEOUT_SECS", "0")]);
        assert_eq!(config.request_timeout, Duration::from_secs(1));

        let config = config_from(&[("ATIEWS_REQUEST_TIMEOUT_SECS", "3600")]);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_list_limit_falls_back() {
        let config = config_from(&[("ATIEWS_LIST_LIMIT", "0")]);
        assert_eq!(config.list_limit, DEFAULT_LIST_LIMIT);
    }
}
