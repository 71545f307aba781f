// Helper functions for safe logging and timestamps

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// JSON keys whose values never reach the logs
const SECRET_KEYS: &[&str] = &[
    "password",
    "secret",
    "access_token",
    "refresh_token",
    "apikey",
];

/// Masks email addresses for safe logging
/// Prevents sensitive data exposure while preserving debugging utility
///
/// # Example
/// ```
/// let masked = safe_email_log("operator@atiews.gov");
/// // Returns: "o***@atiews.gov"
/// ```
pub fn safe_email_log(email: &str) -> String {
    if email.len() > 3 {
        let parts: Vec<&str> = email.split('@').collect();
        if parts.len() == 2 && !parts[0].is_empty() {
            let first = parts[0].chars().next().unwrap_or('*');
            format!("{}***@{}", first, parts[1])
        } else {
            "***@***.***".to_string()
        }
    } else {
        "***@***.***".to_string()
    }
}

/// Masks tokens for safe logging
/// Shows only first and last 4 characters
pub fn safe_token_log(token: &str) -> String {
    if token.len() > 8 && token.is_ascii() {
        format!("{}...{}", &token[..4], &token[token.len() - 4..])
    } else {
        "***".to_string()
    }
}

/// Replaces secret-bearing values anywhere inside a JSON document.
pub fn redact_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                let lowered = key.to_lowercase();
                if SECRET_KEYS.iter().any(|secret| lowered == *secret) {
                    *inner = Value::String("***".to_string());
                } else {
                    redact_secrets(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}

/// RFC 3339 timestamp with microsecond precision, as the backend stores them
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_email_log() {
        assert_eq!(safe_email_log("operator@atiews.gov"), "o***@atiews.gov");
        assert_eq!(safe_email_log("a@b"), "***@***.***");
        assert_eq!(safe_email_log("not-an-email"), "***@***.***");
    }

    #[test]
    fn test_safe_token_log() {
        assert_eq!(safe_token_log("eyJhbGciOiJIUzI1NiJ9"), "eyJh...NiJ9");
        assert_eq!(safe_token_log("short"), "***");
    }

    #[test]
    fn test_redact_secrets_nested() {
        let mut body = json!({
            "email": "operator@atiews.gov",
            "password": "hunter22",
            "session": { "access_token": "abc", "expires_at": 10 },
            "items": [{ "Secret": "x" }]
        });
        redact_secrets(&mut body);
        assert_eq!(body["password"], "***");
        assert_eq!(body["session"]["access_token"], "***");
        assert_eq!(body["session"]["expires_at"], 10);
        assert_eq!(body["items"][0]["Secret"], "***");
        assert_eq!(body["email"], "operator@atiews.gov");
    }
}
