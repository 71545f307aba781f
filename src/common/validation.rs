// Common validation types and traits

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, field: &str, message: &str) {
        self.is_valid = false;
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    /// Records an error when `value` is blank after trimming.
    pub fn require(&mut self, field: &str, value: &str, label: &str) -> bool {
        if value.trim().is_empty() {
            self.add_error(field, &format!("{} is required", label));
            false
        } else {
            true
        }
    }

    #[cfg(test)]
    pub fn has_error(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// `field: message` pairs joined for a single-line error body
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn into_result(self) -> Result<(), ValidationResult> {
        if self.is_valid {
            Ok(())
        } else {
            Err(self)
        }
    }
}

pub trait Validator<T> {
    fn validate(&self, data: &T) -> ValidationResult;
}

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

/// Loose shape check, the auth provider owns real verification.
pub fn is_valid_email(email: &str) -> bool {
    let re = EMAIL_RE
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email regex"));
    re.is_match(email.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_trims() {
        let mut result = ValidationResult::new();
        assert!(!result.require("title", "   ", "Title"));
        assert!(result.require("location", "Dodoma", "Location"));
        assert!(!result.is_valid);
        assert!(result.has_error("title"));
        assert!(!result.has_error("location"));
        assert_eq!(result.summary(), "title: Title is required");
    }

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("operator@atiews.gov"));
        assert!(is_valid_email("  a.b@c.co "));
        assert!(!is_valid_email("operator"));
        assert!(!is_valid_email("operator@localhost"));
        assert!(!is_valid_email("a b@c.co"));
    }
}
