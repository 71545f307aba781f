// src/views/validators.rs

use super::models::ReportIncidentRequest;
use crate::backend::CreateUserRequest;
use crate::common::validation::is_valid_email;
use crate::common::{ValidationResult, Validator};

pub const MIN_PASSWORD_LEN: usize = 8;

// ============================================================================
// Incident reporting
// ============================================================================

pub struct IncidentValidator;

impl Validator<ReportIncidentRequest> for IncidentValidator {
    fn validate(&self, data: &ReportIncidentRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        if result.require("title", &data.title, "Title") && data.title.trim().len() > 200 {
            result.add_error("title", "Title must be less than 200 characters");
        }
        result.require("description", &data.description, "Description");
        result.require("location", &data.location, "Location");

        if let Some(lat) = data.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                result.add_error("latitude", "Latitude must be between -90 and 90");
            }
        }
        if let Some(lng) = data.longitude {
            if !(-180.0..=180.0).contains(&lng) {
                result.add_error("longitude", "Longitude must be between -180 and 180");
            }
        }

        result
    }
}

// ============================================================================
// User provisioning
// ============================================================================

pub struct CreateUserValidator;

impl Validator<CreateUserRequest> for CreateUserValidator {
    fn validate(&self, data: &CreateUserRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        result.require("full_name", &data.full_name, "Full name");
        result.require("username", &data.username, "Username");
        if result.require("email", &data.email, "Email") && !is_valid_email(data.email.trim()) {
            result.add_error("email", "Email address is not valid");
        }
        if data.password.is_empty() {
            result.add_error("password", "Password is required");
        } else if data.password.chars().count() < MIN_PASSWORD_LEN {
            result.add_error("password", "Password must be at least 8 characters");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(title: &str, description: &str, location: &str) -> ReportIncidentRequest {
        ReportIncidentRequest {
            title: title.into(),
            description: description.into(),
            location: location.into(),
            severity: None,
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn test_incident_validator_valid_data() {
        let result = IncidentValidator.validate(&incident("Roadblock", "Unmarked vehicles", "Morogoro"));
        assert!(result.is_valid);
    }

    #[test]
    fn test_incident_validator_rejects_whitespace_fields() {
        let result = IncidentValidator.validate(&incident("   ", "\n", "Morogoro"));
        assert!(!result.is_valid);
        assert!(result.has_error("title"));
        assert!(result.has_error("description"));
        assert!(!result.has_error("location"));
    }

    #[test]
    fn test_incident_validator_checks_coordinates() {
        let mut request = incident("Roadblock", "Unmarked vehicles", "Morogoro");
        request.latitude = Some(123.0);
        let result = IncidentValidator.validate(&request);
        assert!(result.has_error("latitude"));
    }

    #[test]
    fn test_create_user_validator() {
        let valid = CreateUserRequest {
            email: "analyst@atiews.gov".into(),
            password: "Field@2024!".into(),
            full_name: "Analyst One".into(),
            username: "analyst".into(),
        };
        assert!(CreateUserValidator.validate(&valid).is_valid);

        let short = CreateUserRequest {
            password: "short".into(),
            ..valid.clone()
        };
        assert!(CreateUserValidator.validate(&short).has_error("password"));

        let bad_email = CreateUserRequest {
            email: "not-an-email".into(),
            ..valid.clone()
        };
        assert!(CreateUserValidator.validate(&bad_email).has_error("email"));

        let blank = CreateUserRequest {
            full_name: " ".into(),
            username: "".into(),
            ..valid
        };
        let result = CreateUserValidator.validate(&blank);
        assert!(result.has_error("full_name"));
        assert!(result.has_error("username"));
    }
}
