//! Error types for dataflow-hub operations
//!
//! One crate-wide taxonomy: caller-fixable input errors, external-system
//! failures, internal integrity violations, and operational errors that are
//! recorded but never abort a surrounding loop.

use thiserror::Error;

/// Main error type for dataflow-hub operations
#[derive(Error, Debug)]
pub enum DataflowError {
    // ---- Input / validation (caller-fixable) ----
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Bad template for module '{module}': {reason}")]
    BadTemplate { module: String, reason: String },

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No suitable column for filter: {0}")]
    NoSuitableColumn(String),

    #[error("Join validation failed: {}", errors.join("; "))]
    JoinValidationFailed {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    #[error("Invalid pipeline transition: {0}")]
    InvalidTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ---- External systems ----
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Incompatible sink schema for table '{table}': {}", problems.join("; "))]
    IncompatibleSchema { table: String, problems: Vec<String> },

    #[error("{service} request failed: {detail}")]
    ExternalService { service: String, detail: String },

    // ---- Integrity (internal invariants) ----
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Integrity violation: {0}")]
    Integrity(String),

    // ---- Infrastructure pass-through ----
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mail build error: {0}")]
    MailBuild(#[from] lettre::error::Error),

    #[error("Mail address error: {0}")]
    MailAddress(#[from] lettre::address::AddressError),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

impl DataflowError {
    /// External-system error with a service label, used where reqwest's own
    /// error does not carry the response body.
    pub fn external(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            detail: detail.into(),
        }
    }
}

/// Convenience Result type that uses DataflowError
pub type Result<T> = std::result::Result<T, DataflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DataflowError::UnknownModule("mongodb".to_string());
        assert_eq!(err.to_string(), "Unknown module: mongodb");
    }

    #[test]
    fn test_join_validation_display_joins_errors() {
        let err = DataflowError::JoinValidationFailed {
            errors: vec!["Unknown alias 'x'".to_string(), "missing key".to_string()],
            warnings: vec![],
        };
        assert!(err.to_string().contains("Unknown alias 'x'"));
        assert!(err.to_string().contains("missing key"));
    }

    #[test]
    fn test_decryption_failure_reveals_nothing() {
        let err = DataflowError::DecryptionFailed;
        assert_eq!(err.to_string(), "Decryption failed");
    }
}
