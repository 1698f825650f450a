//! Billing Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BillingError>;

/// Billing-related errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// Caller input missing or malformed
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Email already belongs to an existing user
    #[error("Email already registered: {0}")]
    Conflict(String),

    /// Session identifier does not match the provider's id shape
    #[error("Malformed session identifier: {0}")]
    InvalidIdentifier(String),

    /// No matching local record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Plan does not correspond to an active priced offering
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// Provider, email, or chat call failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Local store write or read failed
    #[error("Storage error: {0}")]
    Persistence(String),

    /// Webhook authenticity check failed
    #[error("Webhook signature invalid: {0}")]
    Signature(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential signing or verification failed
    #[error("Credential error: {0}")]
    Credential(String),
}

impl BillingError {
    /// Stable machine-readable code for error responses
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "INVALID_INPUT",
            BillingError::Conflict(_) => "EMAIL_EXISTS",
            BillingError::InvalidIdentifier(_) => "INVALID_SESSION_ID",
            BillingError::NotFound(_) => "NOT_FOUND",
            BillingError::UnknownPlan(_) => "UNKNOWN_PLAN",
            BillingError::Upstream(_) => "UPSTREAM_ERROR",
            BillingError::Persistence(_) => "STORAGE_ERROR",
            BillingError::Signature(_) => "INVALID_SIGNATURE",
            BillingError::Config(_) => "CONFIG_ERROR",
            BillingError::Credential(_) => "CREDENTIAL_ERROR",
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            BillingError::Validation(msg) => msg.clone(),
            BillingError::Conflict(_) => "Email already registered. Please log in.".into(),
            BillingError::InvalidIdentifier(_) => "That checkout session id is not valid.".into(),
            BillingError::NotFound(_) => "User not found.".into(),
            BillingError::UnknownPlan(_) => "The selected plan is not available.".into(),
            BillingError::Upstream(_) => "Payment processing failed. Please try again.".into(),
            BillingError::Signature(_) => "Invalid signature".into(),
            _ => "An error occurred processing your request.".into(),
        }
    }
}
