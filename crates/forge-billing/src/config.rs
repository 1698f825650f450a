//! Runtime Configuration
//!
//! Every secret and endpoint the core needs, read once at startup and
//! handed to each component at construction. Components never reach into
//! the environment themselves.

use crate::error::{BillingError, Result};

/// Configuration for the billing core
#[derive(Clone, Debug)]
pub struct BillingConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Provider API secret key (None switches the binary to the mock gateway)
    pub provider_secret_key: Option<String>,

    /// Webhook signing secret shared with the provider
    pub webhook_secret: String,

    /// Secret for the HS256 client credential
    pub credential_secret: String,

    /// Post-payment redirect target; the session id placeholder is appended
    pub success_url: String,

    /// Redirect target when checkout is abandoned
    pub cancel_url: String,

    /// Dashboard URL embedded in the confirmation email
    pub dashboard_url: String,

    /// Transactional-mail API endpoint (None disables email)
    pub mail_api_url: Option<String>,

    /// Transactional-mail API key
    pub mail_api_key: Option<String>,

    /// Sender address for outbound mail
    pub mail_from: String,

    /// Chat webhook for operational alerts (None disables alerts)
    pub alert_webhook_url: Option<String>,
}

impl BillingConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;
        let credential_secret = std::env::var("CREDENTIAL_SECRET")
            .map_err(|_| BillingError::Config("CREDENTIAL_SECRET not set".into()))?;

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            provider_secret_key: std::env::var("STRIPE_SECRET_KEY").ok(),
            webhook_secret,
            credential_secret,
            success_url: env_or("CHECKOUT_SUCCESS_URL", "https://skillforge.app/success"),
            cancel_url: env_or("CHECKOUT_CANCEL_URL", "https://skillforge.app/register"),
            dashboard_url: env_or("DASHBOARD_URL", "https://skillforge.app/dashboard"),
            mail_api_url: std::env::var("MAIL_API_URL").ok(),
            mail_api_key: std::env::var("MAIL_API_KEY").ok(),
            mail_from: env_or("MAIL_FROM", "no-reply@skillforge.app"),
            alert_webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
