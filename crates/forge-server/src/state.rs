//! Application State

use std::sync::Arc;

use forge_billing::{
    AccountStore, BillingGateway, CheckoutService, CredentialSigner, WebhookProcessor,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Account and session store
    pub store: Arc<dyn AccountStore>,

    /// Payment provider gateway (Stripe, or the mock when unconfigured)
    pub gateway: Arc<dyn BillingGateway>,

    /// Session creation and verification bridge
    pub checkout: Arc<CheckoutService>,

    /// Inbound provider event processing
    pub webhooks: Arc<WebhookProcessor>,

    /// Client credential signer shared with the auth routes
    pub signer: CredentialSigner,

    /// Whether a real provider key is configured
    pub stripe_configured: bool,
}
