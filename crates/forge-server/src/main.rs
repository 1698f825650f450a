//! SkillForge HTTP Server
//!
//! Axum-based server exposing the billing core: checkout creation, the
//! post-redirect verification bridge, the provider webhook endpoint, and
//! the supplemental auth and pricing routes.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_billing::{
    AccountStore, BillingConfig, BillingGateway, CheckoutService, CredentialSigner, HttpMailer,
    Mailer, MemoryAccountStore, MemoryLedger, MockGateway, NotificationDispatcher, StripeGateway,
    WebhookProcessor,
};

use crate::handlers::{
    create_checkout, health_check, list_pricing, login, provider_webhook, register,
    verify_checkout_session,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = BillingConfig::from_env()?;

    // Stores (in-memory reference implementations)
    let store: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());
    let ledger = Arc::new(MemoryLedger::new());

    // Provider gateway
    let stripe_configured = config.provider_secret_key.is_some();
    let gateway: Arc<dyn BillingGateway> = match &config.provider_secret_key {
        Some(secret_key) => {
            tracing::info!("✓ Stripe configured");
            Arc::new(StripeGateway::new(secret_key))
        }
        None => {
            tracing::warn!("⚠ STRIPE_SECRET_KEY not set - using mock gateway");
            Arc::new(MockGateway::new())
        }
    };

    // Outbound mail
    let mailer: Option<Arc<dyn Mailer>> = match (&config.mail_api_url, &config.mail_api_key) {
        (Some(url), Some(key)) => {
            tracing::info!("✓ Mail API configured");
            Some(Arc::new(HttpMailer::new(url, key, &config.mail_from)?))
        }
        _ => {
            tracing::warn!("⚠ Mail API not configured - confirmation emails disabled");
            None
        }
    };

    let notifier = NotificationDispatcher::new(
        mailer,
        ledger.clone(),
        config.alert_webhook_url.clone(),
        config.dashboard_url.clone(),
    )?;

    let signer = CredentialSigner::new(&config.credential_secret);

    let checkout = Arc::new(CheckoutService::new(
        store.clone(),
        gateway.clone(),
        signer.clone(),
        config.success_url.clone(),
        config.cancel_url.clone(),
    ));

    let webhooks = Arc::new(WebhookProcessor::new(
        store.clone(),
        ledger.clone(),
        gateway.clone(),
        notifier,
        signer.clone(),
        config.webhook_secret.clone(),
    ));

    // Build application state
    let state = AppState {
        store,
        gateway,
        checkout,
        webhooks,
        signer,
        stripe_configured,
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health & catalog
        .route("/health", get(health_check))
        .route("/pricing", get(list_pricing))
        // Auth
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        // Checkout
        .route("/checkout/create-session", post(create_checkout))
        .route("/checkout/session/{session_id}", get(verify_checkout_session))
        // Provider callbacks
        .route("/webhook", post(provider_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("🚀 forge-server running on http://{}", config.bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                        - Health check");
    tracing::info!("  GET  /pricing                       - Active offerings");
    tracing::info!("  POST /auth/register                 - Direct registration");
    tracing::info!("  POST /auth/login                    - Login");
    tracing::info!("  POST /checkout/create-session       - Open hosted checkout");
    tracing::info!("  GET  /checkout/session/{{id}}         - Post-redirect verification");
    tracing::info!("  POST /webhook                       - Provider callbacks");

    axum::serve(listener, app).await?;

    Ok(())
}
