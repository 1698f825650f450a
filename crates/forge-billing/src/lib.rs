//! # forge-billing
//!
//! Payment-session and subscription-lifecycle core for SkillForge.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐    ┌─────────────────┐    ┌──────────────┐
//! │  /checkout/  │───▶│  Provider-hosted │───▶│  /checkout/  │
//! │create-session│    │  checkout page   │    │ session/{id} │
//! └──────────────┘    └────────┬────────┘    └──────────────┘
//!                              │ async, signed
//!                              ▼
//!                        ┌──────────┐
//!                        │ /webhook │──▶ ledger ──▶ synchronizer ──▶ notify
//!                        └──────────┘
//! ```
//!
//! The initiator opens a hosted checkout session with the registrant
//! fields embedded as metadata. Payment confirmation arrives as a signed
//! webhook that races the client's post-redirect poll against the
//! verification bridge; both paths converge on the same user record.
//! Webhook deliveries are at-least-once and possibly out of order, so
//! the ledger carries an idempotency key and every state write is an
//! atomic per-key upsert.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use forge_billing::{
//!     BillingConfig, CheckoutService, CredentialSigner, MemoryAccountStore,
//!     MemoryLedger, MockGateway, RegistrationRequest,
//! };
//! use std::sync::Arc;
//!
//! let config = BillingConfig::from_env()?;
//! let store = Arc::new(MemoryAccountStore::new());
//! let gateway = Arc::new(MockGateway::new());
//! let signer = CredentialSigner::new(&config.credential_secret);
//!
//! let checkout = CheckoutService::new(
//!     store, gateway, signer,
//!     &config.success_url, &config.cancel_url,
//! );
//! let session = checkout.create_session(&RegistrationRequest {
//!     first_name: "Jane".into(),
//!     last_name: "Doe".into(),
//!     email: "jane@example.com".into(),
//!     product_id: "price_pro".into(),
//! }).await?;
//! // Redirect the client to: session.url
//! ```

pub mod account;
pub mod checkout;
pub mod config;
pub mod credential;
pub mod error;
pub mod event;
pub mod gateway;
pub mod ledger;
pub mod notify;
pub mod sync;
pub mod webhook;

pub use account::{
    AccountStore, CheckoutSession, MemoryAccountStore, SessionStatus, SubscriptionActivation,
    SubscriptionStatus, User,
};
pub use checkout::{CheckoutService, RegistrationRequest, SessionVerification, UserProjection};
pub use config::BillingConfig;
pub use credential::{hash_password, verify_password, Claims, CredentialSigner};
pub use error::{BillingError, Result};
pub use event::{ProviderEvent, VerifiedEvent};
pub use gateway::{
    BillingGateway, CustomerDetails, HostedSession, MockGateway, Offering, SessionDetails,
    SessionRequest, StripeGateway,
};
pub use ledger::{
    ErrorContext, ErrorRecord, EventLedger, EventRecord, LedgerAppend, MemoryLedger,
};
pub use notify::{HttpMailer, MailMessage, Mailer, MockMailer, NotificationDispatcher};
pub use sync::Synchronizer;
pub use webhook::WebhookProcessor;
