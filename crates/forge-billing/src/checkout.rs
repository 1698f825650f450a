//! Checkout Session Flow
//!
//! Session creation against the provider and the post-redirect
//! verification bridge the client polls while the webhook races it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::account::{AccountStore, CheckoutSession, User};
use crate::credential::CredentialSigner;
use crate::error::{BillingError, Result};
use crate::gateway::{BillingGateway, HostedSession, SessionRequest};

/// Placeholder the provider substitutes with the real session id on redirect
const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Registrant fields accepted by session creation
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub product_id: String,
}

/// Display-safe projection returned to clients
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProjection {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl UserProjection {
    pub fn of(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.display_name(),
            email: user.email.clone(),
        }
    }
}

/// Successful bridge lookup: a credential plus who it belongs to
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionVerification {
    pub token: String,
    pub user: UserProjection,
}

pub struct CheckoutService {
    store: Arc<dyn AccountStore>,
    gateway: Arc<dyn BillingGateway>,
    signer: CredentialSigner,
    success_url: String,
    cancel_url: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        gateway: Arc<dyn BillingGateway>,
        signer: CredentialSigner,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            signer,
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        }
    }

    /// Create a provider checkout session and its local shadow row.
    ///
    /// The registrant fields ride along as session metadata so the async
    /// callback can provision the user without a prior local lookup. A
    /// provider session whose local insert fails is tolerated; the
    /// webhook path recovers from metadata alone.
    pub async fn create_session(&self, request: &RegistrationRequest) -> Result<HostedSession> {
        validate_registration(request)?;

        if self.store.find_user_by_email(&request.email)?.is_some() {
            return Err(BillingError::Conflict(request.email.clone()));
        }

        let offerings = self.gateway.list_active_offerings().await?;
        if !offerings.iter().any(|offering| offering.id == request.product_id) {
            return Err(BillingError::UnknownPlan(request.product_id.clone()));
        }

        let session = self
            .gateway
            .create_checkout_session(&SessionRequest {
                email: request.email.clone(),
                plan: request.product_id.clone(),
                first_name: request.first_name.clone(),
                last_name: request.last_name.clone(),
                success_url: format!("{}?session_id={SESSION_ID_PLACEHOLDER}", self.success_url),
                cancel_url: self.cancel_url.clone(),
            })
            .await?;

        tracing::info!(session_id = %session.id, email = %request.email, "checkout session created");

        self.store.insert_session(CheckoutSession::created(
            &session.id,
            &request.email,
            &request.product_id,
            &request.first_name,
            &request.last_name,
        ))?;

        Ok(session)
    }

    /// Resolve a post-redirect session id to a local user and credential.
    ///
    /// Read-only. `NotFound` here usually means the webhook has not
    /// landed yet; the client is expected to poll.
    pub async fn verify_session(&self, session_id: &str) -> Result<SessionVerification> {
        if !is_session_id(session_id) {
            return Err(BillingError::InvalidIdentifier(session_id.to_string()));
        }

        let session = self.gateway.retrieve_session(session_id).await?;
        let customer_ref = session
            .customer_ref
            .ok_or_else(|| BillingError::Upstream("session has no customer".into()))?;

        let customer = self.gateway.retrieve_customer(&customer_ref).await?;
        let email = customer
            .email
            .ok_or_else(|| BillingError::NotFound("customer has no email".into()))?;

        let user = self
            .store
            .find_user_by_email(&email)?
            .ok_or_else(|| BillingError::NotFound(format!("no user for {email}")))?;

        let token = self.signer.issue(&user)?;
        tracing::info!(session_id = %session_id, user_id = %user.id, "session verified");

        Ok(SessionVerification {
            token,
            user: UserProjection::of(&user),
        })
    }
}

fn validate_registration(request: &RegistrationRequest) -> Result<()> {
    let missing = [
        ("firstName", &request.first_name),
        ("lastName", &request.last_name),
        ("email", &request.email),
        ("productId", &request.product_id),
    ]
    .iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| *name)
    .collect::<Vec<_>>();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BillingError::Validation(format!(
            "missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Shape check for provider session ids: a `cs_` scheme tag followed by
/// a non-empty opaque token. Anything else short-circuits before any
/// upstream call.
fn is_session_id(candidate: &str) -> bool {
    match candidate.strip_prefix("cs_") {
        Some(rest) if !rest.is_empty() => rest
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_'),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MemoryAccountStore;
    use crate::account::SessionStatus;
    use crate::gateway::MockGateway;

    fn request() -> RegistrationRequest {
        RegistrationRequest {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: "jane@example.com".into(),
            product_id: "price_pro".into(),
        }
    }

    fn service(
        store: Arc<MemoryAccountStore>,
        gateway: Arc<MockGateway>,
    ) -> CheckoutService {
        CheckoutService::new(
            store,
            gateway,
            CredentialSigner::new("test-secret"),
            "https://skillforge.app/success",
            "https://skillforge.app/register",
        )
    }

    #[tokio::test]
    async fn test_create_session_persists_created_row() {
        let store = Arc::new(MemoryAccountStore::new());
        let gateway = Arc::new(MockGateway::new());
        let checkout = service(store.clone(), gateway.clone());

        let session = checkout.create_session(&request()).await.unwrap();
        assert!(session.url.contains(&session.id));

        let row = store.find_session(&session.id).unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Created);
        assert_eq!(row.email, "jane@example.com");
        assert_eq!(row.plan, "price_pro");
    }

    #[tokio::test]
    async fn test_missing_fields_rejected() {
        let store = Arc::new(MemoryAccountStore::new());
        let gateway = Arc::new(MockGateway::new());
        let checkout = service(store, gateway.clone());

        let mut bad = request();
        bad.email = "  ".into();
        let err = checkout.create_session(&bad).await.unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
        assert_eq!(gateway.outbound_calls(), 0);
    }

    #[tokio::test]
    async fn test_existing_email_conflicts_without_provider_call() {
        let store = Arc::new(MemoryAccountStore::new());
        store
            .insert_user(User::new("Jane", "Doe", "jane@example.com"))
            .unwrap();
        let gateway = Arc::new(MockGateway::new());
        let checkout = service(store, gateway.clone());

        let err = checkout.create_session(&request()).await.unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));
        assert_eq!(gateway.outbound_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_plan_rejected() {
        let store = Arc::new(MemoryAccountStore::new());
        let gateway = Arc::new(MockGateway::new());
        let checkout = service(store, gateway);

        let mut bad = request();
        bad.product_id = "price_nonexistent".into();
        let err = checkout.create_session(&bad).await.unwrap_err();
        assert!(matches!(err, BillingError::UnknownPlan(_)));
    }

    #[tokio::test]
    async fn test_malformed_session_id_short_circuits() {
        let store = Arc::new(MemoryAccountStore::new());
        let gateway = Arc::new(MockGateway::new());
        let checkout = service(store, gateway.clone());

        let err = checkout.verify_session("not-a-session").await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidIdentifier(_)));
        assert_eq!(gateway.outbound_calls(), 0);
    }

    #[tokio::test]
    async fn test_verify_session_returns_token_and_projection() {
        let store = Arc::new(MemoryAccountStore::new());
        store
            .insert_user(User::new("Jane", "Doe", "jane@example.com"))
            .unwrap();
        let gateway = Arc::new(MockGateway::new());
        gateway.insert_session("cs_test_abc123", Some("cus_42"));
        gateway.insert_customer("cus_42", Some("jane@example.com"));
        let checkout = service(store, gateway);

        let verification = checkout.verify_session("cs_test_abc123").await.unwrap();
        assert_eq!(verification.user.email, "jane@example.com");
        assert_eq!(verification.user.name, "Jane Doe");

        let claims = CredentialSigner::new("test-secret")
            .verify(&verification.token)
            .unwrap();
        assert_eq!(claims.email, "jane@example.com");
    }

    #[tokio::test]
    async fn test_verify_session_before_webhook_is_not_found() {
        let store = Arc::new(MemoryAccountStore::new());
        let gateway = Arc::new(MockGateway::new());
        gateway.insert_session("cs_test_abc123", Some("cus_42"));
        gateway.insert_customer("cus_42", Some("jane@example.com"));
        let checkout = service(store, gateway);

        let err = checkout.verify_session("cs_test_abc123").await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[test]
    fn test_session_id_shapes() {
        assert!(is_session_id("cs_test_abc123"));
        assert!(is_session_id("cs_live_a1B2c3"));
        assert!(!is_session_id("not-a-session"));
        assert!(!is_session_id("cs_"));
        assert!(!is_session_id("cs_test space"));
        assert!(!is_session_id(""));
    }
}
