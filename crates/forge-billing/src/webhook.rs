//! Webhook Event Processing
//!
//! Verifies inbound provider callbacks, appends them to the ledger, and
//! dispatches by event kind. Once a signature has verified, the endpoint
//! acknowledges the delivery no matter what happens downstream: the
//! provider cannot fix a receiver-side failure by retrying, so those
//! failures land in the error ledger for replay instead.

use std::sync::Arc;

use crate::account::{AccountStore, SubscriptionActivation, SubscriptionStatus};
use crate::credential::CredentialSigner;
use crate::error::{BillingError, Result};
use crate::event::{self, ProviderEvent, VerifiedEvent};
use crate::gateway::BillingGateway;
use crate::ledger::{ErrorContext, ErrorRecord, EventLedger, EventRecord, LedgerAppend};
use crate::notify::NotificationDispatcher;
use crate::sync::Synchronizer;

pub struct WebhookProcessor {
    store: Arc<dyn AccountStore>,
    ledger: Arc<dyn EventLedger>,
    gateway: Arc<dyn BillingGateway>,
    synchronizer: Synchronizer,
    notifier: NotificationDispatcher,
    signer: CredentialSigner,
    webhook_secret: String,
}

impl WebhookProcessor {
    pub fn new(
        store: Arc<dyn AccountStore>,
        ledger: Arc<dyn EventLedger>,
        gateway: Arc<dyn BillingGateway>,
        notifier: NotificationDispatcher,
        signer: CredentialSigner,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            synchronizer: Synchronizer::new(store.clone()),
            store,
            ledger,
            gateway,
            notifier,
            signer,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Handle one delivery. The only error this returns is `Signature`;
    /// everything after verification is ledgered and suppressed.
    pub async fn process(&self, body: &[u8], signature_header: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let verified =
            match event::verify_and_parse(body, signature_header, &self.webhook_secret, now) {
                Ok(verified) => verified,
                Err(err) => {
                    tracing::warn!(error = %err, "webhook verification failed");
                    self.ledger_error(
                        ErrorContext::Verification,
                        &err.to_string(),
                        String::from_utf8_lossy(body).into_owned(),
                    );
                    return Err(err);
                }
            };

        tracing::info!(event_id = %verified.id, event_kind = %verified.kind, "verified provider event");

        match self
            .ledger
            .record_event(EventRecord::new(&verified.id, &verified.kind, body))
        {
            Ok(LedgerAppend::Inserted) => {}
            Ok(LedgerAppend::Duplicate) => {
                tracing::info!(event_id = %verified.id, "duplicate delivery, already processed");
                return Ok(());
            }
            // Non-fatal: losing the audit row is better than losing the event
            Err(err) => {
                self.ledger_error(
                    ErrorContext::Logging,
                    &err.to_string(),
                    String::from_utf8_lossy(body).into_owned(),
                );
            }
        }

        self.dispatch(verified, body).await;
        Ok(())
    }

    async fn dispatch(&self, verified: VerifiedEvent, body: &[u8]) {
        match verified.event {
            ProviderEvent::CheckoutCompleted {
                session_id,
                customer_ref,
                first_name,
                last_name,
                plan,
            } => {
                if let Err(err) = self
                    .handle_checkout_completed(&session_id, customer_ref, first_name, last_name, &plan)
                    .await
                {
                    tracing::error!(error = %err, session_id = %session_id, "checkout completion failed");
                    self.ledger_error(
                        ErrorContext::Checkout,
                        &err.to_string(),
                        String::from_utf8_lossy(body).into_owned(),
                    );
                }
            }

            ProviderEvent::SubscriptionUpdated {
                customer_ref,
                status,
            } => {
                if let Err(err) = self.handle_status_change(customer_ref, status, None) {
                    tracing::error!(error = %err, "subscription update failed");
                    self.ledger_error(
                        ErrorContext::StatusSync,
                        &err.to_string(),
                        String::from_utf8_lossy(body).into_owned(),
                    );
                }
            }

            ProviderEvent::SubscriptionDeleted {
                customer_ref,
                status,
            } => {
                if let Err(err) =
                    self.handle_status_change(customer_ref, status, Some(SubscriptionStatus::Canceled))
                {
                    tracing::error!(error = %err, "subscription deletion failed");
                    self.ledger_error(
                        ErrorContext::StatusSync,
                        &err.to_string(),
                        String::from_utf8_lossy(body).into_owned(),
                    );
                }
            }

            ProviderEvent::Ignored { kind } => {
                tracing::debug!(event_kind = %kind, "unhandled webhook event");
            }
        }
    }

    async fn handle_checkout_completed(
        &self,
        session_id: &str,
        customer_ref: Option<String>,
        first_name: String,
        last_name: String,
        plan: &str,
    ) -> Result<()> {
        let customer_ref = customer_ref
            .ok_or_else(|| BillingError::Upstream("completed session has no customer".into()))?;

        // The billing email is authoritative; metadata only carries what
        // the registrant typed before paying.
        let customer = self.gateway.retrieve_customer(&customer_ref).await?;
        let email = customer
            .email
            .ok_or_else(|| BillingError::Upstream("customer record has no email".into()))?;

        let user = self.synchronizer.activate(&SubscriptionActivation {
            email,
            customer_ref,
            plan: plan.to_string(),
            first_name,
            last_name,
        })?;

        if !self.store.complete_session(session_id)? {
            // Initiator insert may have failed; the user is provisioned anyway.
            tracing::warn!(session_id = %session_id, "no local session row to complete");
        }

        let token = self.signer.issue(&user)?;
        self.notifier.subscription_activated(&user, plan, &token).await;
        Ok(())
    }

    fn handle_status_change(
        &self,
        customer_ref: Option<String>,
        status: Option<SubscriptionStatus>,
        fallback: Option<SubscriptionStatus>,
    ) -> Result<()> {
        let customer_ref = customer_ref
            .ok_or_else(|| BillingError::Upstream("subscription event has no customer".into()))?;
        let status = status
            .or(fallback)
            .ok_or_else(|| BillingError::Upstream("subscription event has no status".into()))?;

        self.synchronizer.set_status(&customer_ref, &status)
    }

    fn ledger_error(&self, context: ErrorContext, message: &str, payload: String) {
        if let Err(err) = self
            .ledger
            .record_error(ErrorRecord::new(context, message, payload))
        {
            tracing::error!(error = %err, context = %context, "failed to ledger webhook error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{MemoryAccountStore, SessionStatus};
    use crate::event::testutil::signature_header;
    use crate::gateway::MockGateway;
    use crate::ledger::MemoryLedger;
    use crate::notify::{MockMailer, Mailer};

    const SECRET: &str = "whsec_test_secret";

    struct Harness {
        store: Arc<MemoryAccountStore>,
        ledger: Arc<MemoryLedger>,
        gateway: Arc<MockGateway>,
        mailer: Arc<MockMailer>,
        processor: WebhookProcessor,
    }

    fn harness_with_mailer(mailer: MockMailer) -> Harness {
        let store = Arc::new(MemoryAccountStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let gateway = Arc::new(MockGateway::new());
        let mailer = Arc::new(mailer);
        let notifier = NotificationDispatcher::new(
            Some(mailer.clone() as Arc<dyn Mailer>),
            ledger.clone(),
            None,
            "https://skillforge.app/dashboard",
        )
        .unwrap();
        let processor = WebhookProcessor::new(
            store.clone(),
            ledger.clone(),
            gateway.clone(),
            notifier,
            CredentialSigner::new("test-secret"),
            SECRET,
        );
        Harness {
            store,
            ledger,
            gateway,
            mailer,
            processor,
        }
    }

    fn harness() -> Harness {
        harness_with_mailer(MockMailer::new())
    }

    fn completed_event(event_id: &str, session_id: &str, customer_ref: &str) -> Vec<u8> {
        serde_json::json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": session_id,
                    "customer": customer_ref,
                    "metadata": {
                        "firstName": "Jane",
                        "lastName": "Doe",
                        "productId": "price_pro"
                    }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    fn status_event(event_id: &str, kind: &str, customer_ref: &str, status: &str) -> Vec<u8> {
        serde_json::json!({
            "id": event_id,
            "type": kind,
            "data": {"object": {"customer": customer_ref, "status": status}}
        })
        .to_string()
        .into_bytes()
    }

    fn signed(payload: &[u8]) -> String {
        signature_header(payload, SECRET, chrono::Utc::now().timestamp())
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_and_ledgered() {
        let h = harness();
        let payload = completed_event("evt_1", "cs_test_1", "cus_1");
        let header = signature_header(&payload, "whsec_wrong", chrono::Utc::now().timestamp());

        let err = h.processor.process(&payload, &header).await.unwrap_err();
        assert!(matches!(err, BillingError::Signature(_)));

        let errors = h.ledger.errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context, ErrorContext::Verification);
        assert!(errors[0].payload.contains("cs_test_1"));

        // Never reached the synchronizer or the ledger's event table
        assert!(h.ledger.events().unwrap().is_empty());
        assert!(h.store.find_user_by_customer("cus_1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_event_provisions_user_and_session() {
        let h = harness();
        h.gateway.insert_customer("cus_1", Some("new@x.com"));
        h.store
            .insert_session(crate::account::CheckoutSession::created(
                "cs_test_1",
                "new@x.com",
                "price_pro",
                "Jane",
                "Doe",
            ))
            .unwrap();

        let payload = completed_event("evt_1", "cs_test_1", "cus_1");
        h.processor.process(&payload, &signed(&payload)).await.unwrap();

        let user = h.store.find_user_by_email("new@x.com").unwrap().unwrap();
        assert_eq!(user.status, SubscriptionStatus::Active);
        assert_eq!(user.customer_ref.as_deref(), Some("cus_1"));
        assert_eq!(user.plan.as_deref(), Some("price_pro"));

        let session = h.store.find_session("cs_test_1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        assert_eq!(h.ledger.events().unwrap().len(), 1);
        assert_eq!(h.mailer.sent().len(), 1);
        assert!(h.ledger.errors().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identical_replay_is_idempotent() {
        let h = harness();
        h.gateway.insert_customer("cus_1", Some("new@x.com"));

        let payload = completed_event("evt_1", "cs_test_1", "cus_1");
        for _ in 0..3 {
            h.processor.process(&payload, &signed(&payload)).await.unwrap();
        }

        let user = h.store.find_user_by_email("new@x.com").unwrap().unwrap();
        assert_eq!(user.status, SubscriptionStatus::Active);
        // One ledger row, one email: replays short-circuit at the dedup key
        assert_eq!(h.ledger.events().unwrap().len(), 1);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_under_new_event_id_still_converges() {
        let h = harness();
        h.gateway.insert_customer("cus_1", Some("new@x.com"));

        let first = completed_event("evt_1", "cs_test_1", "cus_1");
        h.processor.process(&first, &signed(&first)).await.unwrap();
        let second = completed_event("evt_2", "cs_test_1", "cus_1");
        h.processor.process(&second, &signed(&second)).await.unwrap();

        let user = h.store.find_user_by_email("new@x.com").unwrap().unwrap();
        assert_eq!(user.customer_ref.as_deref(), Some("cus_1"));
        assert_eq!(h.ledger.events().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_update_applied_verbatim() {
        let h = harness();
        h.gateway.insert_customer("cus_1", Some("jane@x.com"));
        let completed = completed_event("evt_1", "cs_test_1", "cus_1");
        h.processor.process(&completed, &signed(&completed)).await.unwrap();

        let updated = status_event("evt_2", "customer.subscription.updated", "cus_1", "past_due");
        h.processor.process(&updated, &signed(&updated)).await.unwrap();

        let user = h.store.find_user_by_customer("cus_1").unwrap().unwrap();
        assert_eq!(user.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn test_deletion_without_status_falls_back_to_canceled() {
        let h = harness();
        h.gateway.insert_customer("cus_1", Some("jane@x.com"));
        let completed = completed_event("evt_1", "cs_test_1", "cus_1");
        h.processor.process(&completed, &signed(&completed)).await.unwrap();

        let deleted = serde_json::json!({
            "id": "evt_2",
            "type": "customer.subscription.deleted",
            "data": {"object": {"customer": "cus_1"}}
        })
        .to_string()
        .into_bytes();
        h.processor.process(&deleted, &signed(&deleted)).await.unwrap();

        let user = h.store.find_user_by_customer("cus_1").unwrap().unwrap();
        assert_eq!(user.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_status_for_unknown_customer_acknowledged_quietly() {
        let h = harness();
        let updated = status_event("evt_1", "customer.subscription.updated", "cus_ghost", "past_due");
        h.processor.process(&updated, &signed(&updated)).await.unwrap();

        assert_eq!(h.ledger.events().unwrap().len(), 1);
        assert!(h.ledger.errors().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_customer_lookup_failure_is_swallowed_and_ledgered() {
        let h = harness();
        // No customer seeded in the mock: the gateway lookup fails
        let payload = completed_event("evt_1", "cs_test_1", "cus_unknown");
        h.processor.process(&payload, &signed(&payload)).await.unwrap();

        let errors = h.ledger.errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context, ErrorContext::Checkout);
    }

    #[tokio::test]
    async fn test_mail_failure_never_rolls_back_activation() {
        let h = harness_with_mailer(MockMailer::failing());
        h.gateway.insert_customer("cus_1", Some("new@x.com"));

        let payload = completed_event("evt_1", "cs_test_1", "cus_1");
        h.processor.process(&payload, &signed(&payload)).await.unwrap();

        // Activation committed despite the mail failure
        let user = h.store.find_user_by_email("new@x.com").unwrap().unwrap();
        assert_eq!(user.status, SubscriptionStatus::Active);

        let errors = h.ledger.errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context, ErrorContext::EmailSendFail);
    }

    #[tokio::test]
    async fn test_unhandled_kind_is_ledger_only() {
        let h = harness();
        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "invoice.finalized",
            "data": {"object": {}}
        })
        .to_string()
        .into_bytes();

        h.processor.process(&payload, &signed(&payload)).await.unwrap();

        assert_eq!(h.ledger.events().unwrap().len(), 1);
        assert!(h.ledger.errors().unwrap().is_empty());
        assert_eq!(h.mailer.sent().len(), 0);
    }
}
