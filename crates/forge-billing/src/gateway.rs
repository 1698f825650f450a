//! Billing Provider Gateway
//!
//! Abstraction over the hosted-checkout provider, with the Stripe
//! implementation and a canned mock for tests and provider-less runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{BillingError, Result};

/// Request to open a hosted checkout session
#[derive(Clone, Debug)]
pub struct SessionRequest {
    pub email: String,
    /// Provider price id for the selected plan
    pub plan: String,
    pub first_name: String,
    pub last_name: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A provider-hosted session the client gets redirected to
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostedSession {
    pub id: String,
    pub url: String,
}

/// Session state as reported by the provider
#[derive(Clone, Debug)]
pub struct SessionDetails {
    pub id: String,
    pub customer_ref: Option<String>,
}

/// Customer record as reported by the provider
#[derive(Clone, Debug)]
pub struct CustomerDetails {
    pub id: String,
    pub email: Option<String>,
}

/// An active priced offering
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Offering {
    /// Provider price id — the plan identifier used everywhere locally
    pub id: String,
    pub product: String,
    pub description: Option<String>,
    /// Unit amount in the currency's minor unit
    pub unit_amount: i64,
    pub currency: String,
    /// Billing interval, None for one-off prices
    pub recurring: Option<String>,
}

/// Provider seam (Strategy pattern)
///
/// One implementation per payment provider; the rest of the core never
/// touches provider SDK types.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Open a hosted checkout session in subscription mode, embedding the
    /// registrant fields as metadata so the async callback is
    /// self-describing.
    async fn create_checkout_session(&self, request: &SessionRequest) -> Result<HostedSession>;

    /// Look up a checkout session by id
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails>;

    /// Look up a customer by reference
    async fn retrieve_customer(&self, customer_ref: &str) -> Result<CustomerDetails>;

    /// Currently active priced offerings
    async fn list_active_offerings(&self) -> Result<Vec<Offering>>;
}

/// Stripe-backed gateway
pub struct StripeGateway {
    client: stripe::Client,
}

impl StripeGateway {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
        }
    }
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_checkout_session(&self, request: &SessionRequest) -> Result<HostedSession> {
        let mut metadata = HashMap::new();
        metadata.insert("firstName".to_string(), request.first_name.clone());
        metadata.insert("lastName".to_string(), request.last_name.clone());
        metadata.insert("email".to_string(), request.email.clone());
        metadata.insert("productId".to_string(), request.plan.clone());

        let mut params = stripe::CreateCheckoutSession::new();
        params.customer_email = Some(&request.email);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.mode = Some(stripe::CheckoutSessionMode::Subscription);
        params.metadata = Some(metadata);
        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            price: Some(request.plan.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = stripe::CheckoutSession::create(&self.client, params)
            .await
            .map_err(|err| BillingError::Upstream(err.to_string()))?;

        let url = session
            .url
            .ok_or_else(|| BillingError::Upstream("no checkout URL returned".into()))?;

        Ok(HostedSession {
            id: session.id.to_string(),
            url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails> {
        let id = session_id
            .parse::<stripe::CheckoutSessionId>()
            .map_err(|err| BillingError::InvalidIdentifier(err.to_string()))?;

        let session = stripe::CheckoutSession::retrieve(&self.client, &id, &[])
            .await
            .map_err(|err| BillingError::Upstream(err.to_string()))?;

        Ok(SessionDetails {
            id: session.id.to_string(),
            customer_ref: session.customer.as_ref().map(|c| c.id().to_string()),
        })
    }

    async fn retrieve_customer(&self, customer_ref: &str) -> Result<CustomerDetails> {
        let id = customer_ref
            .parse::<stripe::CustomerId>()
            .map_err(|err| BillingError::Upstream(format!("bad customer reference: {err}")))?;

        let customer = stripe::Customer::retrieve(&self.client, &id, &[])
            .await
            .map_err(|err| BillingError::Upstream(err.to_string()))?;

        Ok(CustomerDetails {
            id: customer.id.to_string(),
            email: customer.email.clone(),
        })
    }

    async fn list_active_offerings(&self) -> Result<Vec<Offering>> {
        let mut params = stripe::ListPrices::default();
        params.active = Some(true);
        params.expand = &["data.product"];

        let prices = stripe::Price::list(&self.client, &params)
            .await
            .map_err(|err| BillingError::Upstream(err.to_string()))?;

        let offerings = prices
            .data
            .into_iter()
            .map(|price| {
                let (product, description) = match price.product.as_ref() {
                    Some(stripe::Expandable::Object(product)) => (
                        product.name.clone().unwrap_or_default(),
                        product.description.clone(),
                    ),
                    _ => (String::new(), None),
                };
                Offering {
                    id: price.id.to_string(),
                    product,
                    description,
                    unit_amount: price.unit_amount.unwrap_or(0),
                    currency: price
                        .currency
                        .map(|c| c.to_string().to_uppercase())
                        .unwrap_or_default(),
                    recurring: price.recurring.as_ref().map(|r| r.interval.to_string()),
                }
            })
            .collect();

        Ok(offerings)
    }
}

/// Canned gateway for tests and provider-less development.
///
/// Counts outbound calls so tests can assert that shape-invalid
/// identifiers never reach the provider.
pub struct MockGateway {
    sessions: Mutex<HashMap<String, SessionDetails>>,
    customers: Mutex<HashMap<String, CustomerDetails>>,
    offerings: Mutex<Vec<Offering>>,
    calls: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            customers: Mutex::new(HashMap::new()),
            offerings: Mutex::new(vec![
                Offering {
                    id: "price_basic".into(),
                    product: "SkillForge Basic".into(),
                    description: Some("Skill logging for individual students".into()),
                    unit_amount: 1900,
                    currency: "USD".into(),
                    recurring: Some("month".into()),
                },
                Offering {
                    id: "price_pro".into(),
                    product: "SkillForge Pro".into(),
                    description: Some("Full program tracking with instructor review".into()),
                    unit_amount: 2900,
                    currency: "USD".into(),
                    recurring: Some("month".into()),
                },
            ]),
            calls: AtomicUsize::new(0),
        }
    }

    /// Seed a session the provider would report
    pub fn insert_session(&self, session_id: &str, customer_ref: Option<&str>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(
                session_id.to_string(),
                SessionDetails {
                    id: session_id.to_string(),
                    customer_ref: customer_ref.map(String::from),
                },
            );
        }
    }

    /// Seed a customer the provider would report
    pub fn insert_customer(&self, customer_ref: &str, email: Option<&str>) {
        if let Ok(mut customers) = self.customers.lock() {
            customers.insert(
                customer_ref.to_string(),
                CustomerDetails {
                    id: customer_ref.to_string(),
                    email: email.map(String::from),
                },
            );
        }
    }

    pub fn set_offerings(&self, offerings: Vec<Offering>) {
        if let Ok(mut current) = self.offerings.lock() {
            *current = offerings;
        }
    }

    /// Number of provider calls made so far
    pub fn outbound_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn locked<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
        mutex
            .lock()
            .map_err(|_| BillingError::Persistence("mock gateway lock poisoned".into()))
    }
}

#[async_trait]
impl BillingGateway for MockGateway {
    async fn create_checkout_session(&self, request: &SessionRequest) -> Result<HostedSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let id = format!("cs_test_{}", uuid::Uuid::new_v4().simple());
        let mut sessions = Self::locked(&self.sessions)?;
        sessions.insert(
            id.clone(),
            SessionDetails {
                id: id.clone(),
                customer_ref: None,
            },
        );

        Ok(HostedSession {
            url: format!("https://checkout.example/pay/{id}?plan={}", request.plan),
            id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sessions = Self::locked(&self.sessions)?;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| BillingError::Upstream(format!("no such session: {session_id}")))
    }

    async fn retrieve_customer(&self, customer_ref: &str) -> Result<CustomerDetails> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let customers = Self::locked(&self.customers)?;
        customers
            .get(customer_ref)
            .cloned()
            .ok_or_else(|| BillingError::Upstream(format!("no such customer: {customer_ref}")))
    }

    async fn list_active_offerings(&self) -> Result<Vec<Offering>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::locked(&self.offerings)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_round_trip() {
        let gateway = MockGateway::new();

        let session = gateway
            .create_checkout_session(&SessionRequest {
                email: "jane@example.com".into(),
                plan: "price_pro".into(),
                first_name: "Jane".into(),
                last_name: "Doe".into(),
                success_url: "https://skillforge.app/success".into(),
                cancel_url: "https://skillforge.app/register".into(),
            })
            .await
            .unwrap();

        assert!(session.id.starts_with("cs_test_"));
        assert!(session.url.contains(&session.id));

        let details = gateway.retrieve_session(&session.id).await.unwrap();
        assert_eq!(details.id, session.id);
        assert_eq!(gateway.outbound_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_gateway_unknown_customer_is_upstream_error() {
        let gateway = MockGateway::new();
        let err = gateway.retrieve_customer("cus_missing").await.unwrap_err();
        assert!(matches!(err, BillingError::Upstream(_)));
    }
}
