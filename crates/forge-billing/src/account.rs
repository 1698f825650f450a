//! User Accounts and Checkout Sessions
//!
//! Domain records owned by the billing core, the storage seam, and an
//! in-memory reference implementation. Other subsystems only ever read
//! `User` rows; every write to subscription fields goes through here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{BillingError, Result};

/// Subscription status, stored verbatim from the provider's vocabulary.
///
/// The provider is the authority on legal transitions; unrecognized
/// values are preserved as-is rather than rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    /// No subscription yet (user has never completed payment)
    None,
    /// Any other provider-reported status, kept verbatim
    Other(String),
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Other(s) => s,
        }
    }

    pub fn from_provider(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "unpaid" => SubscriptionStatus::Unpaid,
            "" | "none" => SubscriptionStatus::None,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for SubscriptionStatus {
    fn from(s: String) -> Self {
        SubscriptionStatus::from_provider(&s)
    }
}

impl From<SubscriptionStatus> for String {
    fn from(status: SubscriptionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: String,

    pub first_name: String,
    pub last_name: String,

    /// Unique (case-insensitive) email address
    pub email: String,

    /// Password hash, present only for direct-registration accounts
    pub password_hash: Option<String>,

    /// Provider customer reference, None until first successful payment
    pub customer_ref: Option<String>,

    /// Subscription plan identifier (provider price id)
    pub plan: Option<String>,

    pub status: SubscriptionStatus,

    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a user with no subscription state
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            password_hash: None,
            customer_ref: None,
            plan: None,
            status: SubscriptionStatus::None,
            created_at: Utc::now(),
        }
    }

    /// Display name shown to clients
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Local checkout session status.
///
/// Only the `created -> completed` transition is modeled; everything else
/// lives on the provider's side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Completed => "completed",
        }
    }
}

/// Local shadow of a provider checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider session id (primary key)
    pub session_id: String,
    pub email: String,
    /// Plan identifier captured at session creation
    pub plan: String,
    pub first_name: String,
    pub last_name: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn created(
        session_id: impl Into<String>,
        email: impl Into<String>,
        plan: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            email: email.into(),
            plan: plan.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            status: SessionStatus::Created,
            created_at: Utc::now(),
        }
    }
}

/// Facts applied by a completed checkout
#[derive(Clone, Debug)]
pub struct SubscriptionActivation {
    pub email: String,
    pub customer_ref: String,
    pub plan: String,
    pub first_name: String,
    pub last_name: String,
}

/// Account storage seam.
///
/// Every mutating operation is a single atomic call; implementations must
/// serialize mutations touching the same user key (row locks, conditional
/// updates, or a coarser lock) so that concurrent webhook deliveries for
/// one customer cannot lose updates.
pub trait AccountStore: Send + Sync {
    /// Insert a new user; fails with `Conflict` when the email is taken.
    ///
    /// Email uniqueness is enforced here, at the storage layer, so the
    /// initiator's earlier duplicate check is only an optimization.
    fn insert_user(&self, user: User) -> Result<User>;

    /// Case-insensitive lookup by email
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Lookup by provider customer reference
    fn find_user_by_customer(&self, customer_ref: &str) -> Result<Option<User>>;

    /// Insert-or-update by email with the facts from a completed checkout.
    ///
    /// A missing user is created with status `active`. An existing user
    /// gets its customer reference and plan set; its status is preserved
    /// unless still `none`. Safe to invoke any number of times for the
    /// same checkout.
    fn activate_subscription(&self, activation: &SubscriptionActivation) -> Result<User>;

    /// Update the status of the user matching `customer_ref`.
    ///
    /// Returns `Ok(false)` when no user matches — an out-of-order status
    /// event may legitimately arrive before the activating event.
    fn set_subscription_status(
        &self,
        customer_ref: &str,
        status: &SubscriptionStatus,
    ) -> Result<bool>;

    /// Persist a newly created checkout session shadow row
    fn insert_session(&self, session: CheckoutSession) -> Result<()>;

    /// Mark a session completed; returns `Ok(false)` when no row exists
    fn complete_session(&self, session_id: &str) -> Result<bool>;

    fn find_session(&self, session_id: &str) -> Result<Option<CheckoutSession>>;
}

/// In-memory account store (for development and tests).
///
/// Mutations lock the user table for their full duration, which subsumes
/// the per-key serialization the trait requires.
pub struct MemoryAccountStore {
    users: RwLock<HashMap<String, User>>,
    by_customer: RwLock<HashMap<String, String>>,
    sessions: RwLock<HashMap<String, CheckoutSession>>,
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            by_customer: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn users_read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, User>>> {
        self.users
            .read()
            .map_err(|_| BillingError::Persistence("user table lock poisoned".into()))
    }

    fn users_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, User>>> {
        self.users
            .write()
            .map_err(|_| BillingError::Persistence("user table lock poisoned".into()))
    }

    fn index_read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, String>>> {
        self.by_customer
            .read()
            .map_err(|_| BillingError::Persistence("customer index lock poisoned".into()))
    }

    fn index_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, String>>> {
        self.by_customer
            .write()
            .map_err(|_| BillingError::Persistence("customer index lock poisoned".into()))
    }

    fn sessions_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, CheckoutSession>>> {
        self.sessions
            .write()
            .map_err(|_| BillingError::Persistence("session table lock poisoned".into()))
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl AccountStore for MemoryAccountStore {
    fn insert_user(&self, user: User) -> Result<User> {
        // Lock order everywhere: users, then customer index
        let mut users = self.users_write()?;
        let mut index = self.index_write()?;

        let key = email_key(&user.email);
        if users.contains_key(&key) {
            return Err(BillingError::Conflict(user.email));
        }

        if let Some(customer_ref) = &user.customer_ref {
            index.insert(customer_ref.clone(), key.clone());
        }
        users.insert(key, user.clone());
        Ok(user)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users_read()?;
        Ok(users.get(&email_key(email)).cloned())
    }

    fn find_user_by_customer(&self, customer_ref: &str) -> Result<Option<User>> {
        let users = self.users_read()?;
        let index = self.index_read()?;
        Ok(index.get(customer_ref).and_then(|key| users.get(key)).cloned())
    }

    fn activate_subscription(&self, activation: &SubscriptionActivation) -> Result<User> {
        let mut users = self.users_write()?;
        let mut index = self.index_write()?;

        let key = email_key(&activation.email);
        let user = match users.get_mut(&key) {
            Some(existing) => {
                existing.customer_ref = Some(activation.customer_ref.clone());
                existing.plan = Some(activation.plan.clone());
                if existing.status == SubscriptionStatus::None {
                    existing.status = SubscriptionStatus::Active;
                }
                existing.clone()
            }
            None => {
                let mut user = User::new(
                    activation.first_name.clone(),
                    activation.last_name.clone(),
                    activation.email.clone(),
                );
                user.customer_ref = Some(activation.customer_ref.clone());
                user.plan = Some(activation.plan.clone());
                user.status = SubscriptionStatus::Active;
                users.insert(key.clone(), user.clone());
                user
            }
        };

        index.insert(activation.customer_ref.clone(), key);
        Ok(user)
    }

    fn set_subscription_status(
        &self,
        customer_ref: &str,
        status: &SubscriptionStatus,
    ) -> Result<bool> {
        let mut users = self.users_write()?;
        let index = self.index_read()?;

        let Some(key) = index.get(customer_ref) else {
            return Ok(false);
        };
        match users.get_mut(key) {
            Some(user) => {
                user.status = status.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_session(&self, session: CheckoutSession) -> Result<()> {
        let mut sessions = self.sessions_write()?;
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    fn complete_session(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions_write()?;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.status = SessionStatus::Completed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_session(&self, session_id: &str) -> Result<Option<CheckoutSession>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| BillingError::Persistence("session table lock poisoned".into()))?;
        Ok(sessions.get(session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation(email: &str) -> SubscriptionActivation {
        SubscriptionActivation {
            email: email.into(),
            customer_ref: "cus_123".into(),
            plan: "price_pro".into(),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
        }
    }

    #[test]
    fn test_insert_user_rejects_duplicate_email_case_insensitive() {
        let store = MemoryAccountStore::new();
        store
            .insert_user(User::new("Jane", "Doe", "jane@example.com"))
            .unwrap();

        let err = store
            .insert_user(User::new("Janet", "Doe", "JANE@Example.COM"))
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));
    }

    #[test]
    fn test_activate_creates_user_with_active_status() {
        let store = MemoryAccountStore::new();
        let user = store.activate_subscription(&activation("new@x.com")).unwrap();

        assert_eq!(user.status, SubscriptionStatus::Active);
        assert_eq!(user.customer_ref.as_deref(), Some("cus_123"));
        assert_eq!(user.plan.as_deref(), Some("price_pro"));
        assert!(user.password_hash.is_none());
    }

    #[test]
    fn test_activate_is_idempotent() {
        let store = MemoryAccountStore::new();
        let first = store.activate_subscription(&activation("new@x.com")).unwrap();
        let second = store.activate_subscription(&activation("new@x.com")).unwrap();

        assert_eq!(first.id, second.id);
        let found = store.find_user_by_email("new@x.com").unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn test_activate_preserves_provider_reported_status() {
        let store = MemoryAccountStore::new();
        store.activate_subscription(&activation("jane@x.com")).unwrap();
        store
            .set_subscription_status("cus_123", &SubscriptionStatus::PastDue)
            .unwrap();

        // A replayed completion must not regress the later status
        let replayed = store.activate_subscription(&activation("jane@x.com")).unwrap();
        assert_eq!(replayed.status, SubscriptionStatus::PastDue);
        assert_eq!(replayed.customer_ref.as_deref(), Some("cus_123"));
    }

    #[test]
    fn test_set_status_unknown_customer_is_noop() {
        let store = MemoryAccountStore::new();
        let applied = store
            .set_subscription_status("cus_missing", &SubscriptionStatus::Canceled)
            .unwrap();
        assert!(!applied);
    }

    #[test]
    fn test_set_status_by_customer_ref() {
        let store = MemoryAccountStore::new();
        store.activate_subscription(&activation("jane@x.com")).unwrap();

        let applied = store
            .set_subscription_status("cus_123", &SubscriptionStatus::Canceled)
            .unwrap();
        assert!(applied);

        let user = store.find_user_by_customer("cus_123").unwrap().unwrap();
        assert_eq!(user.status, SubscriptionStatus::Canceled);
    }

    #[test]
    fn test_complete_session() {
        let store = MemoryAccountStore::new();
        store
            .insert_session(CheckoutSession::created(
                "cs_test_1",
                "jane@x.com",
                "price_pro",
                "Jane",
                "Doe",
            ))
            .unwrap();

        assert!(store.complete_session("cs_test_1").unwrap());
        assert!(!store.complete_session("cs_test_missing").unwrap());

        let session = store.find_session("cs_test_1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn test_subscription_status_round_trip() {
        assert_eq!(
            SubscriptionStatus::from_provider("past_due"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(SubscriptionStatus::PastDue.as_str(), "past_due");

        let odd = SubscriptionStatus::from_provider("incomplete_expired");
        assert_eq!(odd.as_str(), "incomplete_expired");
    }
}
