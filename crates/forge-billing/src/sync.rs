//! Subscription State Synchronizer
//!
//! Translates provider-reported facts into local entitlement state.
//! Atomicity lives in the store: both operations map to a single
//! per-key-serialized store call, so at-least-once delivery and
//! concurrent events for one customer converge instead of losing writes.

use std::sync::Arc;

use crate::account::{AccountStore, SubscriptionActivation, SubscriptionStatus, User};
use crate::error::Result;

pub struct Synchronizer {
    store: Arc<dyn AccountStore>,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Apply a completed checkout.
    ///
    /// Creates the user from event metadata when no row exists (the local
    /// session shadow may be missing entirely); otherwise fills the
    /// customer reference and plan without touching a provider-reported
    /// status. Replays are no-ops beyond the first application.
    pub fn activate(&self, activation: &SubscriptionActivation) -> Result<User> {
        let user = self.store.activate_subscription(activation)?;
        tracing::info!(
            email = %user.email,
            customer_ref = ?user.customer_ref,
            plan = ?user.plan,
            "subscription activated"
        );
        Ok(user)
    }

    /// Apply a provider-reported status change.
    ///
    /// A status event may overtake its activating event; an unknown
    /// customer reference is logged and ignored rather than failed.
    pub fn set_status(&self, customer_ref: &str, status: &SubscriptionStatus) -> Result<()> {
        if self.store.set_subscription_status(customer_ref, status)? {
            tracing::info!(customer_ref = %customer_ref, status = %status, "subscription status updated");
        } else {
            tracing::warn!(
                customer_ref = %customer_ref,
                status = %status,
                "status event for unknown customer, ignoring"
            );
        }
        Ok(())
    }
}
