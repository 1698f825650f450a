//! Provider Webhook Events
//!
//! Cryptographic verification of inbound callbacks and the closed set of
//! event kinds the core acts on. Everything downstream of this module
//! works with `ProviderEvent`, never with raw payload fields.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

use crate::account::SubscriptionStatus;
use crate::error::{BillingError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted skew between the signature timestamp and now
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Event kinds this core handles, plus a catch-all for the rest
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Payment collected; provision the subscription
    CheckoutCompleted {
        session_id: String,
        customer_ref: Option<String>,
        first_name: String,
        last_name: String,
        plan: String,
    },

    /// Provider reported a subscription status change
    SubscriptionUpdated {
        customer_ref: Option<String>,
        status: Option<SubscriptionStatus>,
    },

    /// Subscription ended on the provider's side
    SubscriptionDeleted {
        customer_ref: Option<String>,
        status: Option<SubscriptionStatus>,
    },

    /// Ledger-only; no further action
    Ignored { kind: String },
}

/// A signature-verified event ready for dispatch
#[derive(Clone, Debug)]
pub struct VerifiedEvent {
    /// Provider event id, used as the ledger idempotency key
    pub id: String,
    pub kind: String,
    pub event: ProviderEvent,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutObject {
    id: String,
    customer: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    customer: Option<String>,
    status: Option<String>,
}

/// Verify the signature header against the raw body and parse the event.
///
/// Any failure here — malformed header, stale timestamp, signature
/// mismatch, unparseable payload — is a `Signature` error: the one class
/// of error that blocks acknowledgment of a delivery.
pub fn verify_and_parse(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
) -> Result<VerifiedEvent> {
    verify_signature(payload, signature_header, secret, now)?;

    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|err| BillingError::Signature(format!("unparseable event payload: {err}")))?;

    let event = parse_event(&raw)?;
    Ok(VerifiedEvent {
        id: raw.id,
        kind: raw.kind,
        event,
    })
}

/// Check the `t=<ts>,v1=<hex>` header: HMAC-SHA256 over `"{t}.{body}"`
/// with the shared secret, constant-time compared, timestamp within the
/// tolerance window.
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
) -> Result<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in signature_header.split(',') {
        let mut iter = part.trim().splitn(2, '=');
        let key = iter.next().unwrap_or("");
        let value = iter.next().unwrap_or("");
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return Err(BillingError::Signature("missing signature timestamp".into()));
    };
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BillingError::Signature(
            "signature timestamp outside tolerance window".into(),
        ));
    }
    if signatures.is_empty() {
        return Err(BillingError::Signature("missing v1 signature".into()));
    }

    let signed_payload = format!("{timestamp}.{}", String::from_utf8_lossy(payload));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| BillingError::Signature(err.to_string()))?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let matched = signatures
        .iter()
        .any(|sig| expected.as_bytes().ct_eq(sig.as_bytes()).into());
    if matched {
        Ok(())
    } else {
        Err(BillingError::Signature("signature mismatch".into()))
    }
}

fn parse_event(raw: &RawEvent) -> Result<ProviderEvent> {
    match raw.kind.as_str() {
        "checkout.session.completed" => {
            let object: CheckoutObject = serde_json::from_value(raw.data.object.clone())
                .map_err(|err| {
                    BillingError::Signature(format!("malformed checkout session object: {err}"))
                })?;

            // Metadata was written by the initiator; tolerate its absence
            // so provider-dashboard test events still land in the ledger.
            let meta = |key: &str, fallback: &str| {
                object
                    .metadata
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| fallback.to_string())
            };

            Ok(ProviderEvent::CheckoutCompleted {
                session_id: object.id,
                customer_ref: object.customer,
                first_name: meta("firstName", "Unknown"),
                last_name: meta("lastName", "Unknown"),
                plan: meta("productId", "unknown"),
            })
        }

        "customer.subscription.updated" => {
            let object: SubscriptionObject = serde_json::from_value(raw.data.object.clone())
                .map_err(|err| {
                    BillingError::Signature(format!("malformed subscription object: {err}"))
                })?;
            Ok(ProviderEvent::SubscriptionUpdated {
                customer_ref: object.customer,
                status: object.status.as_deref().map(SubscriptionStatus::from_provider),
            })
        }

        "customer.subscription.deleted" => {
            let object: SubscriptionObject = serde_json::from_value(raw.data.object.clone())
                .map_err(|err| {
                    BillingError::Signature(format!("malformed subscription object: {err}"))
                })?;
            Ok(ProviderEvent::SubscriptionDeleted {
                customer_ref: object.customer,
                status: object.status.as_deref().map(SubscriptionStatus::from_provider),
            })
        }

        other => Ok(ProviderEvent::Ignored {
            kind: other.to_string(),
        }),
    }
}
