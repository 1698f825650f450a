//! Event and Error Ledger
//!
//! Durable append-only record of every verified provider event and every
//! processing error. The ledger is never consulted for transactional
//! decisions beyond duplicate detection; it exists for audit and replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;

use crate::error::{BillingError, Result};

/// Outcome of an event append
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerAppend {
    Inserted,
    /// An event with the same provider id was already recorded
    Duplicate,
}

/// A verified inbound provider event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    /// Provider event id, the ledger's idempotency key
    pub event_id: String,
    pub kind: String,
    /// Full raw payload as delivered
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(event_id: impl Into<String>, kind: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            event_id: event_id.into(),
            kind: kind.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            received_at: Utc::now(),
        }
    }
}

/// Where in the pipeline an error was caught
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorContext {
    Verification,
    Logging,
    Checkout,
    StatusSync,
    EmailSendFail,
    AlertFail,
}

impl ErrorContext {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorContext::Verification => "Verification",
            ErrorContext::Logging => "Logging",
            ErrorContext::Checkout => "Checkout",
            ErrorContext::StatusSync => "StatusSync",
            ErrorContext::EmailSendFail => "EmailSendFail",
            ErrorContext::AlertFail => "AlertFail",
        }
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A processing failure preserved for forensic replay
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub context: ErrorContext,
    pub message: String,
    /// Raw payload snapshot at the point of failure
    pub payload: String,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(context: ErrorContext, message: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            context,
            message: message.into(),
            payload: payload.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Ledger storage seam
pub trait EventLedger: Send + Sync {
    /// Append a verified event, deduplicating on provider event id
    fn record_event(&self, record: EventRecord) -> Result<LedgerAppend>;

    /// Append a processing error
    fn record_error(&self, record: ErrorRecord) -> Result<()>;

    /// All recorded events, oldest first (replay tooling and tests)
    fn events(&self) -> Result<Vec<EventRecord>>;

    /// All recorded errors, oldest first
    fn errors(&self) -> Result<Vec<ErrorRecord>>;
}

/// In-memory ledger (for development and tests)
pub struct MemoryLedger {
    events: RwLock<Vec<EventRecord>>,
    seen: RwLock<HashSet<String>>,
    errors: RwLock<Vec<ErrorRecord>>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            seen: RwLock::new(HashSet::new()),
            errors: RwLock::new(Vec::new()),
        }
    }
}

impl EventLedger for MemoryLedger {
    fn record_event(&self, record: EventRecord) -> Result<LedgerAppend> {
        let mut seen = self
            .seen
            .write()
            .map_err(|_| BillingError::Persistence("event ledger lock poisoned".into()))?;
        if !seen.insert(record.event_id.clone()) {
            return Ok(LedgerAppend::Duplicate);
        }
        let mut events = self
            .events
            .write()
            .map_err(|_| BillingError::Persistence("event ledger lock poisoned".into()))?;
        events.push(record);
        Ok(LedgerAppend::Inserted)
    }

    fn record_error(&self, record: ErrorRecord) -> Result<()> {
        let mut errors = self
            .errors
            .write()
            .map_err(|_| BillingError::Persistence("error ledger lock poisoned".into()))?;
        errors.push(record);
        Ok(())
    }

    fn events(&self) -> Result<Vec<EventRecord>> {
        let events = self
            .events
            .read()
            .map_err(|_| BillingError::Persistence("event ledger lock poisoned".into()))?;
        Ok(events.clone())
    }

    fn errors(&self) -> Result<Vec<ErrorRecord>> {
        let errors = self
            .errors
            .read()
            .map_err(|_| BillingError::Persistence("error ledger lock poisoned".into()))?;
        Ok(errors.clone())
    }
}
