//! Notification Dispatch
//!
//! Best-effort side channels fired after a successful activation: a
//! confirmation email to the registrant and an optional chat-webhook
//! alert. Failures are ledgered per channel and never propagate; the
//! subscription state change they follow is already committed.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::account::User;
use crate::error::{BillingError, Result};
use crate::ledger::{ErrorContext, ErrorRecord, EventLedger};

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

/// An outbound email
#[derive(Clone, Debug)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Mail transport seam
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Transactional-mail HTTP API sender
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .build()
            .map_err(|err| BillingError::Config(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [message.to],
                "subject": message.subject,
                "html": message.html,
            }))
            .send()
            .await
            .map_err(|err| BillingError::Upstream(err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BillingError::Upstream(format!("mail API {status}: {body}")))
        }
    }
}

/// Recording mailer for tests and mail-less development
pub struct MockMailer {
    sent: std::sync::Mutex<Vec<MailMessage>>,
    fail: bool,
}

impl Default for MockMailer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMailer {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A mailer whose every send fails
    pub fn failing() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        if self.fail {
            return Err(BillingError::Upstream("mail transport down".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

/// Fire-and-forget notifications after activation
pub struct NotificationDispatcher {
    mailer: Option<Arc<dyn Mailer>>,
    ledger: Arc<dyn EventLedger>,
    http: reqwest::Client,
    alert_webhook_url: Option<String>,
    dashboard_url: String,
}

impl NotificationDispatcher {
    pub fn new(
        mailer: Option<Arc<dyn Mailer>>,
        ledger: Arc<dyn EventLedger>,
        alert_webhook_url: Option<String>,
        dashboard_url: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .build()
            .map_err(|err| BillingError::Config(err.to_string()))?;
        Ok(Self {
            mailer,
            ledger,
            http,
            alert_webhook_url,
            dashboard_url: dashboard_url.into(),
        })
    }

    /// Notify both channels; each failure is ledgered independently and
    /// neither affects the caller.
    pub async fn subscription_activated(&self, user: &User, plan: &str, token: &str) {
        if let Some(mailer) = &self.mailer {
            let message = MailMessage {
                to: user.email.clone(),
                subject: "Welcome to SkillForge".into(),
                html: format!(
                    "<p>Hello {first},</p>\
                     <p>Your subscription to <strong>{plan}</strong> is active.</p>\
                     <p>Click <a href=\"{dashboard}?token={token}\">here</a> to get started.</p>",
                    first = user.first_name,
                    dashboard = self.dashboard_url,
                ),
            };
            match mailer.send(&message).await {
                Ok(()) => tracing::info!(email = %user.email, "confirmation email sent"),
                Err(err) => {
                    tracing::warn!(email = %user.email, error = %err, "confirmation email failed");
                    self.ledger_error(ErrorContext::EmailSendFail, &err, &user.email);
                }
            }
        }

        if let Some(url) = &self.alert_webhook_url {
            let result = self
                .http
                .post(url)
                .json(&serde_json::json!({
                    "content": format!(
                        "New SkillForge subscription: {} (plan {plan})",
                        user.email
                    ),
                }))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    tracing::info!("operational alert sent");
                }
                Ok(response) => {
                    let err =
                        BillingError::Upstream(format!("alert webhook {}", response.status()));
                    tracing::warn!(error = %err, "operational alert failed");
                    self.ledger_error(ErrorContext::AlertFail, &err, &user.email);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "operational alert failed");
                    self.ledger_error(
                        ErrorContext::AlertFail,
                        &BillingError::Upstream(err.to_string()),
                        &user.email,
                    );
                }
            }
        }
    }

    fn ledger_error(&self, context: ErrorContext, err: &BillingError, payload: &str) {
        if let Err(ledger_err) =
            self.ledger
                .record_error(ErrorRecord::new(context, err.to_string(), payload))
        {
            tracing::error!(error = %ledger_err, "failed to ledger notification error");
        }
    }
}
