//! SendGrid-style email delivery for sequence steps.
//!
//! Builds the provider payload with open/click tracking and the enrollment
//! reference as custom args, so tracking webhooks can be tied back to the
//! step execution through the returned message id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use outreach_core::collaborators::{Channel, DispatchReceipt, OutboundMessage};
use outreach_core::config::EmailConfig;
use outreach_core::error::DispatchError;

/// Delivery state of an email as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Queued,
    Delivered,
    Bounced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub provider_message_id: String,
    pub to: String,
    pub subject: String,
    pub reference: String,
    pub status: EmailStatus,
    pub sent_at: DateTime<Utc>,
}

pub struct EmailProvider {
    config: EmailConfig,
    /// Sent mail keyed by provider message id.
    outbox: DashMap<String, EmailRecord>,
}

impl EmailProvider {
    pub fn new(config: EmailConfig) -> Self {
        info!(
            from = %config.from_email,
            open_tracking = config.open_tracking,
            click_tracking = config.click_tracking,
            "Email provider initialized"
        );
        Self {
            config,
            outbox: DashMap::new(),
        }
    }

    /// Queues an email. In production this POSTs the payload to the
    /// provider's send endpoint.
    pub async fn send_email(
        &self,
        to_email: &str,
        message: &OutboundMessage,
    ) -> Result<DispatchReceipt, DispatchError> {
        if !is_plausible_address(to_email) {
            metrics::counter!("email.rejected").increment(1);
            return Err(DispatchError::Rejected(format!(
                "invalid email address '{to_email}'"
            )));
        }

        let subject = message.subject.clone().unwrap_or_default();
        debug!(
            to = %to_email,
            subject = %subject,
            reference = %message.reference,
            "Sending email"
        );

        let _payload = serde_json::json!({
            "personalizations": [{
                "to": [{"email": to_email}],
                "custom_args": {"reference": message.reference}
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name
            },
            "subject": subject,
            "content": [{
                "type": "text/html",
                "value": message.body
            }],
            "tracking_settings": {
                "click_tracking": {"enable": self.config.click_tracking},
                "open_tracking": {"enable": self.config.open_tracking}
            }
        });

        let provider_message_id = format!("sg-{}", uuid::Uuid::new_v4());
        self.outbox.insert(
            provider_message_id.clone(),
            EmailRecord {
                provider_message_id: provider_message_id.clone(),
                to: to_email.to_string(),
                subject,
                reference: message.reference.clone(),
                status: EmailStatus::Queued,
                sent_at: Utc::now(),
            },
        );
        metrics::counter!("email.sent").increment(1);

        Ok(DispatchReceipt {
            channel: Channel::Email,
            provider_message_id,
        })
    }

    /// Records a delivery-level status reported by the provider. Returns
    /// `false` for unknown message ids.
    pub fn update_status(&self, provider_message_id: &str, status: EmailStatus) -> bool {
        match self.outbox.get_mut(provider_message_id) {
            Some(mut record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, provider_message_id: &str) -> Option<EmailRecord> {
        self.outbox.get(provider_message_id).map(|r| r.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.outbox.len()
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }
}

/// One '@' with a non-empty local part and a dotted domain.
fn is_plausible_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
