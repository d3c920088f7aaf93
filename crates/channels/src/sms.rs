//! Twilio-style SMS delivery with segment accounting.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use outreach_core::collaborators::{Channel, DispatchReceipt, OutboundMessage};
use outreach_core::config::SmsConfig;
use outreach_core::error::DispatchError;

/// Non-alphanumeric characters of the GSM 7-bit default alphabet and its
/// extension table.
const GSM_SYMBOLS: &str = " !\"#$%&'()*+,-./:;<=>?@_\n\r\
    £¥èéùìòÇØøÅåΔΦΓΛΩΠΨΣΘΞÆæßÉ¤¡¿ÄÖÑÜ§äöñüà{}[]~\\^|€";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Undelivered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsMessage {
    pub id: Uuid,
    pub to: String,
    pub from: String,
    pub body: String,
    pub reference: String,
    pub status: SmsStatus,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
    pub segments: u32,
}

pub struct SmsProvider {
    config: SmsConfig,
    /// Messages keyed by provider id (`SM...`).
    messages: DashMap<String, SmsMessage>,
}

impl SmsProvider {
    pub fn new(config: SmsConfig) -> Self {
        tracing::info!(from = %config.from_number, "SMS provider initialized");
        Self {
            config,
            messages: DashMap::new(),
        }
    }

    /// Queues an SMS to an E.164 number.
    pub async fn send_sms(
        &self,
        to: &str,
        message: &OutboundMessage,
    ) -> Result<DispatchReceipt, DispatchError> {
        if !is_e164(to) {
            metrics::counter!("sms.rejected").increment(1);
            return Err(DispatchError::Rejected(format!(
                "invalid phone number '{to}'"
            )));
        }

        let provider_id = format!("SM{}", Uuid::new_v4().simple());
        let segments = calculate_segments(&message.body);
        let sms = SmsMessage {
            id: Uuid::new_v4(),
            to: to.to_string(),
            from: self.config.from_number.clone(),
            body: message.body.clone(),
            reference: message.reference.clone(),
            status: SmsStatus::Queued,
            provider_id: provider_id.clone(),
            created_at: Utc::now(),
            segments,
        };

        tracing::info!(
            to = %to,
            provider_id = %provider_id,
            segments = segments,
            "SMS message queued"
        );
        metrics::counter!("sms.messages_sent").increment(1);
        metrics::counter!("sms.segments_sent").increment(u64::from(segments));

        self.messages.insert(provider_id.clone(), sms);
        Ok(DispatchReceipt {
            channel: Channel::Sms,
            provider_message_id: provider_id,
        })
    }

    /// Applies a status callback. Returns `false` for unknown ids or statuses.
    pub fn handle_status_callback(&self, provider_id: &str, status: &str) -> bool {
        let new_status = match status {
            "queued" => SmsStatus::Queued,
            "sent" => SmsStatus::Sent,
            "delivered" => SmsStatus::Delivered,
            "failed" => SmsStatus::Failed,
            "undelivered" => SmsStatus::Undelivered,
            other => {
                tracing::warn!(status = %other, "Unknown SMS status in callback");
                return false;
            }
        };

        match self.messages.get_mut(provider_id) {
            Some(mut message) => {
                message.status = new_status;
                metrics::counter!("sms.status_callbacks", "status" => status.to_string())
                    .increment(1);
                true
            }
            None => {
                tracing::warn!(provider_id = %provider_id, "Status callback for unknown provider_id");
                false
            }
        }
    }

    pub fn get_message(&self, provider_id: &str) -> Option<SmsMessage> {
        self.messages.get(provider_id).map(|m| m.clone())
    }

    pub fn config(&self) -> &SmsConfig {
        &self.config
    }
}

fn is_e164(number: &str) -> bool {
    match number.strip_prefix('+') {
        Some(digits) => (8..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Number of SMS segments for a body: 160/153 characters per segment for
/// GSM 7-bit text, 70/67 once any character needs UCS-2.
pub fn calculate_segments(body: &str) -> u32 {
    if body.is_empty() {
        return 1;
    }

    let char_count = body.chars().count() as u32;
    let (single, multi) = if body.chars().all(is_gsm_7bit) {
        (160, 153)
    } else {
        (70, 67)
    };

    if char_count <= single {
        1
    } else {
        char_count.div_ceil(multi)
    }
}

fn is_gsm_7bit(c: char) -> bool {
    c.is_ascii_alphanumeric() || GSM_SYMBOLS.contains(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> OutboundMessage {
        OutboundMessage {
            subject: None,
            body: body.to_string(),
            reference: "enrollment:1:step:0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_and_callback() {
        let provider = SmsProvider::new(SmsConfig::default());
        let receipt = provider
            .send_sms("+15559876543", &message("Hello, World!"))
            .await
            .unwrap();

        let stored = provider.get_message(&receipt.provider_message_id).unwrap();
        assert_eq!(stored.from, "+15550100000");
        assert_eq!(stored.status, SmsStatus::Queued);
        assert_eq!(stored.segments, 1);

        assert!(provider.handle_status_callback(&receipt.provider_message_id, "delivered"));
        assert_eq!(
            provider.get_message(&receipt.provider_message_id).unwrap().status,
            SmsStatus::Delivered
        );
        assert!(!provider.handle_status_callback(&receipt.provider_message_id, "bogus"));
        assert!(!provider.handle_status_callback("SM_nonexistent", "delivered"));
    }

    #[tokio::test]
    async fn test_rejects_non_e164() {
        let provider = SmsProvider::new(SmsConfig::default());
        for number in ["5559876543", "+1", "+1555abc4567", ""] {
            let result = provider.send_sms(number, &message("hi")).await;
            assert!(matches!(result, Err(DispatchError::Rejected(_))), "{number}");
        }
    }

    #[test]
    fn test_calculate_segments_gsm() {
        assert_eq!(calculate_segments(""), 1);
        assert_eq!(calculate_segments(&"A".repeat(160)), 1);
        assert_eq!(calculate_segments(&"A".repeat(161)), 2);
        assert_eq!(calculate_segments(&"B".repeat(306)), 2);
        assert_eq!(calculate_segments(&"C".repeat(307)), 3);
        assert_eq!(calculate_segments("Price: 5€ {today}"), 1);
    }

    #[test]
    fn test_calculate_segments_unicode() {
        assert_eq!(calculate_segments(&"\u{1F600}".repeat(10)), 1);
        assert_eq!(calculate_segments(&format!("{}\u{1F600}", "A".repeat(69))), 1);
        assert_eq!(calculate_segments(&format!("{}\u{1F600}", "A".repeat(70))), 2);
    }
}
