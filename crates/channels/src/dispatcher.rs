use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use outreach_core::collaborators::{
    Channel, Contact, DispatchReceipt, NotificationDispatcher, OutboundMessage,
};
use outreach_core::config::AppConfig;
use outreach_core::error::DispatchError;

use crate::email::{EmailProvider, EmailStatus};
use crate::sms::SmsProvider;

/// Routes sequence messages to the email or SMS provider based on the channel
/// and the contact's addresses.
#[derive(Clone)]
pub struct ChannelDispatcher {
    email: Arc<EmailProvider>,
    sms: Arc<SmsProvider>,
}

impl ChannelDispatcher {
    pub fn new(email: Arc<EmailProvider>, sms: Arc<SmsProvider>) -> Self {
        Self { email, sms }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(EmailProvider::new(config.email.clone())),
            Arc::new(SmsProvider::new(config.sms.clone())),
        )
    }

    pub fn email(&self) -> &Arc<EmailProvider> {
        &self.email
    }

    pub fn sms(&self) -> &Arc<SmsProvider> {
        &self.sms
    }

    /// Mirrors a raw tracking event onto the provider's own delivery record.
    /// Returns `false` when neither provider knows the message id.
    pub fn apply_delivery_status(&self, provider_message_id: &str, event: &str) -> bool {
        let event = event.to_ascii_lowercase();
        if self.sms.get_message(provider_message_id).is_some() {
            return self.sms.handle_status_callback(provider_message_id, &event);
        }
        let status = match event.as_str() {
            "delivered" | "open" | "click" => EmailStatus::Delivered,
            "bounce" | "bounced" | "dropped" => EmailStatus::Bounced,
            _ => return self.email.get(provider_message_id).is_some(),
        };
        self.email.update_status(provider_message_id, status)
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelDispatcher {
    async fn send(
        &self,
        channel: Channel,
        contact: &Contact,
        message: &OutboundMessage,
    ) -> Result<DispatchReceipt, DispatchError> {
        let result = match channel {
            Channel::Email => match contact.email.as_deref() {
                Some(address) => self.email.send_email(address, message).await,
                None => Err(DispatchError::MissingAddress(Channel::Email)),
            },
            Channel::Sms => match contact.phone.as_deref() {
                Some(number) => self.sms.send_sms(number, message).await,
                None => Err(DispatchError::MissingAddress(Channel::Sms)),
            },
        };

        if let Err(e) = &result {
            warn!(
                channel = %channel,
                contact_id = %contact.id,
                error = %e,
                "Dispatch failed"
            );
            metrics::counter!("channels.dispatch_failed", "channel" => channel.to_string())
                .increment(1);
        }
        result
    }
}
