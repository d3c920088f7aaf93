//! Collaborator interfaces the sequence engine consumes.
//!
//! Contacts, activities and message delivery live outside the engine. Each is
//! reached through an object-safe async trait so deployments can plug in their
//! own stores and providers.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::DispatchError;

/// A reachable person.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Contact {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn exists(&self, contact_id: &str) -> bool;

    async fn get(&self, contact_id: &str) -> Option<Contact>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Call,
    Task,
}

/// Activity to be created for a call or task step.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewActivity {
    pub activity_type: ActivityType,
    pub subject: String,
    pub description: Option<String>,
    /// Contact the activity relates to.
    pub related_to: String,
    pub due_date: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Returns the id of the created activity.
    async fn create_activity(&self, activity: NewActivity) -> anyhow::Result<String>;
}

/// Delivery channel for outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => f.write_str("email"),
            Channel::Sms => f.write_str("sms"),
        }
    }
}

/// Rendered message content handed to a dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub subject: Option<String>,
    pub body: String,
    /// Correlation tag, forwarded to providers as custom metadata.
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub channel: Channel,
    pub provider_message_id: String,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        contact: &Contact,
        message: &OutboundMessage,
    ) -> Result<DispatchReceipt, DispatchError>;
}
