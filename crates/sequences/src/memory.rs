//! In-memory collaborators: a contact directory, an activity log and a
//! capturing dispatcher. Used by tests and by the standalone binary.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use outreach_core::collaborators::{
    ActivityStore, Channel, Contact, ContactStore, DispatchReceipt, NewActivity,
    NotificationDispatcher, OutboundMessage,
};
use outreach_core::error::DispatchError;

#[derive(Debug, Default)]
pub struct InMemoryContactStore {
    contacts: DashMap<String, Contact>,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, contact: Contact) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn exists(&self, contact_id: &str) -> bool {
        self.contacts.contains_key(contact_id)
    }

    async fn get(&self, contact_id: &str) -> Option<Contact> {
        self.contacts.get(contact_id).map(|c| c.clone())
    }
}

/// An activity as stored by [`InMemoryActivityStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedActivity {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub activity: NewActivity,
}

#[derive(Debug, Default)]
pub struct InMemoryActivityStore {
    activities: Mutex<Vec<RecordedActivity>>,
    failure: Mutex<Option<String>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `create_activity` fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn activities(&self) -> Vec<RecordedActivity> {
        self.activities.lock().clone()
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn create_activity(&self, activity: NewActivity) -> anyhow::Result<String> {
        if let Some(message) = self.failure.lock().clone() {
            anyhow::bail!(message);
        }
        let id = format!("act_{}", Uuid::new_v4().simple());
        self.activities.lock().push(RecordedActivity {
            id: id.clone(),
            created_at: Utc::now(),
            activity,
        });
        Ok(id)
    }
}

/// A message accepted by [`CaptureDispatcher`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel: Channel,
    pub contact_id: String,
    pub message: OutboundMessage,
    pub provider_message_id: String,
}

/// Dispatcher that records every send instead of delivering it. Failures can
/// be injected per contact, and an artificial latency simulates slow providers.
#[derive(Debug, Default)]
pub struct CaptureDispatcher {
    sent: Mutex<Vec<SentMessage>>,
    failures: Mutex<HashMap<String, DispatchError>>,
    delay: Option<Duration>,
}

impl CaptureDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_for(&self, contact_id: &str, error: DispatchError) {
        self.failures.lock().insert(contact_id.to_string(), error);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl NotificationDispatcher for CaptureDispatcher {
    async fn send(
        &self,
        channel: Channel,
        contact: &Contact,
        message: &OutboundMessage,
    ) -> Result<DispatchReceipt, DispatchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().get(&contact.id).cloned() {
            return Err(error);
        }

        let provider_message_id = format!("{}_{}", channel, Uuid::new_v4().simple());
        self.sent.lock().push(SentMessage {
            channel,
            contact_id: contact.id.clone(),
            message: message.clone(),
            provider_message_id: provider_message_id.clone(),
        });
        Ok(DispatchReceipt {
            channel,
            provider_message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_core::collaborators::ActivityType;

    fn contact(id: &str) -> Contact {
        Contact {
            id: id.to_string(),
            name: None,
            email: Some(format!("{id}@example.com")),
            phone: None,
        }
    }

    #[tokio::test]
    async fn test_contact_store() {
        let store = InMemoryContactStore::new();
        store.insert(contact("alice"));
        assert!(store.exists("alice").await);
        assert!(!store.exists("bob").await);
        assert_eq!(store.get("alice").await.unwrap().id, "alice");
    }

    #[tokio::test]
    async fn test_activity_store_failure_injection() {
        let store = InMemoryActivityStore::new();
        let activity = NewActivity {
            activity_type: ActivityType::Task,
            subject: "Follow up".to_string(),
            description: None,
            related_to: "alice".to_string(),
            due_date: None,
        };
        let id = store.create_activity(activity.clone()).await.unwrap();
        assert!(id.starts_with("act_"));

        store.fail_with("offline");
        let err = store.create_activity(activity).await.unwrap_err();
        assert_eq!(err.to_string(), "offline");
        assert_eq!(store.activities().len(), 1);
    }

    #[tokio::test]
    async fn test_capture_dispatcher() {
        let dispatcher = CaptureDispatcher::new();
        dispatcher.fail_for("bob", DispatchError::Unavailable("down".to_string()));
        let message = OutboundMessage {
            subject: None,
            body: "hi".to_string(),
            reference: "ref".to_string(),
        };

        let receipt = dispatcher
            .send(Channel::Sms, &contact("alice"), &message)
            .await
            .unwrap();
        assert!(receipt.provider_message_id.starts_with("sms_"));

        let err = dispatcher
            .send(Channel::Sms, &contact("bob"), &message)
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Unavailable("down".to_string()));
        assert_eq!(dispatcher.sent_count(), 1);
    }
}
