//! Normalizes provider tracking callbacks into engagement events.
//!
//! Email providers report `open`, `click`, `bounce`, `unsubscribe` and similar;
//! SMS providers report delivery states and inbound replies. Only the events
//! that change a step's engagement or an enrollment's status are mapped.

use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use outreach_core::types::ProviderEvent;

/// One raw tracking callback as posted to the webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackingCallback {
    /// Message id returned by the provider when the step was sent.
    pub provider_message_id: String,
    /// Provider event name, e.g. `open`, `click`, `bounce`, `undelivered`.
    pub event: String,
}

pub fn normalize_event(event: &str) -> Option<ProviderEvent> {
    let normalized = match event.to_ascii_lowercase().as_str() {
        "open" | "opened" => ProviderEvent::Opened,
        "click" | "clicked" => ProviderEvent::Clicked,
        "reply" | "replied" | "inbound" => ProviderEvent::Replied,
        "bounce" | "bounced" | "dropped" | "undelivered" => ProviderEvent::Bounced,
        "unsubscribe" | "unsubscribed" | "group_unsubscribe" | "spamreport" | "stop" => {
            ProviderEvent::Unsubscribed
        }
        other => {
            debug!(event = %other, "Ignoring tracking event");
            return None;
        }
    };
    Some(normalized)
}
