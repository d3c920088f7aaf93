//! Sequence event bus: trait for emitting lifecycle events from the engine.
//!
//! The engine accepts an `Arc<dyn EventSink>` and emits one event per
//! enrollment transition or executed step. Sinks route them to analytics,
//! message queues or logs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SequenceEventType {
    SequenceCreated,
    SequenceUpdated,
    SequenceDeleted,
    ContactEnrolled,
    EnrollmentPaused,
    EnrollmentResumed,
    EnrollmentRemoved,
    EnrollmentRescheduled,
    EnrollmentCompleted,
    EnrollmentReplied,
    EnrollmentBounced,
    EnrollmentUnsubscribed,
    EnrollmentCancelled,
    StepSent,
    StepFailed,
    ExecutionStatusUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEvent {
    pub event_id: Uuid,
    pub event_type: SequenceEventType,
    pub sequence_id: Uuid,
    pub enrollment_id: Option<Uuid>,
    pub contact_id: Option<String>,
    pub step_index: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for emitting sequence events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SequenceEvent);
}

/// No-op sink for tests and deployments that don't consume events.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: SequenceEvent) {}
}

/// Sink that writes every event to the tracing subscriber.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: SequenceEvent) {
        debug!(
            event_type = ?event.event_type,
            sequence_id = %event.sequence_id,
            enrollment_id = ?event.enrollment_id,
            contact_id = ?event.contact_id,
            step_index = ?event.step_index,
            "Sequence event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<SequenceEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<SequenceEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: SequenceEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: SequenceEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for a `SequenceEvent`.
pub fn make_event(
    event_type: SequenceEventType,
    sequence_id: Uuid,
    enrollment_id: Option<Uuid>,
    contact_id: Option<String>,
    step_index: Option<usize>,
) -> SequenceEvent {
    SequenceEvent {
        event_id: Uuid::new_v4(),
        event_type,
        sequence_id,
        enrollment_id,
        contact_id,
        step_index,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
