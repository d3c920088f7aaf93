//! Execution event recorder: engagement updates for executed steps, either
//! reported directly or arriving as provider tracking callbacks.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use outreach_core::clock::Clock;
use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::event_bus::{make_event, EventSink, SequenceEventType};
use outreach_core::types::{
    EnrollmentStatus, ExecutionStatus, ExecutionStatusChange, ProviderEvent, StepExecution,
};

use crate::lifecycle::EnrollmentManager;
use crate::repository::SequenceRepository;

pub struct ExecutionRecorder {
    repo: Arc<SequenceRepository>,
    enrollments: Arc<EnrollmentManager>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl ExecutionRecorder {
    pub fn new(
        repo: Arc<SequenceRepository>,
        enrollments: Arc<EnrollmentManager>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repo,
            enrollments,
            clock,
            event_sink,
        }
    }

    /// Appends `status` to the execution's history and makes it current. A
    /// reply also ends the owning enrollment if it is still open.
    pub fn update_step_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
    ) -> OutreachResult<StepExecution> {
        let execution = self.set_status(execution_id, status, None)?;
        if status == ExecutionStatus::Replied {
            self.enrollments
                .terminate_if_open(&execution.enrollment_id, EnrollmentStatus::Replied);
        }
        Ok(execution)
    }

    /// Applies a tracking callback identified by the provider's message id.
    pub fn record_provider_event(
        &self,
        provider_message_id: &str,
        event: ProviderEvent,
    ) -> OutreachResult<StepExecution> {
        let execution_id = self
            .repo
            .execution_for_provider_message(provider_message_id)
            .ok_or_else(|| OutreachError::not_found("Unknown provider message id"))?;

        debug!(
            provider_message_id = %provider_message_id,
            execution_id = %execution_id,
            event = ?event,
            "Provider event received"
        );

        match event {
            ProviderEvent::Opened => {
                self.update_step_execution_status(&execution_id, ExecutionStatus::Opened)
            }
            ProviderEvent::Clicked => {
                self.update_step_execution_status(&execution_id, ExecutionStatus::Clicked)
            }
            ProviderEvent::Replied => {
                self.update_step_execution_status(&execution_id, ExecutionStatus::Replied)
            }
            ProviderEvent::Bounced => {
                let execution = self.set_status(
                    &execution_id,
                    ExecutionStatus::Failed,
                    Some("Message bounced".to_string()),
                )?;
                self.enrollments
                    .terminate_if_open(&execution.enrollment_id, EnrollmentStatus::Bounced);
                Ok(execution)
            }
            ProviderEvent::Unsubscribed => {
                let execution = self
                    .repo
                    .execution(&execution_id)
                    .ok_or_else(|| OutreachError::not_found("Step execution not found"))?;
                self.enrollments
                    .terminate_if_open(&execution.enrollment_id, EnrollmentStatus::Unsubscribed);
                Ok(execution)
            }
        }
    }

    fn set_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> OutreachResult<StepExecution> {
        let at = self.clock.now();
        let execution = self.repo.update_execution(execution_id, |execution| {
            execution.status = status;
            execution
                .status_history
                .push(ExecutionStatusChange { status, at });
            if error_message.is_some() {
                execution.error_message = error_message;
            }
        })?;

        info!(
            execution_id = %execution_id,
            enrollment_id = %execution.enrollment_id,
            status = status.as_str(),
            "Step execution status updated"
        );
        self.event_sink.emit(make_event(
            SequenceEventType::ExecutionStatusUpdated,
            execution.sequence_id,
            Some(execution.enrollment_id),
            None,
            Some(execution.step_index),
        ));
        Ok(execution)
    }
}
