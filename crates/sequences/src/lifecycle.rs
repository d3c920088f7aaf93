//! Enrollment lifecycle: enroll, pause, resume, remove and the terminal
//! short-circuits (replied, bounced, unsubscribed, cancelled).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use outreach_core::clock::Clock;
use outreach_core::collaborators::ContactStore;
use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::event_bus::{make_event, EventSink, SequenceEventType};
use outreach_core::types::{BulkEnrollResult, Enrollment, EnrollmentStatus, StepExecution};

use crate::repository::SequenceRepository;
use crate::state_machine::EnrollmentStateMachine;

pub struct EnrollmentManager {
    repo: Arc<SequenceRepository>,
    contacts: Arc<dyn ContactStore>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    machine: EnrollmentStateMachine,
}

impl EnrollmentManager {
    pub fn new(
        repo: Arc<SequenceRepository>,
        contacts: Arc<dyn ContactStore>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repo,
            contacts,
            clock,
            event_sink,
            machine: EnrollmentStateMachine::new(),
        }
    }

    /// Starts a contact on the first step of a sequence. The first step is due
    /// after its own delay, or immediately when the sequence has no steps.
    pub async fn enroll(&self, sequence_id: &Uuid, contact_id: &str) -> OutreachResult<Enrollment> {
        if self.repo.sequence(sequence_id).is_none() {
            return Err(OutreachError::not_found("Sequence not found"));
        }
        if !self.contacts.exists(contact_id).await {
            return Err(OutreachError::not_found("Contact not found"));
        }

        let now = self.clock.now();
        let enrollment = self.repo.create_enrollment(sequence_id, contact_id, |sequence| {
            let next_step_at = match sequence.step(0) {
                Some(step) => step.due_after(now).ok_or_else(delay_out_of_range)?,
                None => now,
            };
            Ok(Enrollment {
                id: Uuid::new_v4(),
                sequence_id: sequence.id,
                contact_id: contact_id.to_string(),
                current_step_index: 0,
                status: EnrollmentStatus::Active,
                enrolled_at: now,
                next_step_at: Some(next_step_at),
                paused_at: None,
                completed_at: None,
                rescheduled_from: None,
                version: 0,
            })
        })?;

        info!(
            enrollment_id = %enrollment.id,
            sequence_id = %sequence_id,
            contact_id = %contact_id,
            next_step_at = ?enrollment.next_step_at,
            "Contact enrolled"
        );
        metrics::counter!("sequences.enrollments.created").increment(1);
        self.emit(SequenceEventType::ContactEnrolled, &enrollment);
        Ok(enrollment)
    }

    /// Enrolls each contact independently. Failures are reported per id and
    /// never abort the rest of the batch.
    pub async fn bulk_enroll(
        &self,
        sequence_id: &Uuid,
        contact_ids: &[String],
    ) -> Vec<BulkEnrollResult> {
        let mut results = Vec::with_capacity(contact_ids.len());
        for contact_id in contact_ids {
            let result = match self.enroll(sequence_id, contact_id).await {
                Ok(enrollment) => BulkEnrollResult {
                    id: contact_id.clone(),
                    success: true,
                    error: None,
                    enrollment_id: Some(enrollment.id),
                },
                Err(e) => {
                    debug!(contact_id = %contact_id, error = %e, "Bulk enroll skipped contact");
                    BulkEnrollResult {
                        id: contact_id.clone(),
                        success: false,
                        error: Some(e.to_string()),
                        enrollment_id: None,
                    }
                }
            };
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            sequence_id = %sequence_id,
            requested = contact_ids.len(),
            succeeded,
            "Bulk enrollment finished"
        );
        results
    }

    pub fn get(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.repo
            .enrollment(id)
            .ok_or_else(|| OutreachError::not_found("Enrollment not found"))
    }

    pub fn list_for_sequence(&self, sequence_id: &Uuid) -> OutreachResult<Vec<Enrollment>> {
        if self.repo.sequence(sequence_id).is_none() {
            return Err(OutreachError::not_found("Sequence not found"));
        }
        Ok(self.repo.enrollments_for_sequence(sequence_id))
    }

    pub fn executions(&self, id: &Uuid) -> OutreachResult<Vec<StepExecution>> {
        self.get(id)?;
        Ok(self.repo.executions_for_enrollment(id))
    }

    pub fn pause(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        let now = self.clock.now();
        let enrollment = self.repo.update_enrollment(id, |e| {
            if e.status != EnrollmentStatus::Active {
                return Err(OutreachError::invalid_state(
                    "Only active enrollments can be paused",
                ));
            }
            e.status = EnrollmentStatus::Paused;
            e.paused_at = Some(now);
            e.next_step_at = None;
            Ok(())
        })?;

        info!(enrollment_id = %id, step = enrollment.current_step_index, "Enrollment paused");
        self.emit(SequenceEventType::EnrollmentPaused, &enrollment);
        Ok(enrollment)
    }

    /// Reactivates a paused enrollment; its current step becomes due after the
    /// step's delay, measured from now.
    pub fn resume(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        let now = self.clock.now();
        let enrollment = self.repo.update_enrollment_with_sequence(id, |sequence, e| {
            if e.status != EnrollmentStatus::Paused {
                return Err(OutreachError::invalid_state(
                    "Only paused enrollments can be resumed",
                ));
            }
            self.machine.check(e.status, EnrollmentStatus::Active)?;
            let step = sequence
                .step(e.current_step_index)
                .ok_or_else(|| OutreachError::not_found("Step not found"))?;
            e.status = EnrollmentStatus::Active;
            e.next_step_at = Some(step.due_after(now).ok_or_else(delay_out_of_range)?);
            e.paused_at = None;
            Ok(())
        })?;

        info!(
            enrollment_id = %id,
            next_step_at = ?enrollment.next_step_at,
            "Enrollment resumed"
        );
        self.emit(SequenceEventType::EnrollmentResumed, &enrollment);
        Ok(enrollment)
    }

    /// Deletes the enrollment and its execution history.
    pub fn remove(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        let removed = self.repo.remove_enrollment(id)?;
        info!(
            enrollment_id = %id,
            sequence_id = %removed.sequence_id,
            "Enrollment removed"
        );
        self.emit(SequenceEventType::EnrollmentRemoved, &removed);
        Ok(removed)
    }

    pub fn mark_replied(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.terminate(id, EnrollmentStatus::Replied)
    }

    pub fn mark_bounced(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.terminate(id, EnrollmentStatus::Bounced)
    }

    pub fn mark_unsubscribed(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.terminate(id, EnrollmentStatus::Unsubscribed)
    }

    pub fn cancel(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.terminate(id, EnrollmentStatus::Cancelled)
    }

    /// Forces an active or paused enrollment into a terminal status regardless
    /// of its step position. Repeating the same terminal status is a no-op.
    fn terminate(&self, id: &Uuid, status: EnrollmentStatus) -> OutreachResult<Enrollment> {
        let snapshot = self.get(id)?;
        if snapshot.status == status {
            return Ok(snapshot);
        }

        let now = self.clock.now();
        let enrollment = self.repo.update_enrollment(id, |e| {
            self.machine.check(e.status, status)?;
            e.status = status;
            e.completed_at = Some(now);
            e.next_step_at = None;
            e.paused_at = None;
            Ok(())
        })?;

        info!(
            enrollment_id = %id,
            status = status.as_str(),
            step = enrollment.current_step_index,
            "Enrollment terminated"
        );
        let event_type = match status {
            EnrollmentStatus::Replied => SequenceEventType::EnrollmentReplied,
            EnrollmentStatus::Bounced => SequenceEventType::EnrollmentBounced,
            EnrollmentStatus::Unsubscribed => SequenceEventType::EnrollmentUnsubscribed,
            _ => SequenceEventType::EnrollmentCancelled,
        };
        self.emit(event_type, &enrollment);
        Ok(enrollment)
    }

    /// Like the terminal short-circuits, but tolerates enrollments that are
    /// already closed or gone. Used by provider callbacks, which may arrive
    /// after the enrollment finished.
    pub fn terminate_if_open(&self, id: &Uuid, status: EnrollmentStatus) -> Option<Enrollment> {
        match self.terminate(id, status) {
            Ok(enrollment) => Some(enrollment),
            Err(OutreachError::InvalidState(reason)) => {
                debug!(enrollment_id = %id, reason = %reason, "Enrollment already closed");
                None
            }
            Err(e) => {
                warn!(enrollment_id = %id, error = %e, "Could not close enrollment");
                None
            }
        }
    }

    /// Supersedes an open enrollment: the old one is cancelled and a new active
    /// enrollment continues from the same step at `start_at`, linked back via
    /// `rescheduled_from`.
    pub fn reschedule(&self, id: &Uuid, start_at: DateTime<Utc>) -> OutreachResult<Enrollment> {
        let now = self.clock.now();
        let (retired, successor) = self.repo.supersede_enrollment(
            id,
            |e| {
                self.machine.check(e.status, EnrollmentStatus::Cancelled)?;
                e.status = EnrollmentStatus::Cancelled;
                e.completed_at = Some(now);
                e.next_step_at = None;
                e.paused_at = None;
                Ok(())
            },
            |old| Enrollment {
                id: Uuid::new_v4(),
                sequence_id: old.sequence_id,
                contact_id: old.contact_id.clone(),
                current_step_index: old.current_step_index,
                status: EnrollmentStatus::Active,
                enrolled_at: now,
                next_step_at: Some(start_at),
                paused_at: None,
                completed_at: None,
                rescheduled_from: Some(old.id),
                version: 0,
            },
        )?;

        info!(
            enrollment_id = %successor.id,
            rescheduled_from = %retired.id,
            start_at = %start_at,
            "Enrollment rescheduled"
        );
        self.emit(SequenceEventType::EnrollmentCancelled, &retired);
        self.emit(SequenceEventType::EnrollmentRescheduled, &successor);
        Ok(successor)
    }

    fn emit(&self, event_type: SequenceEventType, enrollment: &Enrollment) {
        self.event_sink.emit(make_event(
            event_type,
            enrollment.sequence_id,
            Some(enrollment.id),
            Some(enrollment.contact_id.clone()),
            Some(enrollment.current_step_index),
        ));
    }
}

fn delay_out_of_range() -> OutreachError {
    OutreachError::validation("Step delay is out of range")
}
