//! Due-step scanner. One call drains a bounded snapshot of due enrollments,
//! running items concurrently and reporting the outcome of each.
//!
//! The scanner owns no timer; a periodic trigger outside the engine calls
//! [`StepScheduler::process_due_steps`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use outreach_core::clock::Clock;
use outreach_core::error::OutreachError;
use outreach_core::event_bus::{make_event, EventSink, SequenceEventType};
use outreach_core::types::{DueStep, Enrollment, EnrollmentStatus, ExecutionStatus, StepExecution};

use crate::executor::{ExecutionResult, StepExecutor};
use crate::report::{ItemOutcome, ItemReport, ProcessingReport, SkipReason};
use crate::repository::SequenceRepository;

/// Marks an enrollment as being processed by some scan. Released on drop, so a
/// panicking item never leaves its claim behind.
struct InFlightClaim {
    in_flight: Arc<DashMap<Uuid, ()>>,
    id: Uuid,
}

impl InFlightClaim {
    fn acquire(in_flight: &Arc<DashMap<Uuid, ()>>, id: Uuid) -> Option<Self> {
        match in_flight.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    in_flight: in_flight.clone(),
                    id,
                })
            }
        }
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct StepScheduler {
    repo: Arc<SequenceRepository>,
    executor: Arc<StepExecutor>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    in_flight: Arc<DashMap<Uuid, ()>>,
    max_concurrency: usize,
}

impl StepScheduler {
    pub fn new(
        repo: Arc<SequenceRepository>,
        executor: Arc<StepExecutor>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            repo,
            executor,
            clock,
            event_sink,
            in_flight: Arc::new(DashMap::new()),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Read-only view of what the next scan at the current time would pick up.
    pub fn due_steps(&self, limit: usize) -> Vec<DueStep> {
        let now = self.clock.now();
        self.repo
            .due_enrollments(now, limit)
            .into_iter()
            .filter_map(|e| {
                let next_step_at = e.next_step_at?;
                let step_type = self
                    .repo
                    .sequence(&e.sequence_id)
                    .and_then(|s| s.step(e.current_step_index).map(|step| step.step_type()));
                Some(DueStep {
                    enrollment_id: e.id,
                    sequence_id: e.sequence_id,
                    contact_id: e.contact_id,
                    step_index: e.current_step_index,
                    step_type,
                    next_step_at,
                })
            })
            .collect()
    }

    /// Executes the current step of up to `batch_cap` enrollments due at `now`,
    /// oldest-due first. Items are captured up front and re-validated before
    /// they run; nothing selected after the snapshot joins this batch.
    pub async fn process_due_steps(&self, now: DateTime<Utc>, batch_cap: usize) -> ProcessingReport {
        let started = Instant::now();

        let snapshot: Vec<Uuid> = self
            .repo
            .due_enrollments(now, batch_cap)
            .into_iter()
            .map(|e| e.id)
            .collect();
        debug!(due = snapshot.len(), batch_cap, "Scanning due steps");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<ItemReport>> = vec![None; snapshot.len()];

        for (position, id) in snapshot.iter().copied().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    slots[position] = Some(ItemReport::skipped(id, SkipReason::Aborted));
                    continue;
                }
            };
            let scheduler = self.clone();

            tasks.spawn(async move {
                // Inner task so a panic surfaces as a JoinError for this item only.
                let joined = tokio::spawn(async move { scheduler.process_one(id, now).await }).await;
                drop(permit);
                let report = joined.unwrap_or_else(|e| {
                    warn!(enrollment_id = %id, error = %e, "Due step task aborted");
                    ItemReport {
                        enrollment_id: id,
                        outcome: ItemOutcome::Skipped {
                            reason: SkipReason::Aborted,
                        },
                        detail: Some(e.to_string()),
                    }
                });
                (position, report)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, report)) => slots[position] = Some(report),
                Err(e) => warn!(error = %e, "Scan worker failed"),
            }
        }

        let items: Vec<ItemReport> = slots
            .into_iter()
            .zip(snapshot)
            .map(|(slot, id)| slot.unwrap_or_else(|| ItemReport::skipped(id, SkipReason::Aborted)))
            .collect();

        for item in &items {
            if let Some(reason) = item.skip_reason() {
                metrics::counter!("sequences.scan.items_skipped", "reason" => reason.as_str())
                    .increment(1);
            }
        }

        // Report times are on the scan's own timeline, which may be backfilled.
        let elapsed = started.elapsed();
        let finished_at = chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        let report = ProcessingReport::from_items(now, finished_at, items);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        metrics::histogram!("sequences.scan.duration_ms").record(elapsed_ms);

        info!(
            scanned = report.scanned,
            processed = report.processed_count,
            skipped = report.skipped_count,
            failed_dispatch = report.failed_dispatch_count,
            elapsed_ms = elapsed_ms,
            "Processed due steps"
        );
        report
    }

    async fn process_one(&self, id: Uuid, now: DateTime<Utc>) -> ItemReport {
        let Some(_claim) = InFlightClaim::acquire(&self.in_flight, id) else {
            debug!(enrollment_id = %id, "Enrollment already in flight");
            return ItemReport::skipped(id, SkipReason::InFlight);
        };

        let Some(enrollment) = self.repo.enrollment(&id) else {
            return ItemReport::skipped(id, SkipReason::Vanished);
        };
        if !enrollment.is_due(now) {
            debug!(enrollment_id = %id, status = enrollment.status.as_str(), "No longer due");
            return ItemReport::skipped(id, SkipReason::NotDue);
        }
        let Some(sequence) = self.repo.sequence(&enrollment.sequence_id) else {
            warn!(
                enrollment_id = %id,
                sequence_id = %enrollment.sequence_id,
                "Sequence missing for due enrollment"
            );
            return self.retire(
                &enrollment,
                EnrollmentStatus::Cancelled,
                SkipReason::SequenceMissing,
                now,
            );
        };

        match self.executor.execute_step(&enrollment, &sequence, now).await {
            ExecutionResult::Skipped(reason) => {
                warn!(
                    enrollment_id = %id,
                    step_index = enrollment.current_step_index,
                    steps = sequence.steps.len(),
                    reason = reason.as_str(),
                    "Skipping due step"
                );
                // No step at the index means the sequence ran out under it.
                self.retire(&enrollment, EnrollmentStatus::Completed, reason, now)
            }
            ExecutionResult::Executed {
                enrollment: advanced,
                execution,
            } => self.commit(&enrollment, advanced, execution),
        }
    }

    /// Closes an enrollment whose current step can never run, so it is not
    /// selected again. Skipped quietly if someone else changed it first.
    fn retire(
        &self,
        enrollment: &Enrollment,
        status: EnrollmentStatus,
        reason: SkipReason,
        now: DateTime<Utc>,
    ) -> ItemReport {
        let id = enrollment.id;
        let retired = self.repo.update_enrollment(&id, |current| {
            if current.version != enrollment.version {
                return Err(OutreachError::conflict("Enrollment changed during execution"));
            }
            current.status = status;
            current.completed_at = Some(now);
            current.next_step_at = None;
            Ok(())
        });

        let detail = match retired {
            Ok(retired) => {
                info!(
                    enrollment_id = %id,
                    status = status.as_str(),
                    reason = reason.as_str(),
                    "Enrollment closed by scan"
                );
                let event_type = if status == EnrollmentStatus::Completed {
                    SequenceEventType::EnrollmentCompleted
                } else {
                    SequenceEventType::EnrollmentCancelled
                };
                self.event_sink.emit(make_event(
                    event_type,
                    retired.sequence_id,
                    Some(id),
                    Some(retired.contact_id.clone()),
                    Some(retired.current_step_index),
                ));
                Some(format!("Enrollment {}", status.as_str()))
            }
            Err(e) => {
                debug!(enrollment_id = %id, error = %e, "Enrollment not closed");
                None
            }
        };

        ItemReport {
            enrollment_id: id,
            outcome: ItemOutcome::Skipped { reason },
            detail,
        }
    }

    /// Stores the advanced enrollment if nobody else touched it since it was
    /// read. The execution record is kept whenever the enrollment still
    /// exists, since its side effect already happened.
    fn commit(
        &self,
        dispatched: &Enrollment,
        advanced: Enrollment,
        execution: Option<StepExecution>,
    ) -> ItemReport {
        let id = dispatched.id;
        let committed = self.repo.update_enrollment(&id, |current| {
            if current.version != dispatched.version {
                return Err(OutreachError::conflict("Enrollment changed during execution"));
            }
            *current = advanced;
            Ok(())
        });

        let step_index = execution.as_ref().map(|e| e.step_index);
        let step_type = execution.as_ref().map(|e| e.step_type);
        let execution_status = execution.as_ref().map(|e| e.status);
        let detail = execution.as_ref().and_then(|e| e.error_message.clone());

        let updated = match committed {
            Ok(updated) => updated,
            Err(OutreachError::NotFound(_)) => {
                debug!(enrollment_id = %id, "Enrollment removed during execution");
                return ItemReport::skipped(id, SkipReason::Vanished);
            }
            Err(e) => {
                warn!(enrollment_id = %id, error = %e, "Step result superseded");
                if let Some(execution) = execution {
                    if self.repo.enrollment(&id).is_some() {
                        self.record_execution(dispatched, execution);
                    }
                }
                return ItemReport {
                    enrollment_id: id,
                    outcome: ItemOutcome::Skipped {
                        reason: SkipReason::Superseded,
                    },
                    detail,
                };
            }
        };

        if let Some(execution) = execution {
            self.record_execution(dispatched, execution);
        }

        let completed = updated.status == EnrollmentStatus::Completed;
        if completed {
            info!(
                enrollment_id = %id,
                sequence_id = %updated.sequence_id,
                "Enrollment completed"
            );
            self.event_sink.emit(make_event(
                SequenceEventType::EnrollmentCompleted,
                updated.sequence_id,
                Some(id),
                Some(updated.contact_id.clone()),
                step_index,
            ));
        } else {
            debug!(
                enrollment_id = %id,
                step_index = updated.current_step_index,
                next_step_at = ?updated.next_step_at,
                "Enrollment advanced"
            );
        }

        ItemReport {
            enrollment_id: id,
            outcome: ItemOutcome::Executed {
                step_index,
                step_type,
                execution_status,
                completed,
            },
            detail,
        }
    }

    fn record_execution(&self, enrollment: &Enrollment, execution: StepExecution) {
        metrics::counter!(
            "sequences.steps.executed",
            "step_type" => execution.step_type.as_str(),
            "status" => execution.status.as_str()
        )
        .increment(1);

        let event_type = if execution.status == ExecutionStatus::Failed {
            SequenceEventType::StepFailed
        } else {
            SequenceEventType::StepSent
        };
        self.event_sink.emit(make_event(
            event_type,
            enrollment.sequence_id,
            Some(enrollment.id),
            Some(enrollment.contact_id.clone()),
            Some(execution.step_index),
        ));
        self.repo.append_execution(execution);
    }
}
