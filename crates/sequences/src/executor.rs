//! Step executor: performs the side effect of one due step and derives the
//! advanced enrollment. Nothing is committed here; the scheduler decides
//! whether the result still applies.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use outreach_core::collaborators::{
    ActivityStore, ActivityType, Channel, ContactStore, NewActivity, NotificationDispatcher,
    OutboundMessage,
};
use outreach_core::types::{
    Enrollment, EnrollmentStatus, ExecutionStatus, ExecutionStatusChange, Sequence, SequenceStep,
    StepAction, StepExecution,
};

use crate::report::SkipReason;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    /// Upper bound on each collaborator call made for a step.
    pub step_timeout: Duration,
    pub task_due_days: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(10),
            task_due_days: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Executed {
        enrollment: Enrollment,
        /// Absent only when a stepless sequence completed.
        execution: Option<StepExecution>,
    },
    Skipped(SkipReason),
}

/// Outcome of the side effect alone.
#[derive(Debug, Default)]
struct Attempt {
    failed: Option<String>,
    provider_message_id: Option<String>,
    activity_id: Option<String>,
}

impl Attempt {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            failed: Some(message.into()),
            ..Default::default()
        }
    }
}

pub struct StepExecutor {
    contacts: Arc<dyn ContactStore>,
    activities: Arc<dyn ActivityStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    settings: ExecutorSettings,
}

impl StepExecutor {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        activities: Arc<dyn ActivityStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            contacts,
            activities,
            dispatcher,
            settings,
        }
    }

    pub fn settings(&self) -> ExecutorSettings {
        self.settings
    }

    /// Runs the enrollment's current step. Delivery failures are recorded on
    /// the execution and the enrollment advances regardless.
    pub async fn execute_step(
        &self,
        enrollment: &Enrollment,
        sequence: &Sequence,
        executed_at: DateTime<Utc>,
    ) -> ExecutionResult {
        if sequence.steps.is_empty() {
            return ExecutionResult::Executed {
                enrollment: complete(enrollment, executed_at),
                execution: None,
            };
        }

        let index = enrollment.current_step_index;
        let Some(step) = sequence.step(index) else {
            return ExecutionResult::Skipped(SkipReason::StepMissing);
        };

        let attempt = self.perform(enrollment, step, executed_at).await;
        let status = if attempt.failed.is_some() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Sent
        };

        if let Some(error) = &attempt.failed {
            warn!(
                enrollment_id = %enrollment.id,
                step_index = index,
                step_type = step.step_type().as_str(),
                error = %error,
                "Step failed"
            );
        } else {
            debug!(
                enrollment_id = %enrollment.id,
                step_index = index,
                step_type = step.step_type().as_str(),
                "Step sent"
            );
        }

        let execution = StepExecution {
            id: Uuid::new_v4(),
            enrollment_id: enrollment.id,
            sequence_id: enrollment.sequence_id,
            step_index: index,
            step_type: step.step_type(),
            executed_at,
            status,
            error_message: attempt.failed,
            provider_message_id: attempt.provider_message_id,
            activity_id: attempt.activity_id,
            status_history: vec![ExecutionStatusChange {
                status,
                at: executed_at,
            }],
        };

        ExecutionResult::Executed {
            enrollment: advance(enrollment, sequence, executed_at),
            execution: Some(execution),
        }
    }

    async fn perform(
        &self,
        enrollment: &Enrollment,
        step: &SequenceStep,
        executed_at: DateTime<Utc>,
    ) -> Attempt {
        let reference = format!(
            "enrollment:{}:step:{}",
            enrollment.id, enrollment.current_step_index
        );

        let work = async {
            match &step.action {
                StepAction::Email { subject, content } => {
                    let message = OutboundMessage {
                        subject: Some(subject.clone()),
                        body: content.clone(),
                        reference,
                    };
                    self.dispatch(Channel::Email, &enrollment.contact_id, &message)
                        .await
                }
                StepAction::Sms { content } => {
                    let message = OutboundMessage {
                        subject: None,
                        body: content.clone(),
                        reference,
                    };
                    self.dispatch(Channel::Sms, &enrollment.contact_id, &message)
                        .await
                }
                StepAction::Call { subject, notes } => {
                    self.create_activity(NewActivity {
                        activity_type: ActivityType::Call,
                        subject: subject.clone(),
                        description: notes.clone(),
                        related_to: enrollment.contact_id.clone(),
                        due_date: None,
                    })
                    .await
                }
                StepAction::Task { description } => {
                    let due = executed_at.checked_add_signed(chrono::Duration::days(i64::from(
                        self.settings.task_due_days,
                    )));
                    self.create_activity(NewActivity {
                        activity_type: ActivityType::Task,
                        subject: description.clone(),
                        description: Some(description.clone()),
                        related_to: enrollment.contact_id.clone(),
                        due_date: due,
                    })
                    .await
                }
                StepAction::Wait => Attempt::default(),
            }
        };

        match tokio::time::timeout(self.settings.step_timeout, work).await {
            Ok(attempt) => attempt,
            Err(_) => Attempt::failed(format!(
                "Step timed out after {}ms",
                self.settings.step_timeout.as_millis()
            )),
        }
    }

    async fn dispatch(
        &self,
        channel: Channel,
        contact_id: &str,
        message: &OutboundMessage,
    ) -> Attempt {
        let Some(contact) = self.contacts.get(contact_id).await else {
            return Attempt::failed("Contact not found");
        };
        match self.dispatcher.send(channel, &contact, message).await {
            Ok(receipt) => Attempt {
                provider_message_id: Some(receipt.provider_message_id),
                ..Default::default()
            },
            Err(e) => Attempt::failed(e.to_string()),
        }
    }

    async fn create_activity(&self, activity: NewActivity) -> Attempt {
        match self.activities.create_activity(activity).await {
            Ok(activity_id) => Attempt {
                activity_id: Some(activity_id),
                ..Default::default()
            },
            Err(e) => Attempt::failed(format!("Activity creation failed: {e}")),
        }
    }
}

/// Moves the enrollment past its current step: the next step becomes due
/// after its delay, or the enrollment completes when none is left. A next step
/// whose due time cannot be represented can never run, so it also completes.
pub fn advance(enrollment: &Enrollment, sequence: &Sequence, executed_at: DateTime<Utc>) -> Enrollment {
    let next = enrollment.current_step_index + 1;
    let Some(step) = sequence.step(next) else {
        return complete(enrollment, executed_at);
    };
    match step.due_after(executed_at) {
        Some(next_step_at) => Enrollment {
            current_step_index: next,
            next_step_at: Some(next_step_at),
            ..enrollment.clone()
        },
        None => {
            warn!(
                enrollment_id = %enrollment.id,
                step_index = next,
                "Next step delay out of range, completing enrollment"
            );
            complete(enrollment, executed_at)
        }
    }
}

pub fn complete(enrollment: &Enrollment, completed_at: DateTime<Utc>) -> Enrollment {
    Enrollment {
        status: EnrollmentStatus::Completed,
        completed_at: Some(completed_at),
        next_step_at: None,
        ..enrollment.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_core::collaborators::Contact;
    use outreach_core::error::DispatchError;
    use outreach_core::types::StepType;

    use crate::memory::{CaptureDispatcher, InMemoryActivityStore, InMemoryContactStore};

    struct Harness {
        executor: StepExecutor,
        dispatcher: Arc<CaptureDispatcher>,
        activities: Arc<InMemoryActivityStore>,
    }

    fn harness(dispatcher: CaptureDispatcher, step_timeout: Duration) -> Harness {
        let contacts = Arc::new(InMemoryContactStore::new());
        contacts.insert(Contact {
            id: "alice".to_string(),
            name: Some("Alice".to_string()),
            email: Some("alice@example.com".to_string()),
            phone: Some("+15550101234".to_string()),
        });
        let dispatcher = Arc::new(dispatcher);
        let activities = Arc::new(InMemoryActivityStore::new());
        let executor = StepExecutor::new(
            contacts,
            activities.clone(),
            dispatcher.clone(),
            ExecutorSettings {
                step_timeout,
                task_due_days: 1,
            },
        );
        Harness {
            executor,
            dispatcher,
            activities,
        }
    }

    fn sequence(actions: Vec<(u32, u32, StepAction)>) -> Sequence {
        let now = Utc::now();
        Sequence {
            id: Uuid::new_v4(),
            name: "Exec".to_string(),
            description: None,
            steps: actions
                .into_iter()
                .map(|(delay_days, delay_hours, action)| SequenceStep {
                    id: Uuid::new_v4(),
                    delay_days,
                    delay_hours,
                    action,
                })
                .collect(),
            is_active: true,
            enrollment_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn enrollment(sequence: &Sequence, contact_id: &str, index: usize) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: Uuid::new_v4(),
            sequence_id: sequence.id,
            contact_id: contact_id.to_string(),
            current_step_index: index,
            status: EnrollmentStatus::Active,
            enrolled_at: now,
            next_step_at: Some(now),
            paused_at: None,
            completed_at: None,
            rescheduled_from: None,
            version: 3,
        }
    }

    fn email() -> StepAction {
        StepAction::Email {
            subject: "Hi".to_string(),
            content: "Hello".to_string(),
        }
    }

    fn unwrap_executed(result: ExecutionResult) -> (Enrollment, Option<StepExecution>) {
        match result {
            ExecutionResult::Executed {
                enrollment,
                execution,
            } => (enrollment, execution),
            ExecutionResult::Skipped(reason) => panic!("unexpected skip: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn test_email_step_sends_and_advances() {
        let h = harness(CaptureDispatcher::new(), Duration::from_secs(1));
        let seq = sequence(vec![(0, 1, email()), (1, 0, StepAction::Wait)]);
        let e = enrollment(&seq, "alice", 0);
        let at = Utc::now();

        let (updated, execution) = unwrap_executed(h.executor.execute_step(&e, &seq, at).await);
        let execution = execution.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Sent);
        assert_eq!(execution.step_type, StepType::Email);
        assert!(execution.provider_message_id.is_some());
        assert_eq!(execution.status_history.len(), 1);
        assert_eq!(updated.current_step_index, 1);
        assert_eq!(updated.next_step_at, Some(at + chrono::Duration::days(1)));
        assert_eq!(updated.version, e.version);

        let sent = h.dispatcher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, Channel::Email);
        assert_eq!(sent[0].message.subject.as_deref(), Some("Hi"));
    }

    #[tokio::test]
    async fn test_dispatch_failure_still_advances() {
        let dispatcher = CaptureDispatcher::new();
        dispatcher.fail_for("alice", DispatchError::Rejected("spam".to_string()));
        let h = harness(dispatcher, Duration::from_secs(1));
        let seq = sequence(vec![(0, 0, email())]);
        let e = enrollment(&seq, "alice", 0);
        let at = Utc::now();

        let (updated, execution) = unwrap_executed(h.executor.execute_step(&e, &seq, at).await);
        let execution = execution.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(
            execution.error_message.as_deref(),
            Some("Rejected by provider: spam")
        );
        assert_eq!(updated.status, EnrollmentStatus::Completed);
        assert_eq!(updated.completed_at, Some(at));
        assert!(updated.next_step_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_contact_records_failure() {
        let h = harness(CaptureDispatcher::new(), Duration::from_secs(1));
        let seq = sequence(vec![
            (
                0,
                0,
                StepAction::Sms {
                    content: "ping".to_string(),
                },
            ),
            (0, 2, StepAction::Wait),
        ]);
        let e = enrollment(&seq, "ghost", 0);

        let (updated, execution) =
            unwrap_executed(h.executor.execute_step(&e, &seq, Utc::now()).await);
        assert_eq!(
            execution.unwrap().error_message.as_deref(),
            Some("Contact not found")
        );
        assert_eq!(updated.current_step_index, 1);
        assert!(h.dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_slow_dispatch_times_out() {
        let h = harness(
            CaptureDispatcher::new().with_delay(Duration::from_millis(500)),
            Duration::from_millis(50),
        );
        let seq = sequence(vec![(0, 0, email())]);
        let e = enrollment(&seq, "alice", 0);

        let (_, execution) = unwrap_executed(h.executor.execute_step(&e, &seq, Utc::now()).await);
        let execution = execution.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(
            execution.error_message.as_deref(),
            Some("Step timed out after 50ms")
        );
    }

    #[tokio::test]
    async fn test_task_and_call_create_activities() {
        let h = harness(CaptureDispatcher::new(), Duration::from_secs(1));
        let seq = sequence(vec![
            (
                0,
                0,
                StepAction::Call {
                    subject: "Intro call".to_string(),
                    notes: Some("Ask about budget".to_string()),
                },
            ),
            (
                0,
                0,
                StepAction::Task {
                    description: "Send proposal".to_string(),
                },
            ),
        ]);
        let at = Utc::now();

        let call = enrollment(&seq, "alice", 0);
        let (_, call_exec) = unwrap_executed(h.executor.execute_step(&call, &seq, at).await);
        let task = enrollment(&seq, "alice", 1);
        let (task_done, task_exec) = unwrap_executed(h.executor.execute_step(&task, &seq, at).await);

        assert!(call_exec.unwrap().activity_id.is_some());
        assert!(task_exec.unwrap().activity_id.is_some());
        assert_eq!(task_done.status, EnrollmentStatus::Completed);

        let activities = h.activities.activities();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].activity.activity_type, ActivityType::Call);
        assert!(activities[0].activity.due_date.is_none());
        assert_eq!(activities[1].activity.activity_type, ActivityType::Task);
        assert_eq!(
            activities[1].activity.due_date,
            Some(at + chrono::Duration::days(1))
        );
    }

    #[tokio::test]
    async fn test_activity_failure_still_advances() {
        let h = harness(CaptureDispatcher::new(), Duration::from_secs(1));
        h.activities.fail_with("CRM offline");
        let seq = sequence(vec![
            (
                0,
                0,
                StepAction::Task {
                    description: "Follow up".to_string(),
                },
            ),
            (0, 1, StepAction::Wait),
        ]);
        let e = enrollment(&seq, "alice", 0);

        let (updated, execution) =
            unwrap_executed(h.executor.execute_step(&e, &seq, Utc::now()).await);
        let execution = execution.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(
            execution.error_message.as_deref(),
            Some("Activity creation failed: CRM offline")
        );
        assert_eq!(updated.current_step_index, 1);
    }

    #[tokio::test]
    async fn test_unreachable_next_step_completes_after_send() {
        let h = harness(CaptureDispatcher::new(), Duration::from_secs(1));
        let seq = sequence(vec![(0, 0, email()), (200_000_000, 0, StepAction::Wait)]);
        let e = enrollment(&seq, "alice", 0);
        let at = Utc::now();

        let (updated, execution) = unwrap_executed(h.executor.execute_step(&e, &seq, at).await);
        assert_eq!(execution.unwrap().status, ExecutionStatus::Sent);
        assert_eq!(updated.status, EnrollmentStatus::Completed);
        assert_eq!(updated.completed_at, Some(at));
        assert!(updated.next_step_at.is_none());
        assert_eq!(h.dispatcher.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_sequence_completes_without_execution() {
        let h = harness(CaptureDispatcher::new(), Duration::from_secs(1));
        let seq = sequence(vec![]);
        let e = enrollment(&seq, "alice", 0);

        let (updated, execution) =
            unwrap_executed(h.executor.execute_step(&e, &seq, Utc::now()).await);
        assert!(execution.is_none());
        assert_eq!(updated.status, EnrollmentStatus::Completed);
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_skipped() {
        let h = harness(CaptureDispatcher::new(), Duration::from_secs(1));
        let seq = sequence(vec![(0, 0, StepAction::Wait)]);
        let e = enrollment(&seq, "alice", 4);

        let result = h.executor.execute_step(&e, &seq, Utc::now()).await;
        assert!(matches!(
            result,
            ExecutionResult::Skipped(SkipReason::StepMissing)
        ));
    }
}
