use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use outreach_core::clock::{system_clock, Clock};
use outreach_core::collaborators::{ActivityStore, ContactStore, NotificationDispatcher};
use outreach_core::config::AppConfig;
use outreach_core::error::OutreachResult;
use outreach_core::event_bus::{noop_sink, EventSink};
use outreach_core::types::{
    BulkEnrollResult, DueStep, Enrollment, ExecutionStatus, NewSequence, ProviderEvent, Sequence,
    SequenceStats, SequenceSummary, SequenceUpdate, StepExecution,
};

use crate::executor::{ExecutorSettings, StepExecutor};
use crate::lifecycle::EnrollmentManager;
use crate::recorder::ExecutionRecorder;
use crate::report::ProcessingReport;
use crate::repository::SequenceRepository;
use crate::scheduler::StepScheduler;
use crate::stats;
use crate::store::SequenceStore;

/// Tunables for step execution and scanning.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub step_timeout: Duration,
    pub task_due_days: u32,
    pub max_concurrency: usize,
    pub default_batch_cap: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            step_timeout: Duration::from_millis(config.scheduler.step_timeout_ms),
            task_due_days: config.sequences.task_due_days,
            max_concurrency: config.scheduler.max_concurrency,
            default_batch_cap: config.scheduler.batch_cap,
        }
    }
}

pub struct SequenceEngineBuilder {
    contacts: Arc<dyn ContactStore>,
    activities: Arc<dyn ActivityStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    settings: EngineSettings,
}

impl SequenceEngineBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an event sink for emitting lifecycle events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> SequenceEngine {
        let repo = Arc::new(SequenceRepository::new());
        let store = Arc::new(SequenceStore::new(
            repo.clone(),
            self.clock.clone(),
            self.event_sink.clone(),
        ));
        let enrollments = Arc::new(EnrollmentManager::new(
            repo.clone(),
            self.contacts.clone(),
            self.clock.clone(),
            self.event_sink.clone(),
        ));
        let executor = Arc::new(StepExecutor::new(
            self.contacts,
            self.activities,
            self.dispatcher,
            ExecutorSettings {
                step_timeout: self.settings.step_timeout,
                task_due_days: self.settings.task_due_days,
            },
        ));
        let scheduler = StepScheduler::new(
            repo.clone(),
            executor,
            self.clock.clone(),
            self.event_sink.clone(),
            self.settings.max_concurrency,
        );
        let recorder = Arc::new(ExecutionRecorder::new(
            repo.clone(),
            enrollments.clone(),
            self.clock.clone(),
            self.event_sink,
        ));

        SequenceEngine {
            repo,
            store,
            enrollments,
            scheduler,
            recorder,
            clock: self.clock,
            settings: self.settings,
        }
    }
}

/// Entry point for sequence management, enrollment lifecycle, due-step
/// processing and engagement tracking.
#[derive(Clone)]
pub struct SequenceEngine {
    repo: Arc<SequenceRepository>,
    store: Arc<SequenceStore>,
    enrollments: Arc<EnrollmentManager>,
    scheduler: StepScheduler,
    recorder: Arc<ExecutionRecorder>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl std::fmt::Debug for SequenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceEngine")
            .field("repo", &self.repo)
            .field("settings", &self.settings)
            .finish()
    }
}

impl SequenceEngine {
    pub fn builder(
        contacts: Arc<dyn ContactStore>,
        activities: Arc<dyn ActivityStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> SequenceEngineBuilder {
        SequenceEngineBuilder {
            contacts,
            activities,
            dispatcher,
            clock: system_clock(),
            event_sink: noop_sink(),
            settings: EngineSettings::default(),
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ─── Sequences ──────────────────────────────────────────────────────────

    pub fn list_sequences(&self, active_only: bool) -> Vec<SequenceSummary> {
        self.store
            .list(active_only)
            .into_iter()
            .map(|sequence| {
                let enrollment_stats =
                    stats::enrollment_stats(&self.repo.enrollments_for_sequence(&sequence.id));
                SequenceSummary {
                    sequence,
                    enrollment_stats,
                }
            })
            .collect()
    }

    pub fn get_sequence(&self, id: &Uuid) -> OutreachResult<Sequence> {
        self.store.get(id)
    }

    pub fn get_sequence_stats(&self, id: &Uuid) -> OutreachResult<SequenceStats> {
        let sequence = self.store.get(id)?;
        let enrollments = self.repo.enrollments_for_sequence(id);
        let executions = self.repo.executions_for_sequence(id);
        Ok(stats::sequence_stats(&sequence, &enrollments, &executions))
    }

    pub fn create_sequence(&self, new: NewSequence) -> OutreachResult<Sequence> {
        self.store.create(new)
    }

    pub fn update_sequence(&self, id: &Uuid, update: SequenceUpdate) -> OutreachResult<Sequence> {
        self.store.update(id, update)
    }

    pub fn delete_sequence(&self, id: &Uuid) -> OutreachResult<()> {
        self.store.delete(id)
    }

    pub fn duplicate_sequence(&self, id: &Uuid) -> OutreachResult<Sequence> {
        self.store.duplicate(id)
    }

    pub fn recount_enrollments(&self, id: &Uuid) -> OutreachResult<u64> {
        self.store.recount_enrollments(id)
    }

    // ─── Enrollments ────────────────────────────────────────────────────────

    pub async fn enroll_contact(
        &self,
        sequence_id: &Uuid,
        contact_id: &str,
    ) -> OutreachResult<Enrollment> {
        self.enrollments.enroll(sequence_id, contact_id).await
    }

    pub async fn bulk_enroll(
        &self,
        sequence_id: &Uuid,
        contact_ids: &[String],
    ) -> Vec<BulkEnrollResult> {
        self.enrollments.bulk_enroll(sequence_id, contact_ids).await
    }

    pub fn pause_enrollment(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.enrollments.pause(id)
    }

    pub fn resume_enrollment(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.enrollments.resume(id)
    }

    pub fn remove_from_sequence(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.enrollments.remove(id)
    }

    pub fn mark_as_replied(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.enrollments.mark_replied(id)
    }

    pub fn mark_as_bounced(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.enrollments.mark_bounced(id)
    }

    pub fn mark_as_unsubscribed(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.enrollments.mark_unsubscribed(id)
    }

    pub fn cancel_enrollment(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.enrollments.cancel(id)
    }

    /// Returns the successor enrollment.
    pub fn reschedule_enrollment(
        &self,
        id: &Uuid,
        start_at: DateTime<Utc>,
    ) -> OutreachResult<Enrollment> {
        self.enrollments.reschedule(id, start_at)
    }

    pub fn get_enrollment(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        self.enrollments.get(id)
    }

    pub fn list_enrollments(&self, sequence_id: &Uuid) -> OutreachResult<Vec<Enrollment>> {
        self.enrollments.list_for_sequence(sequence_id)
    }

    pub fn get_executions(&self, enrollment_id: &Uuid) -> OutreachResult<Vec<StepExecution>> {
        self.enrollments.executions(enrollment_id)
    }

    // ─── Scheduling ─────────────────────────────────────────────────────────

    pub fn get_due_steps(&self, limit: Option<usize>) -> Vec<DueStep> {
        self.scheduler
            .due_steps(limit.unwrap_or(self.settings.default_batch_cap))
    }

    pub async fn process_due_steps(
        &self,
        now: DateTime<Utc>,
        batch_cap: Option<usize>,
    ) -> ProcessingReport {
        self.scheduler
            .process_due_steps(now, batch_cap.unwrap_or(self.settings.default_batch_cap))
            .await
    }

    // ─── Engagement ─────────────────────────────────────────────────────────

    pub fn update_step_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
    ) -> OutreachResult<StepExecution> {
        self.recorder
            .update_step_execution_status(execution_id, status)
    }

    pub fn record_provider_event(
        &self,
        provider_message_id: &str,
        event: ProviderEvent,
    ) -> OutreachResult<StepExecution> {
        self.recorder.record_provider_event(provider_message_id, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_core::clock::ManualClock;
    use outreach_core::collaborators::Contact;
    use outreach_core::types::{StepAction, StepDraft};

    use crate::memory::{CaptureDispatcher, InMemoryActivityStore, InMemoryContactStore};

    fn engine(clock: Arc<ManualClock>) -> SequenceEngine {
        let contacts = Arc::new(InMemoryContactStore::new());
        contacts.insert(Contact {
            id: "alice".to_string(),
            name: None,
            email: Some("alice@example.com".to_string()),
            phone: None,
        });
        SequenceEngine::builder(
            contacts,
            Arc::new(InMemoryActivityStore::new()),
            Arc::new(CaptureDispatcher::new()),
        )
        .with_clock(clock)
        .build()
    }

    #[tokio::test]
    async fn test_list_sequences_includes_enrollment_stats() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(clock.clone());
        let sequence = engine
            .create_sequence(NewSequence {
                name: "Facade".to_string(),
                description: None,
                steps: vec![StepDraft {
                    delay_days: 0,
                    delay_hours: 0,
                    action: StepAction::Wait,
                }],
                is_active: true,
            })
            .unwrap();
        engine.enroll_contact(&sequence.id, "alice").await.unwrap();

        let summaries = engine.list_sequences(false);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].enrollment_stats.active, 1);
        assert_eq!(summaries[0].sequence.enrollment_count, 1);

        let report = engine.process_due_steps(clock.now(), None).await;
        assert_eq!(report.processed_count, 1);

        let stats = engine.get_sequence_stats(&sequence.id).unwrap();
        assert_eq!(stats.enrollments.completed, 1);
        assert_eq!(stats.steps[0].sent, 1);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AppConfig::default();
        config.scheduler.step_timeout_ms = 250;
        config.scheduler.batch_cap = 7;
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.step_timeout, Duration::from_millis(250));
        assert_eq!(settings.default_batch_cap, 7);
    }
}
