//! Sequence definition store: CRUD for sequence templates.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use outreach_core::clock::Clock;
use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::event_bus::{make_event, EventSink, SequenceEventType};
use outreach_core::types::{NewSequence, Sequence, SequenceStep, SequenceUpdate, StepAction, StepDraft};

use crate::repository::SequenceRepository;

/// Upper bounds for a single step's delay fields (ten years either way).
pub const MAX_DELAY_DAYS: i64 = 3_650;
pub const MAX_DELAY_HOURS: i64 = 87_600;

pub struct SequenceStore {
    repo: Arc<SequenceRepository>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl SequenceStore {
    pub fn new(
        repo: Arc<SequenceRepository>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repo,
            clock,
            event_sink,
        }
    }

    /// Validates and stores a new sequence.
    pub fn create(&self, new: NewSequence) -> OutreachResult<Sequence> {
        let name = validate_name(&new.name)?;
        let steps = validate_steps(&new.steps)?;
        let now = self.clock.now();

        let sequence = Sequence {
            id: Uuid::new_v4(),
            name,
            description: new.description,
            steps,
            is_active: new.is_active,
            enrollment_count: 0,
            created_at: now,
            updated_at: now,
        };

        info!(
            sequence_id = %sequence.id,
            name = %sequence.name,
            steps = sequence.steps.len(),
            "Creating sequence"
        );
        self.repo.insert_sequence(sequence.clone());
        self.event_sink.emit(make_event(
            SequenceEventType::SequenceCreated,
            sequence.id,
            None,
            None,
            None,
        ));
        Ok(sequence)
    }

    pub fn get(&self, id: &Uuid) -> OutreachResult<Sequence> {
        self.repo
            .sequence(id)
            .ok_or_else(|| OutreachError::not_found("Sequence not found"))
    }

    /// All sequences, oldest first.
    pub fn list(&self, active_only: bool) -> Vec<Sequence> {
        let mut sequences: Vec<Sequence> = self
            .repo
            .sequences()
            .into_iter()
            .filter(|s| !active_only || s.is_active)
            .collect();
        sequences.sort_by_key(|s| s.created_at);
        sequences
    }

    /// Merges the provided fields. Replacement steps are re-validated and get
    /// fresh ids.
    pub fn update(&self, id: &Uuid, update: SequenceUpdate) -> OutreachResult<Sequence> {
        let name = update.name.as_deref().map(validate_name).transpose()?;
        let steps = update.steps.as_deref().map(validate_steps).transpose()?;
        let now = self.clock.now();

        let updated = self.repo.update_sequence(id, |sequence| {
            if let Some(name) = name {
                sequence.name = name;
            }
            if let Some(description) = update.description {
                sequence.description = Some(description);
            }
            if let Some(steps) = steps {
                sequence.steps = steps;
            }
            if let Some(is_active) = update.is_active {
                sequence.is_active = is_active;
            }
            sequence.updated_at = now;
            Ok(())
        })?;

        info!(sequence_id = %id, "Updated sequence");
        self.event_sink.emit(make_event(
            SequenceEventType::SequenceUpdated,
            *id,
            None,
            None,
            None,
        ));
        Ok(updated)
    }

    /// Deletes a sequence with no active enrollments, cascading to its
    /// enrollments and executions.
    pub fn delete(&self, id: &Uuid) -> OutreachResult<()> {
        let removed = self.repo.remove_sequence_if_idle(id)?;
        info!(sequence_id = %id, name = %removed.name, "Deleted sequence");
        self.event_sink.emit(make_event(
            SequenceEventType::SequenceDeleted,
            *id,
            None,
            None,
            None,
        ));
        Ok(())
    }

    /// Copies a sequence as an inactive draft with fresh step ids.
    pub fn duplicate(&self, id: &Uuid) -> OutreachResult<Sequence> {
        let source = self.get(id)?;
        let now = self.clock.now();

        let copy = Sequence {
            id: Uuid::new_v4(),
            name: format!("{} (Copy)", source.name),
            description: source.description.clone(),
            steps: source
                .steps
                .iter()
                .map(|step| SequenceStep {
                    id: Uuid::new_v4(),
                    ..step.clone()
                })
                .collect(),
            is_active: false,
            enrollment_count: 0,
            created_at: now,
            updated_at: now,
        };

        info!(source_id = %id, sequence_id = %copy.id, "Duplicated sequence");
        self.repo.insert_sequence(copy.clone());
        self.event_sink.emit(make_event(
            SequenceEventType::SequenceCreated,
            copy.id,
            None,
            None,
            None,
        ));
        Ok(copy)
    }

    /// Recomputes the cached enrollment counter.
    pub fn recount_enrollments(&self, id: &Uuid) -> OutreachResult<u64> {
        self.repo.recount_enrollments(id)
    }
}

fn validate_name(name: &str) -> OutreachResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(OutreachError::validation("Sequence name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn validate_steps(drafts: &[StepDraft]) -> OutreachResult<Vec<SequenceStep>> {
    drafts
        .iter()
        .enumerate()
        .map(|(index, draft)| validate_step(index, draft))
        .collect()
}

fn validate_step(index: usize, draft: &StepDraft) -> OutreachResult<SequenceStep> {
    let delay_days = validate_delay(index, "delay_days", draft.delay_days, MAX_DELAY_DAYS)?;
    let delay_hours = validate_delay(index, "delay_hours", draft.delay_hours, MAX_DELAY_HOURS)?;

    let missing = match &draft.action {
        StepAction::Email { subject, .. } if subject.trim().is_empty() => Some("subject"),
        StepAction::Email { content, .. } if content.trim().is_empty() => Some("content"),
        StepAction::Sms { content } if content.trim().is_empty() => Some("content"),
        StepAction::Call { subject, .. } if subject.trim().is_empty() => Some("subject"),
        StepAction::Task { description } if description.trim().is_empty() => Some("description"),
        _ => None,
    };
    if let Some(field) = missing {
        return Err(OutreachError::validation(format!(
            "Step {} ({}) is missing {}",
            index,
            draft.action.step_type().as_str(),
            field
        )));
    }

    Ok(SequenceStep {
        id: Uuid::new_v4(),
        delay_days,
        delay_hours,
        action: draft.action.clone(),
    })
}

fn validate_delay(index: usize, field: &str, value: i64, max: i64) -> OutreachResult<u32> {
    if value < 0 {
        return Err(OutreachError::validation(format!(
            "Step {} has negative {}",
            index, field
        )));
    }
    if value > max {
        return Err(OutreachError::validation(format!(
            "Step {} {} exceeds {}",
            index, field, max
        )));
    }
    u32::try_from(value).map_err(|_| {
        OutreachError::validation(format!("Step {} {} is out of range", index, field))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_core::clock::SystemClock;
    use outreach_core::event_bus::{capture_sink, noop_sink};
    use outreach_core::types::{Enrollment, EnrollmentStatus};

    fn store() -> (SequenceStore, Arc<SequenceRepository>) {
        let repo = Arc::new(SequenceRepository::new());
        let store = SequenceStore::new(repo.clone(), Arc::new(SystemClock), noop_sink());
        (store, repo)
    }

    fn email_draft(delay_days: i64, delay_hours: i64) -> StepDraft {
        StepDraft {
            delay_days,
            delay_hours,
            action: StepAction::Email {
                subject: "Intro".to_string(),
                content: "Hello there".to_string(),
            },
        }
    }

    fn new_sequence(steps: Vec<StepDraft>) -> NewSequence {
        NewSequence {
            name: "Cold Outreach".to_string(),
            description: None,
            steps,
            is_active: true,
        }
    }

    fn enroll(repo: &SequenceRepository, sequence_id: Uuid, contact: &str) -> Enrollment {
        repo.create_enrollment(&sequence_id, contact, |s| Ok(Enrollment {
            id: Uuid::new_v4(),
            sequence_id: s.id,
            contact_id: contact.to_string(),
            current_step_index: 0,
            status: EnrollmentStatus::Active,
            enrolled_at: chrono::Utc::now(),
            next_step_at: Some(chrono::Utc::now()),
            paused_at: None,
            completed_at: None,
            rescheduled_from: None,
            version: 0,
        }))
        .unwrap()
    }

    #[test]
    fn test_create_sequence() {
        let repo = Arc::new(SequenceRepository::new());
        let sink = capture_sink();
        let store = SequenceStore::new(repo, Arc::new(SystemClock), sink.clone());

        let sequence = store
            .create(new_sequence(vec![email_draft(0, 1), email_draft(2, 0)]))
            .unwrap();
        assert_eq!(sequence.steps.len(), 2);
        assert_eq!(sequence.steps[0].delay_hours, 1);
        assert_eq!(sequence.enrollment_count, 0);
        assert_eq!(store.get(&sequence.id).unwrap().name, "Cold Outreach");
        assert_eq!(sink.count_type(SequenceEventType::SequenceCreated), 1);
    }

    #[test]
    fn test_create_rejects_empty_name_and_negative_delay() {
        let (store, _) = store();

        let mut blank = new_sequence(vec![]);
        blank.name = "   ".to_string();
        assert!(matches!(store.create(blank), Err(OutreachError::Validation(_))));

        let negative = new_sequence(vec![email_draft(0, -1)]);
        assert!(matches!(store.create(negative), Err(OutreachError::Validation(_))));

        let too_large = new_sequence(vec![email_draft(i64::from(u32::MAX) + 1, 0)]);
        assert!(matches!(store.create(too_large), Err(OutreachError::Validation(_))));
    }

    #[test]
    fn test_create_caps_step_delays() {
        let (store, _) = store();

        let far_days = new_sequence(vec![email_draft(200_000_000, 0)]);
        let err = store.create(far_days).unwrap_err();
        assert_eq!(err.to_string(), "Step 0 delay_days exceeds 3650");

        let far_hours = new_sequence(vec![email_draft(0, 0), email_draft(0, MAX_DELAY_HOURS + 1)]);
        assert!(matches!(store.create(far_hours), Err(OutreachError::Validation(_))));

        let at_cap = new_sequence(vec![email_draft(MAX_DELAY_DAYS, MAX_DELAY_HOURS)]);
        assert!(store.create(at_cap).is_ok());
    }

    #[test]
    fn test_create_rejects_malformed_payload() {
        let (store, _) = store();
        let draft = StepDraft {
            delay_days: 0,
            delay_hours: 0,
            action: StepAction::Task {
                description: "".to_string(),
            },
        };
        let err = store.create(new_sequence(vec![draft])).unwrap_err();
        assert_eq!(err.to_string(), "Step 0 (task) is missing description");
    }

    #[test]
    fn test_update_merges_fields() {
        let (store, _) = store();
        let sequence = store.create(new_sequence(vec![email_draft(0, 1)])).unwrap();
        let original_step_id = sequence.steps[0].id;

        let renamed = store
            .update(
                &sequence.id,
                SequenceUpdate {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Renamed");
        assert!(renamed.is_active);
        assert_eq!(renamed.steps[0].id, original_step_id);

        let replaced = store
            .update(
                &sequence.id,
                SequenceUpdate {
                    steps: Some(vec![email_draft(1, 0), email_draft(0, 0)]),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(replaced.steps.len(), 2);
        assert_ne!(replaced.steps[0].id, original_step_id);
        assert!(!replaced.is_active);

        let invalid = store.update(
            &sequence.id,
            SequenceUpdate {
                steps: Some(vec![email_draft(-1, 0)]),
                ..Default::default()
            },
        );
        assert!(matches!(invalid, Err(OutreachError::Validation(_))));
        assert_eq!(store.get(&sequence.id).unwrap().steps.len(), 2);
    }

    #[test]
    fn test_update_missing_sequence() {
        let (store, _) = store();
        let result = store.update(&Uuid::new_v4(), SequenceUpdate::default());
        assert!(matches!(result, Err(OutreachError::NotFound(_))));
    }

    #[test]
    fn test_delete_conflicts_with_active_enrollment() {
        let (store, repo) = store();
        let sequence = store.create(new_sequence(vec![email_draft(0, 1)])).unwrap();
        let enrollment = enroll(&repo, sequence.id, "contact-1");

        assert!(matches!(
            store.delete(&sequence.id),
            Err(OutreachError::Conflict(_))
        ));

        repo.update_enrollment(&enrollment.id, |e| {
            e.status = EnrollmentStatus::Completed;
            e.next_step_at = None;
            Ok(())
        })
        .unwrap();

        store.delete(&sequence.id).unwrap();
        assert!(matches!(store.get(&sequence.id), Err(OutreachError::NotFound(_))));
        assert!(repo.enrollment(&enrollment.id).is_none());
        assert!(matches!(store.delete(&sequence.id), Err(OutreachError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_resets_counters() {
        let (store, repo) = store();
        let sequence = store
            .create(new_sequence(vec![email_draft(0, 1), email_draft(1, 0)]))
            .unwrap();
        enroll(&repo, sequence.id, "contact-1");

        let copy = store.duplicate(&sequence.id).unwrap();
        assert_ne!(copy.id, sequence.id);
        assert_eq!(copy.name, "Cold Outreach (Copy)");
        assert_eq!(copy.enrollment_count, 0);
        assert!(!copy.is_active);
        assert_eq!(copy.steps.len(), 2);
        for (original, copied) in sequence.steps.iter().zip(&copy.steps) {
            assert_ne!(original.id, copied.id);
            assert_eq!(original.action, copied.action);
            assert_eq!(original.delay_days, copied.delay_days);
        }
    }

    #[test]
    fn test_list_active_only() {
        let (store, _) = store();
        store.create(new_sequence(vec![])).unwrap();
        let mut inactive = new_sequence(vec![]);
        inactive.is_active = false;
        store.create(inactive).unwrap();

        assert_eq!(store.list(false).len(), 2);
        assert_eq!(store.list(true).len(), 1);
    }
}
