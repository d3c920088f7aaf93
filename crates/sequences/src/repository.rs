//! In-memory storage for sequences, enrollments and step executions.
//!
//! Every multi-map operation acquires guards in one fixed order:
//! sequences, then the pair index, then enrollments, then executions. A guard
//! on a later map is never held while acquiring an earlier one.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::types::{Enrollment, EnrollmentStatus, Sequence, StepExecution};

type PairKey = (Uuid, String);

#[derive(Default)]
pub struct SequenceRepository {
    sequences: DashMap<Uuid, Sequence>,
    /// (sequence, contact) -> enrollment currently occupying the pair.
    pairs: DashMap<PairKey, Uuid>,
    enrollments: DashMap<Uuid, Enrollment>,
    executions: DashMap<Uuid, StepExecution>,
    /// provider message id -> execution id, for tracking callbacks.
    provider_index: DashMap<String, Uuid>,
}

impl std::fmt::Debug for SequenceRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceRepository")
            .field("sequences", &self.sequences.len())
            .field("enrollments", &self.enrollments.len())
            .field("executions", &self.executions.len())
            .finish()
    }
}

fn sequence_not_found() -> OutreachError {
    OutreachError::not_found("Sequence not found")
}

fn enrollment_not_found() -> OutreachError {
    OutreachError::not_found("Enrollment not found")
}

impl SequenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Sequences ──────────────────────────────────────────────────────────

    pub fn sequence(&self, id: &Uuid) -> Option<Sequence> {
        self.sequences.get(id).map(|r| r.clone())
    }

    pub fn sequences(&self) -> Vec<Sequence> {
        self.sequences.iter().map(|r| r.value().clone()).collect()
    }

    pub fn insert_sequence(&self, sequence: Sequence) {
        self.sequences.insert(sequence.id, sequence);
    }

    /// Applies `f` to a copy of the sequence and stores it only if `f` succeeds.
    pub fn update_sequence(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut Sequence) -> OutreachResult<()>,
    ) -> OutreachResult<Sequence> {
        let mut entry = self.sequences.get_mut(id).ok_or_else(sequence_not_found)?;
        let mut draft = entry.clone();
        f(&mut draft)?;
        *entry = draft.clone();
        Ok(draft)
    }

    /// Serialized add to the cached enrollment counter, floored at zero.
    pub fn adjust_enrollment_count(&self, id: &Uuid, delta: i64) {
        if let Some(mut sequence) = self.sequences.get_mut(id) {
            sequence.enrollment_count = if delta >= 0 {
                sequence.enrollment_count.saturating_add(delta.unsigned_abs())
            } else {
                sequence.enrollment_count.saturating_sub(delta.unsigned_abs())
            };
        }
    }

    /// Recomputes the cached counter from the live enrollment set.
    pub fn recount_enrollments(&self, id: &Uuid) -> OutreachResult<u64> {
        let count = self
            .enrollments
            .iter()
            .filter(|e| e.sequence_id == *id)
            .count() as u64;
        let mut sequence = self.sequences.get_mut(id).ok_or_else(sequence_not_found)?;
        sequence.enrollment_count = count;
        Ok(count)
    }

    /// Removes the sequence unless one of its enrollments is active, cascading
    /// to its enrollments and their executions. The check and the cascade both
    /// run under the sequence's write lock; every writer that can create or
    /// reactivate an enrollment holds that sequence's read guard, so none can
    /// interleave with the delete.
    pub fn remove_sequence_if_idle(&self, id: &Uuid) -> OutreachResult<Sequence> {
        let Entry::Occupied(slot) = self.sequences.entry(*id) else {
            return Err(sequence_not_found());
        };

        let mut enrollment_ids = Vec::new();
        for enrollment in self.enrollments.iter().filter(|e| e.sequence_id == *id) {
            if enrollment.status == EnrollmentStatus::Active {
                return Err(OutreachError::conflict("Sequence has active enrollments"));
            }
            enrollment_ids.push(enrollment.id);
        }
        for enrollment_id in enrollment_ids {
            self.purge_enrollment(&enrollment_id);
        }

        Ok(slot.remove())
    }

    // ─── Enrollments ────────────────────────────────────────────────────────

    pub fn enrollment(&self, id: &Uuid) -> Option<Enrollment> {
        self.enrollments.get(id).map(|r| r.clone())
    }

    pub fn enrollments_for_sequence(&self, sequence_id: &Uuid) -> Vec<Enrollment> {
        let mut enrollments: Vec<Enrollment> = self
            .enrollments
            .iter()
            .filter(|e| e.sequence_id == *sequence_id)
            .map(|e| e.value().clone())
            .collect();
        enrollments.sort_by_key(|e| e.enrolled_at);
        enrollments
    }

    fn pair_is_live(&self, enrollment_id: &Uuid) -> bool {
        self.enrollments
            .get(enrollment_id)
            .is_some_and(|e| !e.status.is_terminal())
    }

    /// Atomically claims the (sequence, contact) pair and stores the enrollment
    /// produced by `build`. Fails if the sequence is missing or inactive, if a
    /// live enrollment already occupies the pair, or if `build` fails.
    pub fn create_enrollment(
        &self,
        sequence_id: &Uuid,
        contact_id: &str,
        build: impl FnOnce(&Sequence) -> OutreachResult<Enrollment>,
    ) -> OutreachResult<Enrollment> {
        let enrollment = {
            let sequence = self.sequences.get(sequence_id).ok_or_else(sequence_not_found)?;
            if !sequence.is_active {
                return Err(OutreachError::conflict("Sequence is not active"));
            }

            match self.pairs.entry((*sequence_id, contact_id.to_string())) {
                Entry::Occupied(mut slot) => {
                    if self.pair_is_live(slot.get()) {
                        return Err(OutreachError::conflict("Already enrolled"));
                    }
                    let enrollment = build(sequence.value())?;
                    self.enrollments.insert(enrollment.id, enrollment.clone());
                    slot.insert(enrollment.id);
                    enrollment
                }
                Entry::Vacant(slot) => {
                    let enrollment = build(sequence.value())?;
                    self.enrollments.insert(enrollment.id, enrollment.clone());
                    slot.insert(enrollment.id);
                    enrollment
                }
            }
        };

        self.adjust_enrollment_count(sequence_id, 1);
        Ok(enrollment)
    }

    /// Applies `f` to a copy of the enrollment under its entry lock and commits
    /// it with a bumped version if `f` succeeds. Terminal results release the
    /// pair slot.
    pub fn update_enrollment(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut Enrollment) -> OutreachResult<()>,
    ) -> OutreachResult<Enrollment> {
        let updated = {
            let mut entry = self.enrollments.get_mut(id).ok_or_else(enrollment_not_found)?;
            let mut draft = entry.clone();
            f(&mut draft)?;
            draft.version = entry.version + 1;
            *entry = draft.clone();
            draft
        };

        if updated.status.is_terminal() {
            self.release_pair(&updated);
        }
        Ok(updated)
    }

    /// Like [`Self::update_enrollment`], but `f` also sees the owning sequence
    /// and the sequence's read guard is held throughout, so the sequence cannot
    /// be deleted while the change lands.
    pub fn update_enrollment_with_sequence(
        &self,
        id: &Uuid,
        f: impl FnOnce(&Sequence, &mut Enrollment) -> OutreachResult<()>,
    ) -> OutreachResult<Enrollment> {
        let sequence_id = self.enrollment(id).ok_or_else(enrollment_not_found)?.sequence_id;
        let sequence = self.sequences.get(&sequence_id).ok_or_else(sequence_not_found)?;
        self.update_enrollment(id, |e| f(sequence.value(), e))
    }

    /// Supersedes `old_id` with a successor. `retire` terminates the old
    /// enrollment and `build` derives the new one; the pair slot moves to the
    /// successor without ever being observed free.
    pub fn supersede_enrollment(
        &self,
        old_id: &Uuid,
        retire: impl FnOnce(&mut Enrollment) -> OutreachResult<()>,
        build: impl FnOnce(&Enrollment) -> Enrollment,
    ) -> OutreachResult<(Enrollment, Enrollment)> {
        let snapshot = self.enrollment(old_id).ok_or_else(enrollment_not_found)?;
        let key = (snapshot.sequence_id, snapshot.contact_id.clone());

        let (retired, successor) = {
            let _sequence = self
                .sequences
                .get(&snapshot.sequence_id)
                .ok_or_else(sequence_not_found)?;
            let mut slot = self.pairs.entry(key).or_insert(*old_id);
            let retired = {
                let mut entry = self
                    .enrollments
                    .get_mut(old_id)
                    .ok_or_else(enrollment_not_found)?;
                let mut draft = entry.clone();
                retire(&mut draft)?;
                draft.version = entry.version + 1;
                *entry = draft.clone();
                draft
            };
            let successor = build(&retired);
            self.enrollments.insert(successor.id, successor.clone());
            *slot = successor.id;
            (retired, successor)
        };

        self.adjust_enrollment_count(&successor.sequence_id, 1);
        Ok((retired, successor))
    }

    /// Deletes an enrollment with its executions and decrements the counter.
    pub fn remove_enrollment(&self, id: &Uuid) -> OutreachResult<Enrollment> {
        let removed = self.purge_enrollment(id).ok_or_else(enrollment_not_found)?;
        self.adjust_enrollment_count(&removed.sequence_id, -1);
        Ok(removed)
    }

    fn purge_enrollment(&self, id: &Uuid) -> Option<Enrollment> {
        let (_, removed) = self.enrollments.remove(id)?;
        self.release_pair(&removed);
        self.executions.retain(|_, e| e.enrollment_id != *id);
        self.provider_index.retain(|_, execution_id| self.executions.contains_key(execution_id));
        Some(removed)
    }

    fn release_pair(&self, enrollment: &Enrollment) {
        self.pairs.remove_if(
            &(enrollment.sequence_id, enrollment.contact_id.clone()),
            |_, occupant| *occupant == enrollment.id,
        );
    }

    /// Active enrollments due at `now`, oldest first, at most `limit`.
    pub fn due_enrollments(&self, now: DateTime<Utc>, limit: usize) -> Vec<Enrollment> {
        let mut due: Vec<Enrollment> = self
            .enrollments
            .iter()
            .filter(|e| e.is_due(now))
            .map(|e| e.value().clone())
            .collect();
        due.sort_by(|a, b| a.next_step_at.cmp(&b.next_step_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        due
    }

    // ─── Executions ─────────────────────────────────────────────────────────

    pub fn append_execution(&self, execution: StepExecution) {
        if let Some(provider_id) = &execution.provider_message_id {
            self.provider_index.insert(provider_id.clone(), execution.id);
        }
        self.executions.insert(execution.id, execution);
    }

    pub fn execution(&self, id: &Uuid) -> Option<StepExecution> {
        self.executions.get(id).map(|r| r.clone())
    }

    pub fn execution_for_provider_message(&self, provider_message_id: &str) -> Option<Uuid> {
        self.provider_index.get(provider_message_id).map(|r| *r)
    }

    pub fn update_execution(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut StepExecution),
    ) -> OutreachResult<StepExecution> {
        let mut entry = self
            .executions
            .get_mut(id)
            .ok_or_else(|| OutreachError::not_found("Step execution not found"))?;
        f(entry.value_mut());
        Ok(entry.clone())
    }

    pub fn executions_for_enrollment(&self, enrollment_id: &Uuid) -> Vec<StepExecution> {
        let mut executions: Vec<StepExecution> = self
            .executions
            .iter()
            .filter(|e| e.enrollment_id == *enrollment_id)
            .map(|e| e.value().clone())
            .collect();
        executions.sort_by_key(|e| (e.executed_at, e.step_index));
        executions
    }

    pub fn executions_for_sequence(&self, sequence_id: &Uuid) -> Vec<StepExecution> {
        self.executions
            .iter()
            .filter(|e| e.sequence_id == *sequence_id)
            .map(|e| e.value().clone())
            .collect()
    }
}
