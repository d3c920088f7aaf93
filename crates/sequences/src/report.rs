//! Per-batch processing report returned by the due-step scanner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use outreach_core::types::{ExecutionStatus, StepType};

/// Why a due item was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No longer active or no longer due when re-checked.
    NotDue,
    /// Removed between snapshot and execution or commit.
    Vanished,
    SequenceMissing,
    StepMissing,
    /// Claimed by an overlapping scan.
    InFlight,
    /// Changed by another writer while the step was being executed.
    Superseded,
    /// The item's task panicked or was cancelled.
    Aborted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotDue => "not_due",
            SkipReason::Vanished => "vanished",
            SkipReason::SequenceMissing => "sequence_missing",
            SkipReason::StepMissing => "step_missing",
            SkipReason::InFlight => "in_flight",
            SkipReason::Superseded => "superseded",
            SkipReason::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ItemOutcome {
    Executed {
        /// `None` when a stepless sequence completed without running anything.
        step_index: Option<usize>,
        step_type: Option<StepType>,
        execution_status: Option<ExecutionStatus>,
        completed: bool,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ItemReport {
    pub enrollment_id: Uuid,
    #[schema(value_type = Object)]
    pub outcome: ItemOutcome,
    /// Free-form context, e.g. the dispatch error of a failed step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemReport {
    pub fn skipped(enrollment_id: Uuid, reason: SkipReason) -> Self {
        Self {
            enrollment_id,
            outcome: ItemOutcome::Skipped { reason },
            detail: None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.outcome {
            ItemOutcome::Skipped { reason } => Some(reason),
            ItemOutcome::Executed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessingReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Due items captured in the snapshot.
    pub scanned: usize,
    pub processed_count: usize,
    pub skipped_count: usize,
    /// Executed items whose step recorded `failed`.
    pub failed_dispatch_count: usize,
    pub items: Vec<ItemReport>,
}

impl ProcessingReport {
    pub fn from_items(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        items: Vec<ItemReport>,
    ) -> Self {
        let mut processed_count = 0;
        let mut skipped_count = 0;
        let mut failed_dispatch_count = 0;
        for item in &items {
            match &item.outcome {
                ItemOutcome::Executed {
                    execution_status, ..
                } => {
                    processed_count += 1;
                    if *execution_status == Some(ExecutionStatus::Failed) {
                        failed_dispatch_count += 1;
                    }
                }
                ItemOutcome::Skipped { .. } => skipped_count += 1,
            }
        }

        Self {
            started_at,
            finished_at,
            scanned: items.len(),
            processed_count,
            skipped_count,
            failed_dispatch_count,
            items,
        }
    }

    pub fn item(&self, enrollment_id: &Uuid) -> Option<&ItemReport> {
        self.items.iter().find(|i| i.enrollment_id == *enrollment_id)
    }
}
