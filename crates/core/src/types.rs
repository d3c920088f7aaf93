use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// An outreach sequence: an ordered, delay-gated list of steps that contacts
/// are enrolled into.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<SequenceStep>,
    pub is_active: bool,
    /// Cached count of live enrollments. Recomputable from the enrollment set.
    pub enrollment_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sequence {
    pub fn step(&self, index: usize) -> Option<&SequenceStep> {
        self.steps.get(index)
    }
}

/// A single step within a sequence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SequenceStep {
    pub id: Uuid,
    pub delay_days: u32,
    pub delay_hours: u32,
    #[schema(value_type = Object)]
    pub action: StepAction,
}

impl SequenceStep {
    /// Time that must elapse before this step becomes due.
    pub fn delay(&self) -> Duration {
        Duration::days(i64::from(self.delay_days)) + Duration::hours(i64::from(self.delay_hours))
    }

    /// When this step becomes due if its delay starts at `from`. `None` when
    /// the result is past the representable range.
    pub fn due_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        from.checked_add_signed(self.delay())
    }

    pub fn step_type(&self) -> StepType {
        self.action.step_type()
    }
}

/// Type-specific step payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StepAction {
    Email {
        subject: String,
        content: String,
    },
    Sms {
        content: String,
    },
    Call {
        subject: String,
        #[serde(default)]
        notes: Option<String>,
    },
    Task {
        description: String,
    },
    Wait,
}

impl StepAction {
    pub fn step_type(&self) -> StepType {
        match self {
            StepAction::Email { .. } => StepType::Email,
            StepAction::Sms { .. } => StepType::Sms,
            StepAction::Call { .. } => StepType::Call,
            StepAction::Task { .. } => StepType::Task,
            StepAction::Wait => StepType::Wait,
        }
    }
}

/// Discriminant of [`StepAction`], used for reporting and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Email,
    Sms,
    Call,
    Task,
    Wait,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Email => "email",
            StepType::Sms => "sms",
            StepType::Call => "call",
            StepType::Task => "task",
            StepType::Wait => "wait",
        }
    }
}

/// Step as submitted by a caller, before validation. Delays are signed so that
/// negative input reaches validation instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepDraft {
    #[serde(default)]
    pub delay_days: i64,
    #[serde(default)]
    pub delay_hours: i64,
    #[schema(value_type = Object)]
    pub action: StepAction,
}

/// Fields accepted when creating a sequence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewSequence {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDraft>,
    #[serde(default)]
    pub is_active: bool,
}

/// Partial update of a sequence. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SequenceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<StepDraft>>,
    pub is_active: Option<bool>,
}

/// One contact's run through one sequence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Enrollment {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub contact_id: String,
    pub current_step_index: usize,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    /// Present iff `status == Active`.
    pub next_step_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rescheduled_from: Option<Uuid>,
    /// Bumped on every mutation; used to detect concurrent writers.
    pub version: u64,
}

impl Enrollment {
    /// Active with a next run time at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EnrollmentStatus::Active && self.next_step_at.is_some_and(|at| at <= now)
    }
}

/// Lifecycle status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Replied,
    Bounced,
    Unsubscribed,
    Cancelled,
}

impl EnrollmentStatus {
    /// No further step progression happens from a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EnrollmentStatus::Active | EnrollmentStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Paused => "paused",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Replied => "replied",
            EnrollmentStatus::Bounced => "bounced",
            EnrollmentStatus::Unsubscribed => "unsubscribed",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

/// Append-only record of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepExecution {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub sequence_id: Uuid,
    pub step_index: usize,
    pub step_type: StepType,
    pub executed_at: DateTime<Utc>,
    /// Latest known outcome; the full trail lives in `status_history`.
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub provider_message_id: Option<String>,
    pub activity_id: Option<String>,
    pub status_history: Vec<ExecutionStatusChange>,
}

impl StepExecution {
    /// Highest engagement level this execution ever reached.
    pub fn peak_status(&self) -> ExecutionStatus {
        self.status_history
            .iter()
            .map(|c| c.status)
            .max_by_key(|s| s.engagement_rank())
            .unwrap_or(self.status)
    }

    /// Whether the initial attempt failed.
    pub fn initially_failed(&self) -> bool {
        self.status_history
            .first()
            .map(|c| c.status == ExecutionStatus::Failed)
            .unwrap_or(self.status == ExecutionStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecutionStatusChange {
    pub status: ExecutionStatus,
    pub at: DateTime<Utc>,
}

/// Outcome of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Sent,
    Failed,
    Opened,
    Clicked,
    Replied,
}

impl ExecutionStatus {
    /// Funnel ordering: failed < sent < opened < clicked < replied.
    pub fn engagement_rank(&self) -> u8 {
        match self {
            ExecutionStatus::Failed => 0,
            ExecutionStatus::Sent => 1,
            ExecutionStatus::Opened => 2,
            ExecutionStatus::Clicked => 3,
            ExecutionStatus::Replied => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Sent => "sent",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Opened => "opened",
            ExecutionStatus::Clicked => "clicked",
            ExecutionStatus::Replied => "replied",
        }
    }
}

/// Per-id outcome of a bulk enrollment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct BulkEnrollResult {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrollment_id: Option<Uuid>,
}

/// Enrollment counts per status for a sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct EnrollmentStats {
    pub total: u64,
    pub active: u64,
    pub paused: u64,
    pub completed: u64,
    pub replied: u64,
    pub bounced: u64,
    pub unsubscribed: u64,
    pub cancelled: u64,
}

impl EnrollmentStats {
    pub fn record(&mut self, status: EnrollmentStatus) {
        self.total += 1;
        match status {
            EnrollmentStatus::Active => self.active += 1,
            EnrollmentStatus::Paused => self.paused += 1,
            EnrollmentStatus::Completed => self.completed += 1,
            EnrollmentStatus::Replied => self.replied += 1,
            EnrollmentStatus::Bounced => self.bounced += 1,
            EnrollmentStatus::Unsubscribed => self.unsubscribed += 1,
            EnrollmentStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// A sequence together with its enrollment counts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SequenceSummary {
    #[serde(flatten)]
    pub sequence: Sequence,
    pub enrollment_stats: EnrollmentStats,
}

/// Funnel counts for one step of a sequence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepFunnel {
    pub step_index: usize,
    pub step_type: Option<StepType>,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub replied: u64,
    pub failed: u64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub reply_rate: f64,
    pub failure_rate: f64,
}

/// Aggregate statistics for a sequence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SequenceStats {
    pub sequence_id: Uuid,
    pub enrollments: EnrollmentStats,
    pub steps: Vec<StepFunnel>,
}

/// Read-only view of an enrollment whose next step is due.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DueStep {
    pub enrollment_id: Uuid,
    pub sequence_id: Uuid,
    pub contact_id: String,
    pub step_index: usize,
    pub step_type: Option<StepType>,
    pub next_step_at: DateTime<Utc>,
}

/// Tracking callback kinds reported by delivery providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEvent {
    Opened,
    Clicked,
    Replied,
    Bounced,
    Unsubscribed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_delay_combines_days_and_hours() {
        let step = SequenceStep {
            id: Uuid::new_v4(),
            delay_days: 2,
            delay_hours: 5,
            action: StepAction::Wait,
        };
        assert_eq!(step.delay(), Duration::hours(53));
        assert_eq!(step.step_type(), StepType::Wait);
    }

    #[test]
    fn test_due_after_overflow_is_none() {
        let now = Utc::now();
        let near = SequenceStep {
            id: Uuid::new_v4(),
            delay_days: 1,
            delay_hours: 0,
            action: StepAction::Wait,
        };
        assert_eq!(near.due_after(now), Some(now + Duration::days(1)));

        let far = SequenceStep {
            delay_days: 200_000_000,
            ..near
        };
        assert!(far.due_after(now).is_none());
    }

    #[test]
    fn test_step_action_tagged_serialization() {
        let action: StepAction =
            serde_json::from_str(r#"{"type":"email","subject":"Hi","content":"Hello"}"#).unwrap();
        assert_eq!(action.step_type(), StepType::Email);

        let wait: StepAction = serde_json::from_str(r#"{"type":"wait"}"#).unwrap();
        assert_eq!(wait, StepAction::Wait);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!EnrollmentStatus::Active.is_terminal());
        assert!(!EnrollmentStatus::Paused.is_terminal());
        assert!(EnrollmentStatus::Completed.is_terminal());
        assert!(EnrollmentStatus::Replied.is_terminal());
        assert!(EnrollmentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_peak_status_tracks_highest_engagement() {
        let now = Utc::now();
        let exec = StepExecution {
            id: Uuid::new_v4(),
            enrollment_id: Uuid::new_v4(),
            sequence_id: Uuid::new_v4(),
            step_index: 0,
            step_type: StepType::Email,
            executed_at: now,
            status: ExecutionStatus::Opened,
            error_message: None,
            provider_message_id: None,
            activity_id: None,
            status_history: vec![
                ExecutionStatusChange { status: ExecutionStatus::Sent, at: now },
                ExecutionStatusChange { status: ExecutionStatus::Clicked, at: now },
                ExecutionStatusChange { status: ExecutionStatus::Opened, at: now },
            ],
        };
        assert_eq!(exec.peak_status(), ExecutionStatus::Clicked);
        assert!(!exec.initially_failed());
    }
}
