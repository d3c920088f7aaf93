use serde::{Deserialize, Serialize};

use outreach_core::error::{OutreachError, OutreachResult};
use outreach_core::types::EnrollmentStatus;

/// Describes a single valid state transition for an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
    pub trigger: String,
}

/// Guards the enrollment lifecycle by enforcing a finite set of valid
/// status transitions. Step advancement keeps an enrollment `Active` and is
/// not a transition.
#[derive(Debug, Clone)]
pub struct EnrollmentStateMachine {
    pub transitions: Vec<StateTransition>,
}

impl EnrollmentStateMachine {
    /// Creates a state machine with all valid transitions pre-configured.
    pub fn new() -> Self {
        use EnrollmentStatus::*;

        let edges = [
            // Active ->
            (Active, Paused, "pause"),
            (Active, Completed, "last_step_executed"),
            (Active, Replied, "reply_received"),
            (Active, Bounced, "bounce_received"),
            (Active, Unsubscribed, "unsubscribe_received"),
            (Active, Cancelled, "cancel"),
            // Paused ->
            (Paused, Active, "resume"),
            (Paused, Replied, "reply_received"),
            (Paused, Bounced, "bounce_received"),
            (Paused, Unsubscribed, "unsubscribe_received"),
            (Paused, Cancelled, "cancel"),
        ];

        let transitions = edges
            .into_iter()
            .map(|(from, to, trigger)| StateTransition {
                from,
                to,
                trigger: trigger.to_string(),
            })
            .collect();

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: &EnrollmentStatus, to: &EnrollmentStatus) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.to == *to)
    }

    /// Returns `InvalidState` if moving from `from` to `to` is not permitted.
    pub fn check(&self, from: EnrollmentStatus, to: EnrollmentStatus) -> OutreachResult<()> {
        if self.can_transition(&from, &to) {
            Ok(())
        } else {
            Err(OutreachError::invalid_state(format!(
                "Cannot move enrollment from {} to {}",
                from.as_str(),
                to.as_str()
            )))
        }
    }
}

impl Default for EnrollmentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
