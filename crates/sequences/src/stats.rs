use outreach_core::types::{
    Enrollment, EnrollmentStats, ExecutionStatus, Sequence, SequenceStats, StepExecution, StepFunnel,
};

pub fn enrollment_stats(enrollments: &[Enrollment]) -> EnrollmentStats {
    let mut stats = EnrollmentStats::default();
    for enrollment in enrollments {
        stats.record(enrollment.status);
    }
    stats
}

/// Enrollment counts plus a per-step funnel. Executions count at the highest
/// engagement they reached; steps removed by an edit still appear while they
/// have history.
pub fn sequence_stats(
    sequence: &Sequence,
    enrollments: &[Enrollment],
    executions: &[StepExecution],
) -> SequenceStats {
    let step_count = executions
        .iter()
        .map(|e| e.step_index + 1)
        .max()
        .unwrap_or(0)
        .max(sequence.steps.len());

    let mut steps: Vec<StepFunnel> = (0..step_count)
        .map(|index| StepFunnel {
            step_index: index,
            step_type: sequence.step(index).map(|s| s.step_type()),
            sent: 0,
            opened: 0,
            clicked: 0,
            replied: 0,
            failed: 0,
            open_rate: 0.0,
            click_rate: 0.0,
            reply_rate: 0.0,
            failure_rate: 0.0,
        })
        .collect();

    for execution in executions {
        let funnel = &mut steps[execution.step_index];
        if funnel.step_type.is_none() {
            funnel.step_type = Some(execution.step_type);
        }
        if execution.initially_failed() {
            funnel.failed += 1;
            continue;
        }
        // Each level implies the ones below it.
        let rank = execution.peak_status().engagement_rank();
        funnel.sent += 1;
        if rank >= ExecutionStatus::Opened.engagement_rank() {
            funnel.opened += 1;
        }
        if rank >= ExecutionStatus::Clicked.engagement_rank() {
            funnel.clicked += 1;
        }
        if rank >= ExecutionStatus::Replied.engagement_rank() {
            funnel.replied += 1;
        }
    }

    for funnel in &mut steps {
        funnel.open_rate = rate(funnel.opened, funnel.sent);
        funnel.click_rate = rate(funnel.clicked, funnel.sent);
        funnel.reply_rate = rate(funnel.replied, funnel.sent);
        funnel.failure_rate = rate(funnel.failed, funnel.sent + funnel.failed);
    }

    SequenceStats {
        sequence_id: sequence.id,
        enrollments: enrollment_stats(enrollments),
        steps,
    }
}

fn rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outreach_core::types::{
        EnrollmentStatus, ExecutionStatusChange, SequenceStep, StepAction, StepType,
    };
    use uuid::Uuid;

    fn execution(step_index: usize, trail: &[ExecutionStatus]) -> StepExecution {
        let now = Utc::now();
        StepExecution {
            id: Uuid::new_v4(),
            enrollment_id: Uuid::new_v4(),
            sequence_id: Uuid::nil(),
            step_index,
            step_type: StepType::Email,
            executed_at: now,
            status: *trail.last().unwrap(),
            error_message: None,
            provider_message_id: None,
            activity_id: None,
            status_history: trail
                .iter()
                .map(|status| ExecutionStatusChange { status: *status, at: now })
                .collect(),
        }
    }

    fn enrollment(status: EnrollmentStatus) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: Uuid::new_v4(),
            sequence_id: Uuid::nil(),
            contact_id: "c".to_string(),
            current_step_index: 0,
            status,
            enrolled_at: now,
            next_step_at: None,
            paused_at: None,
            completed_at: None,
            rescheduled_from: None,
            version: 0,
        }
    }

    fn sequence() -> Sequence {
        let now = Utc::now();
        Sequence {
            id: Uuid::nil(),
            name: "Stats".to_string(),
            description: None,
            steps: vec![SequenceStep {
                id: Uuid::new_v4(),
                delay_days: 0,
                delay_hours: 0,
                action: StepAction::Email {
                    subject: "s".to_string(),
                    content: "c".to_string(),
                },
            }],
            is_active: true,
            enrollment_count: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_enrollment_stats() {
        let stats = enrollment_stats(&[
            enrollment(EnrollmentStatus::Active),
            enrollment(EnrollmentStatus::Replied),
            enrollment(EnrollmentStatus::Replied),
        ]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.replied, 2);
    }

    #[test]
    fn test_funnel_counts_peak_engagement() {
        use ExecutionStatus::*;
        let executions = vec![
            execution(0, &[Sent]),
            execution(0, &[Sent, Clicked, Opened]),
            execution(0, &[Sent, Opened, Clicked, Replied]),
            execution(0, &[Failed]),
        ];
        let stats = sequence_stats(&sequence(), &[], &executions);
        let step = &stats.steps[0];

        assert_eq!(step.sent, 3);
        assert_eq!(step.opened, 2);
        assert_eq!(step.clicked, 2);
        assert_eq!(step.replied, 1);
        assert_eq!(step.failed, 1);
        assert!((step.open_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((step.failure_rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_funnel_keeps_history_of_removed_steps() {
        let stats = sequence_stats(&sequence(), &[], &[execution(2, &[ExecutionStatus::Sent])]);
        assert_eq!(stats.steps.len(), 3);
        assert_eq!(stats.steps[1].sent, 0);
        assert_eq!(stats.steps[1].open_rate, 0.0);
        assert_eq!(stats.steps[2].step_type, Some(StepType::Email));
    }
}
