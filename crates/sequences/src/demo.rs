use tracing::info;

use outreach_core::collaborators::Contact;
use outreach_core::error::OutreachResult;
use outreach_core::types::{NewSequence, Sequence, StepAction, StepDraft};

use crate::engine::SequenceEngine;

fn draft(delay_days: i64, delay_hours: i64, action: StepAction) -> StepDraft {
    StepDraft {
        delay_days,
        delay_hours,
        action,
    }
}

/// Contacts referenced by the demo data.
pub fn demo_contacts() -> Vec<Contact> {
    [
        ("contact-ada", "Ada Lovelace", "ada@example.com", "+15550100001"),
        ("contact-alan", "Alan Turing", "alan@example.com", "+15550100002"),
        ("contact-grace", "Grace Hopper", "grace@example.com", "+15550100003"),
    ]
    .into_iter()
    .map(|(id, name, email, phone)| Contact {
        id: id.to_string(),
        name: Some(name.to_string()),
        email: Some(email.to_string()),
        phone: Some(phone.to_string()),
    })
    .collect()
}

/// Seeds three demo sequences for development and testing.
pub fn seed_demo_sequences(engine: &SequenceEngine) -> OutreachResult<Vec<Sequence>> {
    info!("Seeding demo sequences");

    // ---- 1. Cold outreach (email, wait, email, call) ----
    let cold = engine.create_sequence(NewSequence {
        name: "Cold Outreach".to_string(),
        description: Some("Three-touch prospecting sequence".to_string()),
        steps: vec![
            draft(
                0,
                1,
                StepAction::Email {
                    subject: "Quick question".to_string(),
                    content: "Hi, do you have 15 minutes this week?".to_string(),
                },
            ),
            draft(2, 0, StepAction::Wait),
            draft(
                0,
                0,
                StepAction::Email {
                    subject: "Following up".to_string(),
                    content: "Bumping this to the top of your inbox.".to_string(),
                },
            ),
            draft(
                3,
                0,
                StepAction::Call {
                    subject: "Intro call".to_string(),
                    notes: Some("Reference both emails".to_string()),
                },
            ),
        ],
        is_active: true,
    })?;

    // ---- 2. Event reminder (sms) ----
    let reminder = engine.create_sequence(NewSequence {
        name: "Webinar Reminder".to_string(),
        description: Some("SMS nudges before a webinar".to_string()),
        steps: vec![
            draft(
                0,
                0,
                StepAction::Sms {
                    content: "You're registered! See you Thursday.".to_string(),
                },
            ),
            draft(
                2,
                12,
                StepAction::Sms {
                    content: "Starting in one hour.".to_string(),
                },
            ),
        ],
        is_active: true,
    })?;

    // ---- 3. Renewal (draft, inactive) ----
    let renewal = engine.create_sequence(NewSequence {
        name: "Renewal Check-in".to_string(),
        description: None,
        steps: vec![
            draft(
                0,
                0,
                StepAction::Task {
                    description: "Review account health before renewal".to_string(),
                },
            ),
            draft(
                1,
                0,
                StepAction::Email {
                    subject: "Your renewal".to_string(),
                    content: "Let's find a time to talk about next year.".to_string(),
                },
            ),
        ],
        is_active: false,
    })?;

    info!("Seeded 3 demo sequences");
    Ok(vec![cold, reminder, renewal])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::memory::{CaptureDispatcher, InMemoryActivityStore, InMemoryContactStore};

    #[test]
    fn test_seed_demo_sequences() {
        let engine = SequenceEngine::builder(
            Arc::new(InMemoryContactStore::new()),
            Arc::new(InMemoryActivityStore::new()),
            Arc::new(CaptureDispatcher::new()),
        )
        .build();

        let seeded = seed_demo_sequences(&engine).unwrap();
        assert_eq!(seeded.len(), 3);
        assert_eq!(engine.list_sequences(false).len(), 3);
        assert_eq!(engine.list_sequences(true).len(), 2);
        assert_eq!(demo_contacts().len(), 3);
    }
}
