//! Outreach sequences: timed multi-step email, SMS, call and task cadences
//! with per-contact enrollments, a due-step scanner and engagement tracking.

pub mod demo;
pub mod engine;
pub mod executor;
pub mod lifecycle;
pub mod memory;
pub mod recorder;
pub mod report;
pub mod repository;
pub mod scheduler;
pub mod state_machine;
pub mod stats;
pub mod store;

pub use engine::{EngineSettings, SequenceEngine, SequenceEngineBuilder};
pub use report::{ItemOutcome, ItemReport, ProcessingReport, SkipReason};
