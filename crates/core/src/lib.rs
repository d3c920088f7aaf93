//! Shared domain model for the outreach sequence engine: sequences, steps,
//! enrollments, step executions, the error taxonomy, configuration, and the
//! collaborator interfaces the engine consumes.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{DispatchError, OutreachError, OutreachResult};
