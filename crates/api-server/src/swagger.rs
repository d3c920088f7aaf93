//! OpenAPI specification and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Outreach Engine API",
        version = "0.1.0",
        description = "Multi-step outreach sequences.\n\nDefine email, SMS, call and task cadences, enroll contacts, run due steps and track engagement.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Operations", description = "Health, readiness, and liveness probes"),
        (name = "Sequences", description = "Sequence definitions and funnel statistics"),
        (name = "Enrollments", description = "Per-contact enrollment lifecycle"),
        (name = "Scheduler", description = "Due-step preview and batch processing"),
        (name = "Engagement", description = "Step outcome updates and provider tracking webhooks"),
    ),
    paths(
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
        // Sequences
        crate::sequence_rest::list_sequences,
        crate::sequence_rest::create_sequence,
        crate::sequence_rest::get_sequence,
        crate::sequence_rest::update_sequence,
        crate::sequence_rest::delete_sequence,
        crate::sequence_rest::duplicate_sequence,
        crate::sequence_rest::sequence_stats,
        // Enrollments
        crate::sequence_rest::list_enrollments,
        crate::sequence_rest::enroll_contact,
        crate::sequence_rest::bulk_enroll,
        crate::sequence_rest::get_enrollment,
        crate::sequence_rest::remove_enrollment,
        crate::sequence_rest::enrollment_executions,
        crate::sequence_rest::pause_enrollment,
        crate::sequence_rest::resume_enrollment,
        crate::sequence_rest::mark_replied,
        crate::sequence_rest::mark_bounced,
        crate::sequence_rest::mark_unsubscribed,
        crate::sequence_rest::cancel_enrollment,
        crate::sequence_rest::reschedule_enrollment,
        // Scheduler
        crate::sequence_rest::due_steps,
        crate::sequence_rest::process_due_steps,
        // Engagement
        crate::sequence_rest::update_execution_status,
        crate::sequence_rest::tracking_webhook,
    ),
    components(schemas(
        crate::rest::HealthResponse,
        crate::rest::ErrorResponse,
        crate::sequence_rest::EnrollRequest,
        crate::sequence_rest::BulkEnrollRequest,
        crate::sequence_rest::RescheduleRequest,
        crate::sequence_rest::ProcessRequest,
        crate::sequence_rest::ExecutionStatusRequest,
        crate::sequence_rest::TrackingResponse,
        outreach_core::types::Sequence,
        outreach_core::types::SequenceStep,
        outreach_core::types::StepType,
        outreach_core::types::StepDraft,
        outreach_core::types::NewSequence,
        outreach_core::types::SequenceUpdate,
        outreach_core::types::SequenceSummary,
        outreach_core::types::SequenceStats,
        outreach_core::types::StepFunnel,
        outreach_core::types::Enrollment,
        outreach_core::types::EnrollmentStatus,
        outreach_core::types::EnrollmentStats,
        outreach_core::types::BulkEnrollResult,
        outreach_core::types::StepExecution,
        outreach_core::types::ExecutionStatus,
        outreach_core::types::ExecutionStatusChange,
        outreach_core::types::DueStep,
        outreach_sequences::report::ProcessingReport,
        outreach_sequences::report::ItemReport,
        outreach_sequences::report::SkipReason,
        outreach_channels::tracking::TrackingCallback,
    ))
)]
pub struct ApiDoc;
