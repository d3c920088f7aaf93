//! Sequence, enrollment, scheduler and tracking REST endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use outreach_channels::tracking::{normalize_event, TrackingCallback};
use outreach_core::error::OutreachError;
use outreach_core::types::{
    BulkEnrollResult, DueStep, Enrollment, ExecutionStatus, NewSequence, Sequence,
    SequenceStats, SequenceSummary, SequenceUpdate, StepExecution,
};
use outreach_sequences::ProcessingReport;

use crate::rest::{ApiResult, AppState, ErrorResponse};

// ─── Request / Response Types ───────────────────────────────────────────────

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListSequencesQuery {
    /// Only return sequences with `is_active = true`.
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DueStepsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnrollRequest {
    pub contact_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkEnrollRequest {
    pub contact_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RescheduleRequest {
    pub start_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ProcessRequest {
    #[serde(default)]
    pub batch_cap: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExecutionStatusRequest {
    pub status: ExecutionStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TrackingResponse {
    pub received: usize,
    pub applied: usize,
    pub ignored: usize,
    pub unknown: usize,
}

// ─── Sequences ──────────────────────────────────────────────────────────────

/// GET /v1/sequences: List sequences with enrollment counts.
#[utoipa::path(
    get,
    path = "/v1/sequences",
    tag = "Sequences",
    params(ListSequencesQuery),
    responses((status = 200, description = "Sequences ordered by creation time", body = Vec<SequenceSummary>))
)]
pub async fn list_sequences(
    State(state): State<AppState>,
    Query(query): Query<ListSequencesQuery>,
) -> Json<Vec<SequenceSummary>> {
    Json(state.engine.list_sequences(query.active_only))
}

/// POST /v1/sequences: Create a sequence.
#[utoipa::path(
    post,
    path = "/v1/sequences",
    tag = "Sequences",
    request_body = NewSequence,
    responses(
        (status = 201, description = "Sequence created", body = Sequence),
        (status = 400, description = "Invalid sequence", body = ErrorResponse),
    )
)]
pub async fn create_sequence(
    State(state): State<AppState>,
    Json(new): Json<NewSequence>,
) -> ApiResult<(StatusCode, Json<Sequence>)> {
    let sequence = state.engine.create_sequence(new)?;
    Ok((StatusCode::CREATED, Json(sequence)))
}

#[utoipa::path(
    get,
    path = "/v1/sequences/{id}",
    tag = "Sequences",
    params(("id" = Uuid, Path, description = "Sequence identifier")),
    responses(
        (status = 200, description = "Sequence found", body = Sequence),
        (status = 404, description = "Sequence not found", body = ErrorResponse),
    )
)]
pub async fn get_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Sequence>> {
    Ok(Json(state.engine.get_sequence(&id)?))
}

/// PATCH /v1/sequences/{id}: Merge the provided fields into a sequence.
#[utoipa::path(
    patch,
    path = "/v1/sequences/{id}",
    tag = "Sequences",
    params(("id" = Uuid, Path, description = "Sequence identifier")),
    request_body = SequenceUpdate,
    responses(
        (status = 200, description = "Sequence updated", body = Sequence),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 404, description = "Sequence not found", body = ErrorResponse),
    )
)]
pub async fn update_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<SequenceUpdate>,
) -> ApiResult<Json<Sequence>> {
    Ok(Json(state.engine.update_sequence(&id, update)?))
}

/// DELETE /v1/sequences/{id}: Delete a sequence and its enrollments.
#[utoipa::path(
    delete,
    path = "/v1/sequences/{id}",
    tag = "Sequences",
    params(("id" = Uuid, Path, description = "Sequence identifier")),
    responses(
        (status = 204, description = "Sequence deleted"),
        (status = 404, description = "Sequence not found", body = ErrorResponse),
        (status = 409, description = "Sequence has active enrollments", body = ErrorResponse),
    )
)]
pub async fn delete_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.delete_sequence(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/sequences/{id}/duplicate",
    tag = "Sequences",
    params(("id" = Uuid, Path, description = "Sequence identifier")),
    responses(
        (status = 201, description = "Inactive copy created", body = Sequence),
        (status = 404, description = "Sequence not found", body = ErrorResponse),
    )
)]
pub async fn duplicate_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Sequence>)> {
    let copy = state.engine.duplicate_sequence(&id)?;
    Ok((StatusCode::CREATED, Json(copy)))
}

/// GET /v1/sequences/{id}/stats: Enrollment counts and per-step funnel.
#[utoipa::path(
    get,
    path = "/v1/sequences/{id}/stats",
    tag = "Sequences",
    params(("id" = Uuid, Path, description = "Sequence identifier")),
    responses(
        (status = 200, description = "Sequence statistics", body = SequenceStats),
        (status = 404, description = "Sequence not found", body = ErrorResponse),
    )
)]
pub async fn sequence_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SequenceStats>> {
    Ok(Json(state.engine.get_sequence_stats(&id)?))
}

// ─── Enrollments ────────────────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/v1/sequences/{id}/enrollments",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Sequence identifier")),
    responses(
        (status = 200, description = "Enrollments of the sequence", body = Vec<Enrollment>),
        (status = 404, description = "Sequence not found", body = ErrorResponse),
    )
)]
pub async fn list_enrollments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Enrollment>>> {
    Ok(Json(state.engine.list_enrollments(&id)?))
}

/// POST /v1/sequences/{id}/enrollments: Enroll one contact.
#[utoipa::path(
    post,
    path = "/v1/sequences/{id}/enrollments",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Sequence identifier")),
    request_body = EnrollRequest,
    responses(
        (status = 201, description = "Contact enrolled", body = Enrollment),
        (status = 404, description = "Sequence or contact not found", body = ErrorResponse),
        (status = 409, description = "Contact already enrolled or sequence inactive", body = ErrorResponse),
    )
)]
pub async fn enroll_contact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<(StatusCode, Json<Enrollment>)> {
    let enrollment = state.engine.enroll_contact(&id, &request.contact_id).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// POST /v1/sequences/{id}/enrollments/bulk: Enroll many contacts, reporting per id.
#[utoipa::path(
    post,
    path = "/v1/sequences/{id}/enrollments/bulk",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Sequence identifier")),
    request_body = BulkEnrollRequest,
    responses((status = 200, description = "Per-contact results", body = Vec<BulkEnrollResult>))
)]
pub async fn bulk_enroll(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<BulkEnrollRequest>,
) -> Json<Vec<BulkEnrollResult>> {
    let results = state.engine.bulk_enroll(&id, &request.contact_ids).await;
    let enrolled = results.iter().filter(|r| r.success).count();
    info!(
        sequence_id = %id,
        requested = results.len(),
        enrolled,
        "Bulk enrollment finished"
    );
    Json(results)
}

#[utoipa::path(
    get,
    path = "/v1/enrollments/{id}",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Enrollment found", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
    )
)]
pub async fn get_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(state.engine.get_enrollment(&id)?))
}

/// DELETE /v1/enrollments/{id}: Remove an enrollment and its execution history.
#[utoipa::path(
    delete,
    path = "/v1/enrollments/{id}",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Removed enrollment", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
    )
)]
pub async fn remove_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(state.engine.remove_from_sequence(&id)?))
}

#[utoipa::path(
    get,
    path = "/v1/enrollments/{id}/executions",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Step executions in execution order", body = Vec<StepExecution>),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
    )
)]
pub async fn enrollment_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<StepExecution>>> {
    Ok(Json(state.engine.get_executions(&id)?))
}

#[utoipa::path(
    post,
    path = "/v1/enrollments/{id}/pause",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Enrollment paused", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 422, description = "Enrollment is not active", body = ErrorResponse),
    )
)]
pub async fn pause_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(state.engine.pause_enrollment(&id)?))
}

#[utoipa::path(
    post,
    path = "/v1/enrollments/{id}/resume",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Enrollment resumed", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 422, description = "Enrollment is not paused", body = ErrorResponse),
    )
)]
pub async fn resume_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(state.engine.resume_enrollment(&id)?))
}

#[utoipa::path(
    post,
    path = "/v1/enrollments/{id}/replied",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Enrollment marked replied", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 422, description = "Enrollment already finished", body = ErrorResponse),
    )
)]
pub async fn mark_replied(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(state.engine.mark_as_replied(&id)?))
}

#[utoipa::path(
    post,
    path = "/v1/enrollments/{id}/bounced",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Enrollment marked bounced", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 422, description = "Enrollment already finished", body = ErrorResponse),
    )
)]
pub async fn mark_bounced(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(state.engine.mark_as_bounced(&id)?))
}

#[utoipa::path(
    post,
    path = "/v1/enrollments/{id}/unsubscribed",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Enrollment marked unsubscribed", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 422, description = "Enrollment already finished", body = ErrorResponse),
    )
)]
pub async fn mark_unsubscribed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(state.engine.mark_as_unsubscribed(&id)?))
}

#[utoipa::path(
    post,
    path = "/v1/enrollments/{id}/cancel",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    responses(
        (status = 200, description = "Enrollment cancelled", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 422, description = "Enrollment already finished", body = ErrorResponse),
    )
)]
pub async fn cancel_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(state.engine.cancel_enrollment(&id)?))
}

/// POST /v1/enrollments/{id}/reschedule: Cancel and re-enroll starting at `start_at`.
#[utoipa::path(
    post,
    path = "/v1/enrollments/{id}/reschedule",
    tag = "Enrollments",
    params(("id" = Uuid, Path, description = "Enrollment identifier")),
    request_body = RescheduleRequest,
    responses(
        (status = 201, description = "Successor enrollment", body = Enrollment),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 422, description = "Enrollment already finished", body = ErrorResponse),
    )
)]
pub async fn reschedule_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RescheduleRequest>,
) -> ApiResult<(StatusCode, Json<Enrollment>)> {
    let successor = state.engine.reschedule_enrollment(&id, request.start_at)?;
    Ok((StatusCode::CREATED, Json(successor)))
}

// ─── Scheduler ──────────────────────────────────────────────────────────────

/// GET /v1/scheduler/due: Preview enrollments whose next step is due.
#[utoipa::path(
    get,
    path = "/v1/scheduler/due",
    tag = "Scheduler",
    params(DueStepsQuery),
    responses((status = 200, description = "Due steps, earliest first", body = Vec<DueStep>))
)]
pub async fn due_steps(
    State(state): State<AppState>,
    Query(query): Query<DueStepsQuery>,
) -> Json<Vec<DueStep>> {
    Json(state.engine.get_due_steps(query.limit))
}

/// POST /v1/scheduler/process: Run one due-step batch now.
#[utoipa::path(
    post,
    path = "/v1/scheduler/process",
    tag = "Scheduler",
    request_body = ProcessRequest,
    responses((status = 200, description = "Batch report", body = ProcessingReport))
)]
pub async fn process_due_steps(
    State(state): State<AppState>,
    request: Option<Json<ProcessRequest>>,
) -> Json<ProcessingReport> {
    let batch_cap = request.and_then(|Json(r)| r.batch_cap);
    let report = state
        .engine
        .process_due_steps(state.engine.now(), batch_cap)
        .await;
    Json(report)
}

// ─── Engagement ─────────────────────────────────────────────────────────────

/// PATCH /v1/executions/{id}/status: Record a new outcome for a step execution.
#[utoipa::path(
    patch,
    path = "/v1/executions/{id}/status",
    tag = "Engagement",
    params(("id" = Uuid, Path, description = "Step execution identifier")),
    request_body = ExecutionStatusRequest,
    responses(
        (status = 200, description = "Execution updated", body = StepExecution),
        (status = 404, description = "Execution not found", body = ErrorResponse),
    )
)]
pub async fn update_execution_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ExecutionStatusRequest>,
) -> ApiResult<Json<StepExecution>> {
    Ok(Json(
        state
            .engine
            .update_step_execution_status(&id, request.status)?,
    ))
}

/// POST /v1/webhooks/tracking: Provider open/click/bounce/reply receiver.
#[utoipa::path(
    post,
    path = "/v1/webhooks/tracking",
    tag = "Engagement",
    request_body = Vec<TrackingCallback>,
    responses((status = 200, description = "Callbacks processed", body = TrackingResponse))
)]
pub async fn tracking_webhook(
    State(state): State<AppState>,
    Json(callbacks): Json<Vec<TrackingCallback>>,
) -> Json<TrackingResponse> {
    let mut response = TrackingResponse {
        received: callbacks.len(),
        applied: 0,
        ignored: 0,
        unknown: 0,
    };

    for callback in &callbacks {
        if let Some(channels) = &state.channels {
            channels.apply_delivery_status(&callback.provider_message_id, &callback.event);
        }

        let Some(event) = normalize_event(&callback.event) else {
            response.ignored += 1;
            continue;
        };
        match state
            .engine
            .record_provider_event(&callback.provider_message_id, event)
        {
            Ok(execution) => {
                debug!(
                    execution_id = %execution.id,
                    status = execution.status.as_str(),
                    "Tracking event applied"
                );
                response.applied += 1;
            }
            Err(OutreachError::NotFound(_)) => response.unknown += 1,
            Err(e) => {
                warn!(
                    provider_message_id = %callback.provider_message_id,
                    error = %e,
                    "Tracking event rejected"
                );
                response.ignored += 1;
            }
        }
    }

    metrics::counter!("webhooks.tracking.received").increment(callbacks.len() as u64);
    Json(response)
}
