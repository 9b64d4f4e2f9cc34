//! Render job handlers: submit, status, cancel.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use cutline_models::{JobId, JobStatusReport, TimelineDocument};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Submit a timeline document for rendering.
///
/// The document is validated before anything is enqueued; a malformed clip is
/// rejected with its id in the response.
pub async fn submit_render(
    State(state): State<AppState>,
    payload: Result<Json<TimelineDocument>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobStatusReport>)> {
    let Json(document) = payload?;

    let report = state.submitter.submit(document).await.inspect_err(|e| {
        if matches!(e, cutline_queue::QueueError::Validation(_)) {
            metrics::record_submission_rejected();
        }
    })?;

    metrics::record_job_submitted();
    info!(job_id = %report.job_id, "Render submitted");
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// Current status of a render job.
pub async fn get_render(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusReport>> {
    let id = parse_job_id(job_id)?;
    Ok(Json(state.submitter.status(&id).await?))
}

/// Cancel a pending render job.
pub async fn cancel_render(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusReport>> {
    let id = parse_job_id(job_id)?;
    let report = state.submitter.cancel(&id).await?;
    metrics::record_job_cancelled();
    Ok(Json(report))
}

fn parse_job_id(raw: String) -> ApiResult<JobId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 128 || trimmed.contains(':') {
        return Err(ApiError::bad_request("invalid job id"));
    }
    Ok(JobId::from_string(trimmed))
}
