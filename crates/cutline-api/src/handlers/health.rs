//! Liveness and readiness probes.

use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness probe. Never touches a backing service.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub jobs: CheckStatus,
    pub queue: CheckStatus,
    pub storage: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
}

impl CheckStatus {
    fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok",
            error: None,
            latency_ms: Some(latency_ms),
            depth: None,
        }
    }

    fn skipped() -> Self {
        Self {
            status: "skipped",
            error: None,
            latency_ms: None,
            depth: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error",
            error: Some(msg.into()),
            latency_ms: None,
            depth: None,
        }
    }

    fn is_healthy(&self) -> bool {
        self.status != "error"
    }
}

async fn timed<T, E, F>(check: F) -> (CheckStatus, Option<T>)
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    match check.await {
        Ok(value) => (
            CheckStatus::ok(start.elapsed().as_millis() as u64),
            Some(value),
        ),
        Err(e) => (CheckStatus::error(e.to_string()), None),
    }
}

/// Readiness probe: job store, queue and object store must all answer.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let (jobs, _) = timed(state.jobs.ping()).await;

    let (mut queue, depth) = timed(state.queue.len()).await;
    queue.depth = depth;

    let storage = match &state.storage {
        Some(store) => timed(store.check_connectivity()).await.0,
        None => CheckStatus::skipped(),
    };

    let all_ok = jobs.is_healthy() && queue.is_healthy() && storage.is_healthy();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" },
        checks: ReadinessChecks {
            jobs,
            queue,
            storage,
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
