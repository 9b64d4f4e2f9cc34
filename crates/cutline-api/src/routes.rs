//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{cancel_render, get_render, health, ready, submit_render};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let render_routes = Router::new()
        .route("/renders", post(submit_render))
        .route("/renders/:job_id", get(get_render).delete(cancel_render));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", render_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_logging))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        let state = AppState::in_memory(ApiConfig::default());
        (create_router(state.clone(), None), state)
    }

    fn timeline(clip_duration: f64) -> Value {
        json!({
            "duration": 10.0,
            "tracks": [{
                "id": "v1",
                "kind": "video",
                "clips": [{
                    "id": "intro",
                    "kind": "video",
                    "source": "uploads/intro.mp4",
                    "startTime": 0.0,
                    "duration": clip_duration
                }]
            }]
        })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_submit_then_status() {
        let (app, _) = app();
        let (status, body) = send(&app, Method::POST, "/api/renders", Some(timeline(4.0))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        let job_id = body["jobId"].as_str().unwrap().to_string();

        let (status, body) = send(&app, Method::GET, &format!("/api/renders/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobId"], job_id.as_str());
        assert_eq!(body["queuePosition"], 0);
        assert_eq!(body["progress"], 0);
    }

    #[tokio::test]
    async fn test_invalid_clip_is_rejected_with_clip_id() {
        let (app, state) = app();
        let (status, body) = send(&app, Method::POST, "/api/renders", Some(timeline(0.0))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["clipId"], "intro");
        assert_eq!(state.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (app, _) = app();
        let (status, body) = send(&app, Method::POST, "/api/renders", Some(json!({"tracks": 3}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (app, _) = app();
        let (status, _) = send(&app, Method::GET, "/api/renders/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::DELETE, "/api/renders/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_pending_then_conflict() {
        let (app, state) = app();
        let (_, body) = send(&app, Method::POST, "/api/renders", Some(timeline(4.0))).await;
        let uri = format!("/api/renders/{}", body["jobId"].as_str().unwrap());

        let (status, body) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"], cutline_models::CANCELLED_REASON);
        assert_eq!(state.queue.len().await.unwrap(), 0);

        let (status, body) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let (app, _) = app();
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["storage"]["status"], "skipped");
        assert_eq!(body["checks"]["queue"]["depth"], 0);
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "req-42");
    }
}
