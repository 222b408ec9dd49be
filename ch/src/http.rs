//! HTTP front for submission and polling

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use eyre::{Context, Result};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::daemon::VERSION;
use crate::jobs::{GatewayError, JobRequest, StatusView, SubmissionAck};
use crate::service::ChorusService;

/// Submission failure mapped onto an HTTP status
pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::DuplicateInFlight { .. } => StatusCode::CONFLICT,
            GatewayError::Store(_) | GatewayError::Queue(_) => {
                error!(error = %self.0, "Submission failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(service: Arc<ChorusService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/:session/:turn", get(job_status))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": VERSION }))
}

/// POST /api/jobs
async fn submit_job(
    State(service): State<Arc<ChorusService>>,
    Json(request): Json<JobRequest>,
) -> Result<(StatusCode, Json<SubmissionAck>), ApiError> {
    debug!(perspectives = request.perspectives, "submit_job: called");
    let ack = service.submit(request)?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

/// GET /api/jobs/:session/:turn
async fn job_status(
    State(service): State<Arc<ChorusService>>,
    Path((session, turn)): Path<(String, u32)>,
) -> Json<StatusView> {
    Json(service.status(&session, turn))
}

/// Serve until `shutdown` resolves
pub async fn serve(listen: &str, service: Arc<ChorusService>, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", listen))?;
    info!(%listen, "HTTP server listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::jobs::MemoryRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(temp: &TempDir) -> Router {
        let mut config = Config::default();
        config.storage.data_dir = temp.path().to_path_buf();
        let service = ChorusService::with_registry(Arc::new(config), Arc::new(MemoryRegistry::new())).unwrap();
        router(Arc::new(service))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_job(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_submit_is_accepted_then_duplicate_conflicts() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);

        let response = app
            .clone()
            .oneshot(post_job(json!({"prompt": "Why?", "perspectives": 2})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let ack = body_json(response).await;
        assert_eq!(ack["status"], "accepted");
        assert_eq!(ack["turnNumber"], 1);
        let session = ack["sessionName"].as_str().unwrap().to_string();
        assert!(ack["checkUrl"].as_str().unwrap().ends_with(&format!("/api/jobs/{}/1", session)));

        let response = app
            .oneshot(post_job(json!({"prompt": "Again", "sessionName": session})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_invalid_submission_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(post_job(json!({"prompt": "", "perspectives": 2})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("prompt"));
    }

    #[tokio::test]
    async fn test_status_of_unknown_session_is_running() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(Request::builder().uri("/api/jobs/quiet-harbor/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "running", "completedTurns": 0})
        );
    }
}
