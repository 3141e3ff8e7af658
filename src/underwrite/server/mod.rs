// SPDX-License-Identifier: MIT

//! HTTP driver for the underwriting pipeline
//!
//! Besides the JSON routes, step progress is served as server-sent events:
//! `POST /api/runs/stream` starts a run and streams it until it pauses or
//! ends, and `GET /api/runs/{id}/events` follows a run another call drives.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adk::error::UnderwriteError;
use crate::underwrite::engine::checkpoint::ThreadStatus;
use crate::underwrite::engine::error::{EngineError, ProtocolViolation};
use crate::underwrite::engine::graph::StepEvent;
use crate::underwrite::pipeline::{new_thread_id, progress, PipelineService};

type AppState = Arc<PipelineService>;

const STREAM_BUFFER: usize = 100;

pub fn router(service: Arc<PipelineService>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/runs", get(list_runs).post(create_run))
        .route("/api/runs/stream", post(stream_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/events", get(run_events))
        .route("/api/runs/{id}/input", post(provide_input))
        .route("/api/runs/{id}/result", get(get_result))
        .route("/api/runs/{id}/retry", post(retry_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

pub async fn serve(
    service: Arc<PipelineService>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(service);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// An [`UnderwriteError`] rendered as `{"error": ...}` with a matching status
struct ApiError(UnderwriteError);

impl From<UnderwriteError> for ApiError {
    fn from(err: UnderwriteError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            UnderwriteError::Engine(EngineError::Protocol(ProtocolViolation::InvalidStateTransition {
                status: ThreadStatus::Ready,
                ..
            })) => StatusCode::NOT_FOUND,
            UnderwriteError::Engine(EngineError::Protocol(_)) => StatusCode::CONFLICT,
            UnderwriteError::Engine(EngineError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct CreateRunRequest {
    document_paths: Vec<String>,
}

#[derive(Deserialize)]
struct InputRequest {
    input: String,
}

async fn list_runs(State(service): State<AppState>) -> Result<Json<Value>, ApiError> {
    let threads = service.list_threads().await?;
    Ok(Json(json!({ "runs": threads })))
}

async fn create_run(
    State(service): State<AppState>,
    Json(payload): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let status = service.start_run(payload.document_paths).await?;
    Ok((StatusCode::CREATED, Json(json!(status))))
}

async fn get_run(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let status = service.get_status(&id).await?;
    if status.status == ThreadStatus::Ready {
        let body = json!({ "error": format!("run '{}' not found", id) });
        return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
    }
    Ok(Json(json!(status)).into_response())
}

async fn provide_input(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<InputRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = service.provide_input(&id, &payload.input).await?;
    Ok(Json(json!(status)))
}

async fn get_result(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match service.get_result(&id).await? {
        Some(output) => Ok(Json(json!({ "thread_id": id, "output": output })).into_response()),
        None => {
            let status = service.get_status(&id).await?;
            let body = json!({
                "thread_id": id,
                "status": status.status,
                "error": status.error,
            });
            Ok((StatusCode::CONFLICT, Json(body)).into_response())
        }
    }
}

async fn retry_run(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = service.retry(&id).await?;
    Ok(Json(json!(status)))
}

fn sse_event(kind: &str, data: &impl Serialize) -> Event {
    match Event::default().event(kind).json_data(data) {
        Ok(event) => event,
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

/// A step event plus its human-readable status line
fn step_event(event: &StepEvent) -> Event {
    let mut body = json!(event);
    body["message"] = json!(progress::describe(event));
    sse_event("step", &body)
}

fn sse(rx: mpsc::Receiver<Event>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(1)))
}

async fn stream_run(
    State(service): State<AppState>,
    Json(payload): Json<CreateRunRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let thread_id = new_thread_id();
    let mut events = service.engine().subscribe();

    tokio::spawn(async move {
        log::info!("Streaming run {}", thread_id);
        let forward = tx.clone();
        let call = service.start_run_as(&thread_id, payload.document_paths);
        let result = progress::follow(&mut events, &thread_id, call, |event| {
            let _ = forward.try_send(step_event(&event));
        })
        .await;

        let last = match result {
            Ok(status) => sse_event("status", &status),
            Err(e) => {
                log::error!("Streaming run {} failed: {}", thread_id, e);
                sse_event("error", &json!({ "thread_id": thread_id, "error": e.to_string() }))
            }
        };
        let _ = tx.send(last).await;
    });

    sse(rx)
}

/// Current status, then step events until the run stops running
async fn run_events(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let mut events = service.engine().subscribe();
    let current = service.get_status(&id).await?;
    if current.status == ThreadStatus::Ready {
        let body = json!({ "error": format!("run '{}' not found", id) });
        return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
    }

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        let live = current.status == ThreadStatus::Running;
        if tx.send(sse_event("status", &current)).await.is_err() || !live {
            return;
        }
        loop {
            let received = tokio::select! {
                _ = tx.closed() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(event) if event.thread_id == id => {
                    let settled = event.status != ThreadStatus::Running;
                    if tx.send(step_event(&event)).await.is_err() || settled {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Event feed of run {} skipped {} event(s)", id, skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    Ok(sse(rx).into_response())
}
