//! JSON routes over a [`Rescribe`].
//!
//! | Method | Path | Response |
//! | --- | --- | --- |
//! | `POST` | `/tasks` | `{task_id, status}` |
//! | `GET` | `/tasks` | a list of task statuses |
//! | `GET` | `/tasks/{task_id}` | `{task_id, status, success_count, failed_count, processed, total}` |
//! | `POST` | `/tasks/{task_id}/cancel` | `{message}` |
//!
//! Failures are returned as `{error}`.
use std::path::PathBuf;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rescribe::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;

pub fn router<E, S>(rescribe: Rescribe<E, S>) -> Router
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    Router::new()
        .route("/tasks", post(create_task::<E, S>).get(list_tasks::<E, S>))
        .route("/tasks/{task_id}", get(task_status::<E, S>))
        .route("/tasks/{task_id}/cancel", post(cancel_task::<E, S>))
        .layer(TraceLayer::new_for_http())
        .with_state(rescribe)
}

#[derive(Debug, Deserialize)]
struct CreateTask {
    input_path: PathBuf,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Serialize)]
struct TaskCreated {
    task_id: JobId,
    status: JobStatus,
}

#[derive(Debug, Serialize)]
struct TaskStatus {
    task_id: JobId,
    status: JobStatus,
    success_count: usize,
    failed_count: usize,
    processed: usize,
    total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Job> for TaskStatus {
    fn from(job: Job) -> Self {
        Self {
            task_id: job.id,
            status: job.status,
            success_count: job.success_count(),
            failed_count: job.failed_count(),
            processed: job.processed(),
            total: job.total(),
            error: job.error,
        }
    }
}

#[derive(Debug, Serialize)]
struct Message {
    message: &'static str,
}

async fn create_task<E, S>(
    State(rescribe): State<Rescribe<E, S>>,
    body: Result<Json<CreateTask>, JsonRejection>,
) -> Result<Json<TaskCreated>, ApiError>
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    let Json(CreateTask {
        input_path,
        priority,
    }) = body?;
    let task_id = rescribe.create_job(input_path, priority).await?;
    Ok(Json(TaskCreated {
        task_id,
        status: JobStatus::Queued,
    }))
}

async fn list_tasks<E, S>(
    State(rescribe): State<Rescribe<E, S>>,
) -> Result<Json<Vec<TaskStatus>>, ApiError>
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    let jobs = rescribe.jobs()?;
    Ok(Json(jobs.into_iter().map(TaskStatus::from).collect()))
}

async fn task_status<E, S>(
    State(rescribe): State<Rescribe<E, S>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>, ApiError>
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    let job = rescribe.job_status(parse_task_id(&task_id)?)?;
    Ok(Json(job.into()))
}

async fn cancel_task<E, S>(
    State(rescribe): State<Rescribe<E, S>>,
    Path(task_id): Path<String>,
) -> Result<Json<Message>, ApiError>
where
    E: TranscriptionEngine,
    S: AudioSource,
{
    rescribe.cancel_job(parse_task_id(&task_id)?)?;
    Ok(Json(Message {
        message: "Cancellation requested",
    }))
}

fn parse_task_id(task_id: &str) -> Result<JobId, ApiError> {
    task_id
        .parse()
        .map_err(|_| ApiError::UnknownTask(task_id.to_owned()))
}

#[derive(Debug, Error)]
enum ApiError {
    #[error(transparent)]
    Rescribe(#[from] RescribeError),
    #[error("Task {0} not found")]
    UnknownTask(String),
    #[error("{}", .0.body_text())]
    Body(#[from] JsonRejection),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Rescribe(RescribeError::InvalidPath { .. } | RescribeError::InvalidState { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::Rescribe(RescribeError::NotFound(_)) | Self::UnknownTask(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Rescribe(RescribeError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Rescribe(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Body(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
