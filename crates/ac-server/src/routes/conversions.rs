//! Conversion request, status, and cancel endpoints.

use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use ac_core::{Error, TaskId};

use crate::context::AppContext;
use crate::conversion_processor::ConversionJob;
use crate::downloader;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;
use crate::registry::{Task, TaskStatus};

#[derive(Debug, Deserialize)]
pub struct ConversionRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversionAccepted {
    pub task_id: String,
}

/// Status body: `{"status": "processing"}`, `{"status": "completed",
/// "converted_audio_url": ...}` or `{"status": "failed", "detail": ...}`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConversionStatus {
    Processing,
    Completed { converted_audio_url: String },
    Failed { detail: String },
}

impl ConversionStatus {
    fn from_task(ctx: &AppContext, task: &Task) -> Self {
        match task.status {
            TaskStatus::Processing => ConversionStatus::Processing,
            TaskStatus::Completed => ConversionStatus::Completed {
                converted_audio_url: ctx.file_url(&task.output_file),
            },
            TaskStatus::Failed => ConversionStatus::Failed {
                detail: task
                    .error
                    .clone()
                    .unwrap_or_else(|| "conversion failed".to_string()),
            },
        }
    }
}

/// Unknown and malformed ids are both reported as a missing task.
fn parse_task_id(raw: &str) -> Result<TaskId, Error> {
    TaskId::from_str(raw).map_err(|_| Error::not_found("task", raw))
}

/// Malformed, mistyped or incomplete request bodies are validation errors.
fn body_error(rejection: &JsonRejection) -> Error {
    Error::Validation(rejection.body_text())
}

/// POST /request-conversion/
pub async fn request_conversion(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ConversionRequest>, JsonRejection>,
) -> Result<Json<ConversionAccepted>, AppError> {
    let Json(payload) = payload.map_err(|e| request_id.tag(body_error(&e)))?;
    let url = downloader::parse_source_url(&payload.url).map_err(|e| request_id.tag(e))?;
    ctx.tools.require("ffmpeg").map_err(|e| request_id.tag(e))?;

    let task = ctx.registry.create(
        url.as_str(),
        &ctx.target.extension,
        ctx.shutdown.child_token(),
    );

    if let Err(e) = ctx.queue.submit(ConversionJob::for_task(&task, url)) {
        let _ = ctx.registry.fail(task.id, &e.to_string());
        tracing::warn!(task_id = %task.id, "Rejected conversion: {e}");
        return Err(request_id.tag(e));
    }

    tracing::info!(task_id = %task.id, url = %task.source_url, "Conversion queued");

    Ok(Json(ConversionAccepted {
        task_id: task.id.to_string(),
    }))
}

/// GET /get-conversion-status/{task_id}
pub async fn get_conversion_status(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(task_id): Path<String>,
) -> Result<Json<ConversionStatus>, AppError> {
    let id = parse_task_id(&task_id).map_err(|e| request_id.tag(e))?;
    let task = ctx
        .registry
        .get(id)
        .ok_or_else(|| request_id.tag(Error::not_found("task", id)))?;

    Ok(Json(ConversionStatus::from_task(&ctx, &task)))
}

/// DELETE /conversion/{task_id}
pub async fn cancel_conversion(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(task_id): Path<String>,
) -> Result<Json<ConversionStatus>, AppError> {
    let id = parse_task_id(&task_id).map_err(|e| request_id.tag(e))?;
    let task = ctx.registry.cancel(id).map_err(|e| request_id.tag(e))?;

    tracing::info!(task_id = %id, "Conversion cancelled by client");
    Ok(Json(ConversionStatus::from_task(&ctx, &task)))
}
