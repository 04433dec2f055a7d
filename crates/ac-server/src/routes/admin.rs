//! Health and tool availability handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;
use crate::registry::TaskCounts;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ffmpeg_available: bool,
    pub tasks: TaskCounts,
    pub queued: usize,
}

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ffmpeg_available: ctx.tools.is_available("ffmpeg"),
        tasks: ctx.registry.counts(),
        queued: ctx.queue.pending(),
    })
}

/// GET /tools
pub async fn tools(State(ctx): State<AppContext>) -> Json<Vec<ac_av::ToolInfo>> {
    let tools = ctx.tools.clone();
    // Version detection spawns each tool synchronously.
    let infos = tokio::task::spawn_blocking(move || tools.check_all())
        .await
        .unwrap_or_default();
    Json(infos)
}
