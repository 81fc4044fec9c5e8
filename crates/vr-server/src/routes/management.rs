//! Stream and relay management endpoints.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use vr_av::{RelayStatus, RestartReport, StreamStatus, SupervisorStatus};
use vr_core::TaskId;

use crate::context::AppContext;
use crate::error::AppError;

// ---------------------------------------------------------------------------
// Response / request types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub streams: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct VideoEntry {
    pub name: String,
    pub path: PathBuf,
    pub exists: bool,
    pub rtsp_url: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub relay: RelayStatus,
    #[serde(flatten)]
    pub supervisor: SupervisorStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct RestartQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: TaskId,
}

#[derive(Debug, Deserialize)]
pub struct StreamsConfigRequest {
    pub enabled_streams: Option<Vec<String>>,
    pub relay_port: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct RelayStopResponse {
    pub stopped: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /
///
/// Advertised RTSP URL for every registered stream name.
pub async fn index(State(ctx): State<AppContext>) -> Result<Json<IndexResponse>, AppError> {
    let streams = ctx
        .registry()
        .list_async()
        .await?
        .into_iter()
        .map(|entry| {
            let url = ctx.supervisor.advertised_url(&entry.name);
            (entry.name, url)
        })
        .collect();
    Ok(Json(IndexResponse { streams }))
}

/// GET /videos
pub async fn list_videos(State(ctx): State<AppContext>) -> Result<Json<Vec<VideoEntry>>, AppError> {
    let videos = ctx
        .registry()
        .list_async()
        .await?
        .into_iter()
        .map(|entry| VideoEntry {
            rtsp_url: ctx.supervisor.advertised_url(&entry.name),
            name: entry.name,
            path: entry.path,
            exists: entry.exists,
        })
        .collect();
    Ok(Json(videos))
}

/// GET /status
pub async fn status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    let relay = ctx.relay.status().await;
    let supervisor = ctx.supervisor.status().await;
    Json(StatusResponse { relay, supervisor })
}

/// GET /restart-rtsp
///
/// Restarts every transcoder as a background task and returns its id with
/// 202. With `?wait=true` the handler waits and returns the finished record.
pub async fn restart_rtsp(
    State(ctx): State<AppContext>,
    Query(query): Query<RestartQuery>,
) -> Result<Response, AppError> {
    let supervisor = Arc::clone(&ctx.supervisor);
    let (task_id, handle) = ctx.tasks.spawn_tracked("restart_rtsp", async move {
        Ok::<RestartReport, vr_core::Error>(supervisor.restart_all().await)
    });
    tracing::info!(task = %task_id, wait = query.wait, "Restart requested");

    if !query.wait {
        return Ok((StatusCode::ACCEPTED, Json(TaskAccepted { task_id })).into_response());
    }

    handle
        .await
        .map_err(|e| vr_core::Error::Internal(format!("restart task aborted: {e}")))?;
    let record = ctx
        .tasks
        .get(task_id)
        .ok_or_else(|| vr_core::Error::not_found("task", task_id))?;
    Ok(Json(record).into_response())
}

/// POST /streams/config
pub async fn configure_streams(
    State(ctx): State<AppContext>,
    Json(req): Json<StreamsConfigRequest>,
) -> Result<Json<RestartReport>, AppError> {
    let report = ctx
        .supervisor
        .reconfigure(req.enabled_streams, req.relay_port)
        .await?;
    Ok(Json(report))
}

/// POST /streams/{id}/start
pub async fn start_stream(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StreamStatus>, AppError> {
    let status = ctx.supervisor.start(&id).await?;
    Ok(Json(status))
}

/// POST /streams/{id}/stop
pub async fn stop_stream(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StreamStatus>, AppError> {
    let status = ctx.supervisor.stop(&id).await?;
    Ok(Json(status))
}

/// POST /relay/stop
///
/// Stops a relay this server launched. An external relay is left alone.
pub async fn stop_relay(State(ctx): State<AppContext>) -> Json<RelayStopResponse> {
    let stopped = ctx.relay.stop().await;
    Json(RelayStopResponse { stopped })
}
