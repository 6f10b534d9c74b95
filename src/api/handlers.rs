//! HTTP request handlers
//!
//! A thin translation layer: parse the request, call into the engine or
//! monitor, serialize the answer. No diagnostic logic lives here.

use crate::core::config::Config;
use crate::core::error::Result;
use crate::monitor::LinkStateMonitor;
use crate::plugin::ExecutionEngine;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<ExecutionEngine>,
    pub monitor: Arc<LinkStateMonitor>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RunRequest {
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SequenceRequest {
    pub plugins: Vec<String>,
    #[serde(default = "default_sequential")]
    pub sequential: bool,
}

fn default_sequential() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct AutoRunRequest {
    pub enabled: bool,
    #[serde(default)]
    pub plugins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub plugin: Option<String>,
}

/// GET /api/v1/plugins
pub async fn list_plugins(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.registry().list().await)
}

/// POST /api/v1/plugins/scan
pub async fn scan_plugins(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let available = state.engine.registry().scan().await?;
    Ok(Json(json!({ "available": available })))
}

/// GET /api/v1/plugins/:id
pub async fn get_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    match state.engine.registry().entry(&id).await {
        Some(entry) => Ok(Json(entry)),
        None => Err(crate::core::error::NetProbeError::PluginNotFound(id)),
    }
}

/// POST /api/v1/plugins/:id/run
pub async fn run_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<RunRequest>>,
) -> Result<impl IntoResponse> {
    let params = request.map(|Json(r)| r.params).unwrap_or(Value::Null);
    let run_id = state.engine.run(&id, params, None, None).await?;
    Ok(Json(RunResponse { run_id }))
}

/// POST /api/v1/plugins/:id/stop
pub async fn stop_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let stopped = state.engine.stop(&id).await?;
    Ok(Json(json!({ "stopped": stopped })))
}

/// GET /api/v1/plugins/:id/status
pub async fn plugin_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.engine.status(&id).await?))
}

/// PUT /api/v1/plugins/:id/enabled
pub async fn set_plugin_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EnabledRequest>,
) -> Result<impl IntoResponse> {
    state
        .engine
        .registry()
        .set_enabled(&id, request.enabled)
        .await?;
    Ok(Json(json!({ "plugin": id, "enabled": request.enabled })))
}

/// GET /api/v1/status — all loaded instances
pub async fn list_statuses(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.statuses().await)
}

/// POST /api/v1/plugins/run-sequence
pub async fn run_sequence(
    State(state): State<AppState>,
    Json(request): Json<SequenceRequest>,
) -> Result<impl IntoResponse> {
    let sequence_id = state
        .engine
        .run_sequence(request.plugins, request.sequential, None)
        .await?;
    Ok(Json(json!({ "sequence_id": sequence_id })))
}

/// POST /api/v1/plugins/stop-all
pub async fn stop_all(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.engine.stop_all().await;
    Json(json!({ "stopped": stopped }))
}

/// GET /api/v1/results
pub async fn list_results(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let entries = match &query.plugin {
        Some(plugin) => {
            state
                .engine
                .store()
                .list_for_plugin(plugin, query.limit)
                .await
        }
        None => state.engine.store().list(query.limit).await,
    };
    Json(entries)
}

/// GET /api/v1/results/:run_id
pub async fn get_result(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.engine.get_result(run_id).await?))
}

/// GET /api/v1/network/status
pub async fn network_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.interface_status().await)
}

/// GET /api/v1/network/events
pub async fn network_events(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    Json(state.monitor.recent_events(query.limit.unwrap_or(50)))
}

/// PUT /api/v1/network/auto-run
pub async fn set_auto_run(
    State(state): State<AppState>,
    Json(request): Json<AutoRunRequest>,
) -> impl IntoResponse {
    state.monitor.set_auto_run(request.enabled, request.plugins);
    Json(json!({
        "enabled": state.monitor.auto_run_enabled(),
        "plugins": state.monitor.auto_run_plugins(),
    }))
}
