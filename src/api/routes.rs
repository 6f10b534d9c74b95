//! API routes

use crate::api::handlers::{
    get_plugin, get_result, list_plugins, list_results, list_statuses, network_events,
    network_status, plugin_status, run_plugin, run_sequence, scan_plugins, set_auto_run,
    set_plugin_enabled, stop_all, stop_plugin, AppState,
};
use axum::{
    routing::{get, post, put},
    Router,
};

/// Build the versioned API routes.
pub fn build_api_routes(state: AppState) -> Router {
    Router::new()
        // Plugin catalog and execution
        .route("/api/v1/plugins", get(list_plugins))
        .route("/api/v1/plugins/scan", post(scan_plugins))
        .route("/api/v1/plugins/run-sequence", post(run_sequence))
        .route("/api/v1/plugins/stop-all", post(stop_all))
        .route("/api/v1/plugins/:id", get(get_plugin))
        .route("/api/v1/plugins/:id/run", post(run_plugin))
        .route("/api/v1/plugins/:id/stop", post(stop_plugin))
        .route("/api/v1/plugins/:id/status", get(plugin_status))
        .route("/api/v1/plugins/:id/enabled", put(set_plugin_enabled))
        .route("/api/v1/status", get(list_statuses))
        // Stored run results
        .route("/api/v1/results", get(list_results))
        .route("/api/v1/results/:run_id", get(get_result))
        // Network monitoring
        .route("/api/v1/network/status", get(network_status))
        .route("/api/v1/network/events", get(network_events))
        .route("/api/v1/network/auto-run", put(set_auto_run))
        .with_state(state)
}
