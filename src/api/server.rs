//! HTTP server
//!
//! Axum server wiring: routes, CORS, request tracing, request timeout,
//! health endpoint and graceful shutdown on Ctrl+C/SIGTERM.

use crate::api::handlers::AppState;
use crate::api::routes::build_api_routes;
use crate::core::config::{Config, ServerConfig};
use crate::monitor::LinkStateMonitor;
use crate::plugin::ExecutionEngine;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    router: Router,
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<ExecutionEngine>,
        monitor: Arc<LinkStateMonitor>,
    ) -> Self {
        let server_config = config.server.clone();
        let state = AppState {
            config,
            engine,
            monitor,
        };
        let router = Self::build_router(state, &server_config);
        Self {
            router,
            config: server_config,
        }
    }

    fn build_router(state: AppState, server: &ServerConfig) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/api/v1/health", get(health_check))
            .merge(build_api_routes(state))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        server.request_timeout,
                    )))
                    .layer(CorsLayer::permissive()),
            )
    }

    /// Serve until a shutdown signal arrives.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr: SocketAddr = addr.parse()?;

        let listener = tokio::net::TcpListener::bind(socket_addr).await?;
        info!(addr = %socket_addr, "HTTP server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
    info!("Initiating graceful shutdown");
}
