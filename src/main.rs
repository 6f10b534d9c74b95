//! NetProbe service entry point
//!
//! Wires configuration, logging, the plugin engine, the link monitor and
//! the HTTP server together, then serves until shutdown.

use anyhow::Context;
use netprobe::api::ApiServer;
use netprobe::core::config::Config;
use netprobe::core::logging::Logger;
use netprobe::monitor::{install_auto_run, LinkStateMonitor};
use netprobe::plugin::{ExecutionEngine, FactoryLoader, PluginRegistry, ResultStore};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    // guard must outlive the runtime so buffered log lines get flushed
    let _logger = Logger::init(&config.logging).context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "starting netprobe"
    );

    tokio::fs::create_dir_all(&config.plugins.data_dir)
        .await
        .context("failed to create data directory")?;

    let registry = Arc::new(PluginRegistry::new(
        config.plugins.directories.clone(),
        &config.plugins.data_dir,
    ));
    match registry.scan().await {
        Ok(available) => info!(available, "plugin catalog ready"),
        Err(e) => error!(error = %e, "initial plugin scan failed"),
    }

    let store = Arc::new(
        ResultStore::new(config.results.directory.clone(), config.results.max_stored)
            .context("failed to open result store")?,
    );
    let loader = Arc::new(FactoryLoader::with_builtins());
    let engine = ExecutionEngine::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        loader,
        config.plugins.execution_deadline(),
        config.plugins.max_concurrent_runs,
    );

    let monitor = LinkStateMonitor::new(config.network.clone());
    install_auto_run(&monitor, Arc::clone(&engine));
    if let Err(e) = monitor.start().await {
        // the service still works without link events
        warn!(error = %e, "link monitor not started");
    }

    let server = ApiServer::new(Arc::new(config), Arc::clone(&engine), Arc::clone(&monitor));
    server.serve().await?;

    monitor.stop().await;
    let stopped = engine.stop_all().await;
    if stopped > 0 {
        info!(stopped, "signalled running plugins during shutdown");
    }
    info!("netprobe stopped");
    Ok(())
}
