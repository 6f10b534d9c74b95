//! Plugin execution engine
//!
//! Owns the loaded plugin instances and everything about running them:
//! lazy loading through the [`PluginLoader`], the bounded worker pool, the
//! per-run deadline, cooperative cancellation, progress fan-out, and
//! persisting every terminal run into the [`ResultStore`] exactly once.

use crate::core::error::{NetProbeError, Result};
use crate::plugin::descriptor::{PluginDescriptor, PluginId};
use crate::plugin::instance::{
    InstanceStatus, LifecycleState, PluginInstance, ProgressCallback, RunContext,
};
use crate::plugin::loader::PluginLoader;
use crate::plugin::registry::PluginRegistry;
use crate::plugin::store::{IndexEntry, ResultStore, RunOutcome, RunRecord};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Callback invoked with the persisted record when a run reaches a terminal
/// state.
pub type CompleteCallback = Arc<dyn Fn(RunRecord) + Send + Sync>;

/// Per-plugin outcome of a sequence.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SequenceOutcome {
    Finished { record: RunRecord },
    /// The run could not be started or its worker disappeared.
    Failed { error: String },
}

/// Callback invoked once per sequence with the outcome of every member.
pub type SequenceCallback = Arc<dyn Fn(Uuid, HashMap<PluginId, SequenceOutcome>) + Send + Sync>;

pub struct ExecutionEngine {
    registry: Arc<PluginRegistry>,
    store: Arc<ResultStore>,
    loader: Arc<dyn PluginLoader>,
    instances: RwLock<HashMap<PluginId, Arc<PluginInstance>>>,
    /// Bounds how many plugin bodies execute at once; excess runs queue.
    workers: Arc<Semaphore>,
    deadline: Duration,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<PluginRegistry>,
        store: Arc<ResultStore>,
        loader: Arc<dyn PluginLoader>,
        deadline: Duration,
        max_concurrent_runs: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            loader,
            instances: RwLock::new(HashMap::new()),
            workers: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            deadline,
        })
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Instance for a descriptor, loading it on first use.
    async fn instance_for(&self, descriptor: &PluginDescriptor) -> Result<Arc<PluginInstance>> {
        if let Some(instance) = self.instances.read().await.get(&descriptor.name) {
            return Ok(Arc::clone(instance));
        }
        let mut instances = self.instances.write().await;
        // racing loader lost, reuse the winner
        if let Some(instance) = instances.get(&descriptor.name) {
            return Ok(Arc::clone(instance));
        }
        match self.loader.load(descriptor) {
            Ok(plugin) => {
                info!(plugin = %descriptor.name, version = %descriptor.version, "plugin loaded");
                let instance = Arc::new(PluginInstance::new(descriptor.name.clone(), plugin));
                instances.insert(descriptor.name.clone(), Arc::clone(&instance));
                Ok(instance)
            }
            Err(e) => {
                drop(instances);
                warn!(plugin = %descriptor.name, error = %e, "plugin failed to load");
                self.registry
                    .mark_unavailable(&descriptor.name, &e.to_string())
                    .await;
                Err(NetProbeError::PluginUnavailable(format!(
                    "{}: {}",
                    descriptor.name, e
                )))
            }
        }
    }

    /// Start a run and return its id immediately.
    ///
    /// Fails before anything is spawned when the plugin is unknown,
    /// unavailable, disabled, fails to load, rejects the parameters, or is
    /// already running.
    pub async fn run(
        self: &Arc<Self>,
        identifier: &str,
        params: Value,
        on_progress: Option<ProgressCallback>,
        on_complete: Option<CompleteCallback>,
    ) -> Result<Uuid> {
        let descriptor = self.registry.get(identifier).await?;
        if !self.registry.is_enabled(identifier).await {
            return Err(NetProbeError::PluginUnavailable(format!(
                "{}: disabled",
                identifier
            )));
        }
        let params = descriptor.resolve_params(params)?;
        let instance = self.instance_for(&descriptor).await?;
        let (run_id, cancel) = instance.begin_run()?;
        debug!(plugin = %identifier, run_id = %run_id, "run accepted");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine
                .execute(descriptor, instance, run_id, cancel, params, on_progress, on_complete)
                .await;
        });
        Ok(run_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        self: Arc<Self>,
        descriptor: PluginDescriptor,
        instance: Arc<PluginInstance>,
        run_id: Uuid,
        cancel: tokio_util::sync::CancellationToken,
        params: Value,
        on_progress: Option<ProgressCallback>,
        on_complete: Option<CompleteCallback>,
    ) {
        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let started_at = Utc::now();
        let clock = Instant::now();
        if let Some(cb) = &on_progress {
            cb(run_id, 0);
        }
        let ctx = RunContext::new(
            run_id,
            descriptor.name.clone(),
            cancel.clone(),
            instance.progress_handle(),
            on_progress.clone(),
        );

        let plugin = instance.plugin();
        let outcome = match tokio::time::timeout(self.deadline, plugin.run(&ctx, params.clone()))
            .await
        {
            Ok(Ok(result)) => RunOutcome::Success {
                result: sanitize_result(result),
            },
            Ok(Err(NetProbeError::Cancelled(_))) => RunOutcome::Cancelled,
            // keep the plugin's own message; the variant prefix is noise in
            // persisted records
            Ok(Err(NetProbeError::ExecutionError(message))) => {
                RunOutcome::Error { error: message }
            }
            Ok(Err(e)) => RunOutcome::Error {
                error: e.to_string(),
            },
            Err(_) => {
                // deadline hit, the body future is dropped; cancel so any
                // children it spawned wind down too
                cancel.cancel();
                warn!(plugin = %descriptor.name, run_id = %run_id, deadline = ?self.deadline, "run timed out");
                RunOutcome::Timeout
            }
        };

        let (state, error) = match &outcome {
            RunOutcome::Success { .. } => (LifecycleState::Completed, None),
            RunOutcome::Timeout => (LifecycleState::Error, Some("timed out".to_string())),
            RunOutcome::Cancelled => (LifecycleState::Error, Some("cancelled".to_string())),
            RunOutcome::Error { error } => (LifecycleState::Error, Some(error.clone())),
        };
        if !instance.finish_run(run_id, state, error) {
            debug!(plugin = %descriptor.name, run_id = %run_id, "run superseded, result discarded");
            return;
        }

        let record = RunRecord {
            run_id,
            plugin: descriptor.name.clone(),
            timestamp: started_at,
            params,
            outcome,
            execution_time: clock.elapsed().as_secs_f64(),
            plugin_info: descriptor.snapshot(),
        };
        if let Err(e) = self.store.save(&record).await {
            error!(plugin = %descriptor.name, run_id = %run_id, error = %e, "failed to persist run record");
        }
        info!(
            plugin = %descriptor.name,
            run_id = %run_id,
            success = record.outcome.is_success(),
            execution_time = record.execution_time,
            "run finished"
        );
        if let Some(cb) = &on_progress {
            cb(run_id, instance.status().progress);
        }
        if let Some(cb) = on_complete {
            cb(record);
        }
    }

    /// Start a run and wait for its terminal record, whatever the outcome.
    async fn run_and_wait(self: &Arc<Self>, identifier: &str, params: Value) -> Result<RunRecord> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let on_complete: CompleteCallback = Arc::new(move |record| {
            if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(record);
            }
        });
        self.run(identifier, params, None, Some(on_complete)).await?;
        rx.await.map_err(|_| {
            NetProbeError::ExecutionError(format!(
                "worker for '{}' dropped before completing",
                identifier
            ))
        })
    }

    /// Run to completion, mapping failed outcomes onto errors.
    pub async fn run_sync(self: &Arc<Self>, identifier: &str, params: Value) -> Result<RunRecord> {
        let record = self.run_and_wait(identifier, params).await?;
        match &record.outcome {
            RunOutcome::Success { .. } => Ok(record),
            RunOutcome::Timeout => Err(NetProbeError::Timeout(identifier.to_string())),
            RunOutcome::Cancelled => Err(NetProbeError::Cancelled(identifier.to_string())),
            RunOutcome::Error { error } => Err(NetProbeError::ExecutionError(error.clone())),
        }
    }

    /// Run several plugins as one sequence.
    ///
    /// Unknown identifiers are dropped with a warning. Sequentially, each
    /// member runs to a terminal state before the next starts; in parallel
    /// all start at once. Either way `on_complete` fires exactly once, with
    /// an outcome for every member, including those that failed to start.
    pub async fn run_sequence(
        self: &Arc<Self>,
        plugins: Vec<PluginId>,
        sequential: bool,
        on_complete: Option<SequenceCallback>,
    ) -> Result<Uuid> {
        let mut known = Vec::new();
        for identifier in plugins {
            if self.registry.contains(&identifier).await {
                if !known.contains(&identifier) {
                    known.push(identifier);
                }
            } else {
                warn!(plugin = %identifier, "dropping unknown plugin from sequence");
            }
        }
        if known.is_empty() {
            return Err(NetProbeError::InvalidRequest(
                "sequence contains no known plugins".to_string(),
            ));
        }
        let sequence_id = Uuid::new_v4();
        info!(sequence = %sequence_id, plugins = ?known, sequential, "sequence started");

        if sequential {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                let mut results = HashMap::new();
                for identifier in known {
                    let outcome = match engine.run_and_wait(&identifier, Value::Null).await {
                        Ok(record) => SequenceOutcome::Finished { record },
                        Err(e) => SequenceOutcome::Failed {
                            error: e.to_string(),
                        },
                    };
                    results.insert(identifier, outcome);
                }
                info!(sequence = %sequence_id, "sequence complete");
                if let Some(cb) = on_complete {
                    cb(sequence_id, results);
                }
            });
        } else {
            let results = Arc::new(Mutex::new(HashMap::new()));
            let remaining = Arc::new(AtomicUsize::new(known.len()));
            for identifier in known {
                let results = Arc::clone(&results);
                let remaining = Arc::clone(&remaining);
                let on_complete = on_complete.clone();
                let member = identifier.clone();
                let finish = move |outcome: SequenceOutcome| {
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(member.clone(), outcome);
                    if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        info!(sequence = %sequence_id, "sequence complete");
                        if let Some(cb) = &on_complete {
                            let collected = std::mem::take(
                                &mut *results.lock().unwrap_or_else(PoisonError::into_inner),
                            );
                            cb(sequence_id, collected);
                        }
                    }
                };
                let member_cb = finish.clone();
                let started = self
                    .run(
                        &identifier,
                        Value::Null,
                        None,
                        Some(Arc::new(move |record| {
                            member_cb(SequenceOutcome::Finished { record })
                        })),
                    )
                    .await;
                if let Err(e) = started {
                    warn!(sequence = %sequence_id, plugin = %identifier, error = %e, "sequence member failed to start");
                    finish(SequenceOutcome::Failed {
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(sequence_id)
    }

    /// Request cooperative cancellation of the current run of a plugin.
    /// Returns whether a run was actually signalled.
    pub async fn stop(&self, identifier: &str) -> Result<bool> {
        if !self.registry.contains(identifier).await {
            return Err(NetProbeError::PluginNotFound(identifier.to_string()));
        }
        let stopped = match self.instances.read().await.get(identifier) {
            Some(instance) => instance.request_stop(),
            None => false,
        };
        if stopped {
            info!(plugin = %identifier, "stop requested");
        }
        Ok(stopped)
    }

    /// Signal every running plugin to stop. Returns how many were signalled.
    pub async fn stop_all(&self) -> usize {
        let instances = self.instances.read().await;
        let stopped = instances
            .values()
            .filter(|instance| instance.request_stop())
            .count();
        if stopped > 0 {
            info!(count = stopped, "stop requested for all running plugins");
        }
        stopped
    }

    /// Lifecycle status of one plugin. A known plugin that was never run
    /// reports as idle.
    pub async fn status(&self, identifier: &str) -> Result<InstanceStatus> {
        if !self.registry.contains(identifier).await {
            return Err(NetProbeError::PluginNotFound(identifier.to_string()));
        }
        Ok(match self.instances.read().await.get(identifier) {
            Some(instance) => instance.status(),
            None => InstanceStatus::unloaded(identifier.to_string()),
        })
    }

    /// Status of every loaded instance.
    pub async fn statuses(&self) -> Vec<InstanceStatus> {
        let mut statuses: Vec<_> = self
            .instances
            .read()
            .await
            .values()
            .map(|instance| instance.status())
            .collect();
        statuses.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        statuses
    }

    pub async fn get_result(&self, run_id: Uuid) -> Result<RunRecord> {
        self.store.get(run_id).await
    }

    pub async fn get_results(&self, limit: Option<usize>) -> Vec<IndexEntry> {
        self.store.list(limit).await
    }
}

/// Guard against results the wire format cannot carry. `serde_json::Value`
/// is almost always representable; when it is not, store a stringified
/// stand-in rather than losing the record.
fn sanitize_result(result: Value) -> Value {
    match serde_json::to_string(&result) {
        Ok(_) => result,
        Err(e) => json!({
            "warning": format!("result could not be serialized: {}", e),
            "repr": format!("{:?}", result),
        }),
    }
}
