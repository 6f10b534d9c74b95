//! Plugin instances and run lifecycle
//!
//! A [`PluginInstance`] pairs a loaded [`DiagnosticPlugin`] with the state
//! machine that enforces at-most-one concurrent run per identifier. Plugin
//! bodies receive a [`RunContext`] through which they observe cancellation
//! and report progress.

use crate::core::error::{NetProbeError, Result};
use crate::plugin::descriptor::PluginId;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Callback invoked with `(run_id, percent)` on every progress change.
pub type ProgressCallback = Arc<dyn Fn(Uuid, u8) + Send + Sync>;

/// A loadable diagnostic.
///
/// Implementations must be cooperative: poll [`RunContext::is_cancelled`] or
/// await [`RunContext::cancelled`] at natural checkpoints, and return early
/// with [`NetProbeError::Cancelled`] when asked to stop.
#[async_trait]
pub trait DiagnosticPlugin: Send + Sync {
    /// Execute the diagnostic with fully resolved parameters.
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value>;
}

/// Per-run handle given to the plugin body.
pub struct RunContext {
    run_id: Uuid,
    plugin: PluginId,
    cancel: CancellationToken,
    progress: Arc<AtomicU8>,
    on_progress: Option<ProgressCallback>,
}

impl RunContext {
    pub(crate) fn new(
        run_id: Uuid,
        plugin: PluginId,
        cancel: CancellationToken,
        progress: Arc<AtomicU8>,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            run_id,
            plugin,
            cancel,
            progress,
            on_progress,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// True once a stop has been requested for this run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when a stop is requested. Intended for `tokio::select!`
    /// alongside the plugin's own awaits.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Report completion percentage. Values are clamped to 0..=100 and
    /// progress never moves backwards within a run.
    pub fn report_progress(&self, percent: u8) {
        let clamped = percent.min(100);
        let previous = self.progress.fetch_max(clamped, Ordering::SeqCst);
        if clamped > previous {
            if let Some(cb) = &self.on_progress {
                cb(self.run_id, clamped);
            }
        }
    }

    /// Shorthand for a cancellation check that plugins can use with `?`.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(NetProbeError::Cancelled(self.plugin.clone()))
        } else {
            Ok(())
        }
    }
}

/// Lifecycle state of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Loaded, never run (or reset).
    Idle,
    Running,
    /// Last run finished successfully.
    Completed,
    /// Last run failed, timed out, or was cancelled.
    Error,
}

/// Point-in-time view of an instance, safe to serialize to callers.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub plugin: PluginId,
    pub running: bool,
    pub state: LifecycleState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl InstanceStatus {
    /// Status reported for a known plugin that has never been instantiated.
    pub fn unloaded(plugin: PluginId) -> Self {
        Self {
            plugin,
            running: false,
            state: LifecycleState::Idle,
            progress: 0,
            run_id: None,
            last_error: None,
        }
    }
}

struct InstanceInner {
    state: LifecycleState,
    run_id: Option<Uuid>,
    cancel: Option<CancellationToken>,
    last_error: Option<String>,
}

/// A loaded plugin plus its run state machine.
pub struct PluginInstance {
    identifier: PluginId,
    plugin: Arc<dyn DiagnosticPlugin>,
    progress: Arc<AtomicU8>,
    inner: Mutex<InstanceInner>,
}

impl PluginInstance {
    pub fn new(identifier: PluginId, plugin: Arc<dyn DiagnosticPlugin>) -> Self {
        Self {
            identifier,
            plugin,
            progress: Arc::new(AtomicU8::new(0)),
            inner: Mutex::new(InstanceInner {
                state: LifecycleState::Idle,
                run_id: None,
                cancel: None,
                last_error: None,
            }),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn plugin(&self) -> Arc<dyn DiagnosticPlugin> {
        Arc::clone(&self.plugin)
    }

    pub(crate) fn progress_handle(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.progress)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InstanceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the instance for a new run.
    ///
    /// Fails with [`NetProbeError::AlreadyRunning`] while a run is in flight;
    /// any terminal state is a valid starting point for the next run.
    /// Progress resets to zero on a successful claim.
    pub fn begin_run(&self) -> Result<(Uuid, CancellationToken)> {
        let mut inner = self.lock();
        if inner.state == LifecycleState::Running {
            return Err(NetProbeError::AlreadyRunning(self.identifier.clone()));
        }
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        inner.state = LifecycleState::Running;
        inner.run_id = Some(run_id);
        inner.cancel = Some(cancel.clone());
        inner.last_error = None;
        self.progress.store(0, Ordering::SeqCst);
        Ok((run_id, cancel))
    }

    /// Record the terminal state of a run.
    ///
    /// Returns `false` when `run_id` no longer owns the instance (the run was
    /// superseded after its own timeout); callers must then discard whatever
    /// they produced.
    pub fn finish_run(
        &self,
        run_id: Uuid,
        state: LifecycleState,
        error: Option<String>,
    ) -> bool {
        debug_assert!(state != LifecycleState::Running);
        let mut inner = self.lock();
        if inner.state != LifecycleState::Running || inner.run_id != Some(run_id) {
            return false;
        }
        inner.state = state;
        inner.cancel = None;
        inner.last_error = error;
        if state == LifecycleState::Completed {
            self.progress.store(100, Ordering::SeqCst);
        }
        true
    }

    /// Request cooperative cancellation of the current run, if any.
    pub fn request_stop(&self) -> bool {
        let inner = self.lock();
        match (&inner.cancel, inner.state) {
            (Some(token), LifecycleState::Running) => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().state == LifecycleState::Running
    }

    pub fn status(&self) -> InstanceStatus {
        let inner = self.lock();
        InstanceStatus {
            plugin: self.identifier.clone(),
            running: inner.state == LifecycleState::Running,
            state: inner.state,
            progress: self.progress.load(Ordering::SeqCst),
            run_id: inner.run_id,
            last_error: inner.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopPlugin;

    #[async_trait]
    impl DiagnosticPlugin for NoopPlugin {
        async fn run(&self, _ctx: &RunContext, _params: Value) -> Result<Value> {
            Ok(json!({}))
        }
    }

    fn instance() -> PluginInstance {
        PluginInstance::new("noop".to_string(), Arc::new(NoopPlugin))
    }

    #[test]
    fn begin_run_rejects_concurrent_claim() {
        let inst = instance();
        let (run_id, _cancel) = inst.begin_run().unwrap();
        assert!(matches!(
            inst.begin_run(),
            Err(NetProbeError::AlreadyRunning(_))
        ));
        assert!(inst.finish_run(run_id, LifecycleState::Completed, None));
        // terminal state allows the next run
        assert!(inst.begin_run().is_ok());
    }

    #[test]
    fn finish_run_guards_against_stale_runs() {
        let inst = instance();
        let (first, _cancel) = inst.begin_run().unwrap();
        assert!(inst.finish_run(first, LifecycleState::Error, Some("timed out".into())));
        let (second, _cancel) = inst.begin_run().unwrap();
        // the first worker reporting again must be ignored
        assert!(!inst.finish_run(first, LifecycleState::Completed, None));
        assert!(inst.is_running());
        assert!(inst.finish_run(second, LifecycleState::Completed, None));
        assert_eq!(inst.status().progress, 100);
    }

    #[test]
    fn progress_resets_on_new_run_and_never_regresses() {
        let inst = instance();
        let (run_id, cancel) = inst.begin_run().unwrap();
        let ctx = RunContext::new(
            run_id,
            "noop".to_string(),
            cancel,
            inst.progress_handle(),
            None,
        );
        ctx.report_progress(60);
        ctx.report_progress(30);
        assert_eq!(inst.status().progress, 60);
        ctx.report_progress(250);
        assert_eq!(inst.status().progress, 100);
        inst.finish_run(run_id, LifecycleState::Error, None);
        let (_next, _cancel) = inst.begin_run().unwrap();
        assert_eq!(inst.status().progress, 0);
    }

    #[test]
    fn request_stop_cancels_only_active_runs() {
        let inst = instance();
        assert!(!inst.request_stop());
        let (run_id, cancel) = inst.begin_run().unwrap();
        assert!(inst.request_stop());
        assert!(cancel.is_cancelled());
        inst.finish_run(run_id, LifecycleState::Error, Some("cancelled".into()));
        assert!(!inst.request_stop());
    }
}
