//! Link detection strategies
//!
//! The monitor samples link presence through a [`DetectionStrategy`], so the
//! mechanism (periodic sysfs polls, filesystem notifications, an external
//! helper writing a status file) stays swappable without touching the event
//! pipeline. All strategies answer the same question: does this interface
//! currently have link?

use crate::core::error::{NetProbeError, Result};
use crate::monitor::netinfo;
use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// A pluggable link-presence probe.
#[async_trait]
pub trait DetectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Observe current link presence of the interface.
    async fn observe(&self, interface: &str) -> Result<bool>;

    /// Wait until the next observation is due. The default paces a plain
    /// polling loop; push-style strategies return early when a change is
    /// likely so the monitor reacts with low latency.
    async fn wait_for_change(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// Periodic sysfs sampling. Always works, worst-case latency one interval.
pub struct PollDetector;

#[async_trait]
impl DetectionStrategy for PollDetector {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn observe(&self, interface: &str) -> Result<bool> {
        netinfo::read_carrier(interface)
    }
}

/// Filesystem-notification strategy.
///
/// Watches the interface's sysfs node and wakes the monitor as soon as an
/// event arrives; the actual link state is still read from sysfs. If the
/// watch cannot be established the monitor falls back to [`PollDetector`].
pub struct PushDetector {
    // watcher stops delivering when dropped
    _watcher: RecommendedWatcher,
    events: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<()>>,
}

impl PushDetector {
    pub fn subscribe(interface: &str) -> Result<Self> {
        let node = PathBuf::from("/sys/class/net").join(interface);
        if !node.is_dir() {
            return Err(NetProbeError::DetectionError(format!(
                "interface {} not present, cannot watch",
                interface
            )));
        }
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(
            move |event: std::result::Result<notify::Event, notify::Error>| {
                if event.is_ok() {
                    let _ = tx.send(());
                }
            },
        )
        .map_err(|e| NetProbeError::DetectionError(format!("watcher init failed: {}", e)))?;
        watcher
            .watch(&node, RecursiveMode::NonRecursive)
            .map_err(|e| {
                NetProbeError::DetectionError(format!(
                    "cannot watch {}: {}",
                    node.display(),
                    e
                ))
            })?;
        debug!(interface, "push detection subscribed");
        Ok(Self {
            _watcher: watcher,
            events: tokio::sync::Mutex::new(rx),
        })
    }
}

#[async_trait]
impl DetectionStrategy for PushDetector {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn observe(&self, interface: &str) -> Result<bool> {
        // drain queued notifications so one change wakes one observation
        let mut events = self.events.lock().await;
        while events.try_recv().is_ok() {}
        netinfo::read_carrier(interface)
    }

    async fn wait_for_change(&self, interval: Duration) {
        let mut events = self.events.lock().await;
        // interval doubles as a safety net when no notification arrives
        let _ = tokio::time::timeout(interval, events.recv()).await;
    }
}

/// External-helper strategy.
///
/// A helper (an ifplugd action script, a udev rule) writes `up` or `down`
/// into a status file; the detector treats a fresh write as authoritative
/// and otherwise falls back to the sysfs carrier, so a silent helper never
/// blinds the monitor.
pub struct HelperDetector {
    status_file: PathBuf,
    last_seen: Mutex<Option<SystemTime>>,
}

impl HelperDetector {
    pub fn new(status_file: PathBuf) -> Self {
        Self {
            status_file,
            last_seen: Mutex::new(None),
        }
    }

    fn fresh_report(&self) -> Option<bool> {
        let meta = std::fs::metadata(&self.status_file).ok()?;
        let mtime = meta.modified().ok()?;
        {
            let mut last = self
                .last_seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *last == Some(mtime) {
                return None;
            }
            *last = Some(mtime);
        }
        let raw = std::fs::read_to_string(&self.status_file).ok()?;
        parse_helper_state(&raw)
    }
}

fn parse_helper_state(raw: &str) -> Option<bool> {
    match raw.split_whitespace().next()?.to_ascii_lowercase().as_str() {
        "up" | "connected" | "1" => Some(true),
        "down" | "disconnected" | "0" => Some(false),
        other => {
            warn!(state = %other, "unrecognized helper status");
            None
        }
    }
}

#[async_trait]
impl DetectionStrategy for HelperDetector {
    fn name(&self) -> &'static str {
        "helper"
    }

    async fn observe(&self, interface: &str) -> Result<bool> {
        if let Some(state) = self.fresh_report() {
            return Ok(state);
        }
        netinfo::read_carrier(interface)
    }
}

/// Build the configured strategy for an interface, falling back to polling
/// when a push subscription cannot be established.
pub fn build_strategy(
    method: &str,
    interface: &str,
    helper_status_file: &Path,
) -> Arc<dyn DetectionStrategy> {
    match method {
        "push" => match PushDetector::subscribe(interface) {
            Ok(detector) => Arc::new(detector),
            Err(e) => {
                warn!(interface, error = %e, "push detection unavailable, falling back to poll");
                Arc::new(PollDetector)
            }
        },
        "helper" => Arc::new(HelperDetector::new(helper_status_file.to_path_buf())),
        _ => Arc::new(PollDetector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn helper_state_parsing() {
        assert_eq!(parse_helper_state("up\n"), Some(true));
        assert_eq!(parse_helper_state("DOWN eth0"), Some(false));
        assert_eq!(parse_helper_state("connected"), Some(true));
        assert_eq!(parse_helper_state("???"), None);
        assert_eq!(parse_helper_state(""), None);
    }

    #[tokio::test]
    async fn helper_prefers_fresh_report_then_falls_back() {
        let dir = TempDir::new().unwrap();
        let status = dir.path().join("link_status");
        let detector = HelperDetector::new(status.clone());

        // no file yet: sysfs fallback (missing interface reads down)
        assert!(!detector
            .observe("definitely_not_an_interface0")
            .await
            .unwrap());

        std::fs::write(&status, "up").unwrap();
        assert!(detector
            .observe("definitely_not_an_interface0")
            .await
            .unwrap());

        // same mtime, report is stale: fallback again
        assert!(!detector
            .observe("definitely_not_an_interface0")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn push_subscription_fails_for_missing_interface() {
        assert!(PushDetector::subscribe("definitely_not_an_interface0").is_err());
    }

    #[tokio::test]
    async fn build_strategy_falls_back_to_poll() {
        let dir = TempDir::new().unwrap();
        let strategy = build_strategy(
            "push",
            "definitely_not_an_interface0",
            &dir.path().join("status"),
        );
        assert_eq!(strategy.name(), "poll");
    }
}
