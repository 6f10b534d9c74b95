//! Link-state monitoring
//!
//! One watch task per interface samples link presence through a
//! [`DetectionStrategy`] and turns edges into `connect`/`disconnect` events.
//! Events flow through a bounded in-memory log and are dispatched to
//! registered handlers in registration order; a failing handler is logged
//! and isolated, it never stops the loop or the remaining handlers.

use crate::core::config::NetworkConfig;
use crate::core::error::{NetProbeError, Result};
use crate::monitor::detect::{build_strategy, DetectionStrategy};
use crate::monitor::netinfo::{self, InterfaceState};
use crate::plugin::engine::ExecutionEngine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tracked link state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Not yet observed.
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkEventKind {
    Connect,
    Disconnect,
}

/// An edge on an interface's link state.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkEvent {
    pub kind: NetworkEventKind,
    pub interface: String,
    pub timestamp: DateTime<Utc>,
    /// Interface snapshot taken when the edge was observed.
    pub state: InterfaceState,
}

/// Combined status answer for one interface.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
    pub link: LinkState,
    #[serde(flatten)]
    pub state: InterfaceState,
}

pub type EventHandler = Arc<dyn Fn(&NetworkEvent) -> Result<()> + Send + Sync>;

/// Opaque handle for unregistering a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Decide whether an observation is an edge.
///
/// The first `up` observation counts as a connect even from the unknown
/// state; an interface first seen down establishes the baseline silently.
fn transition(last: &mut LinkState, link_up: bool) -> Option<NetworkEventKind> {
    let kind = match (*last, link_up) {
        (LinkState::Up, false) => Some(NetworkEventKind::Disconnect),
        (LinkState::Up, true) | (LinkState::Down, false) => None,
        (_, true) => Some(NetworkEventKind::Connect),
        (LinkState::Unknown, false) => None,
    };
    *last = if link_up { LinkState::Up } else { LinkState::Down };
    kind
}

pub struct LinkStateMonitor {
    network: NetworkConfig,
    primary_interface: RwLock<String>,
    link_states: RwLock<HashMap<String, LinkState>>,
    handlers: RwLock<HashMap<NetworkEventKind, Vec<(HandlerId, EventHandler)>>>,
    next_handler_id: AtomicU64,
    events: RwLock<VecDeque<NetworkEvent>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    running: AtomicBool,
    auto_run: AtomicBool,
    auto_run_plugins: RwLock<Vec<String>>,
}

impl LinkStateMonitor {
    pub fn new(network: NetworkConfig) -> Arc<Self> {
        let auto_run = network.auto_run_on_connect;
        let plugins = network.default_plugins.clone();
        let interface = network.interface.clone();
        Arc::new(Self {
            network,
            primary_interface: RwLock::new(interface),
            link_states: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            next_handler_id: AtomicU64::new(1),
            events: RwLock::new(VecDeque::new()),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            auto_run: AtomicBool::new(auto_run),
            auto_run_plugins: RwLock::new(plugins),
        })
    }

    fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
        lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
        lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching the configured interface.
    ///
    /// `auto` resolves to the first wired non-loopback interface present.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NetProbeError::MonitorError(
                "monitor already started".to_string(),
            ));
        }
        let interface = if self.network.interface == "auto" {
            netinfo::pick_default_interface().ok_or_else(|| {
                NetProbeError::MonitorError(
                    "no non-loopback interface available for auto selection".to_string(),
                )
            })?
        } else if !netinfo::interface_exists(&self.network.interface) {
            match netinfo::pick_default_interface() {
                Some(fallback) => {
                    warn!(
                        configured = %self.network.interface,
                        selected = %fallback,
                        "configured interface not present, monitoring fallback"
                    );
                    fallback
                }
                // keep the configured name, it may appear later
                None => self.network.interface.clone(),
            }
        } else {
            self.network.interface.clone()
        };
        *Self::write_lock(&self.primary_interface) = interface.clone();

        let strategy = build_strategy(
            &self.network.monitor_method,
            &interface,
            &self.network.helper_status_file,
        );
        self.watch_interface(interface, strategy).await;
        Ok(())
    }

    /// Spawn a watch task for one interface with an explicit strategy.
    pub async fn watch_interface(
        self: &Arc<Self>,
        interface: String,
        strategy: Arc<dyn DetectionStrategy>,
    ) {
        Self::write_lock(&self.link_states).insert(interface.clone(), LinkState::Unknown);
        let monitor = Arc::clone(self);
        let interval = Duration::from_secs(self.network.poll_interval);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            info!(interface = %interface, strategy = strategy.name(), "link monitor watching");
            let mut last = LinkState::Unknown;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = strategy.wait_for_change(interval) => {}
                }
                match strategy.observe(&interface).await {
                    Ok(link_up) => {
                        let edge = transition(&mut last, link_up);
                        Self::write_lock(&monitor.link_states)
                            .insert(interface.clone(), last);
                        if let Some(kind) = edge {
                            let state = netinfo::interface_state(&interface).await;
                            let event = NetworkEvent {
                                kind,
                                interface: interface.clone(),
                                timestamp: Utc::now(),
                                state,
                            };
                            info!(interface = %interface, kind = ?kind, "link state changed");
                            monitor.record_event(event.clone());
                            monitor.dispatch(&event);
                        }
                    }
                    Err(e) => {
                        warn!(interface = %interface, error = %e, "link observation failed");
                    }
                }
            }
            info!(interface = %interface, "link monitor stopped");
        });
        self.tasks.lock().await.push(handle);
    }

    /// Stop all watch tasks. Terminal for this monitor instance.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        futures::future::join_all(tasks.drain(..)).await;
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Append to the bounded event log.
    fn record_event(&self, event: NetworkEvent) {
        let mut events = Self::write_lock(&self.events);
        events.push_back(event);
        while events.len() > self.network.event_log_capacity {
            events.pop_front();
        }
    }

    /// Dispatch an event to registered handlers, in registration order.
    /// Each handler runs to completion before the next; failures and panics
    /// are logged and skipped.
    fn dispatch(&self, event: &NetworkEvent) {
        let handlers: Vec<(HandlerId, EventHandler)> = Self::read_lock(&self.handlers)
            .get(&event.kind)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(handler = id.0, kind = ?event.kind, error = %e, "event handler failed");
                }
                Err(_) => {
                    error!(handler = id.0, kind = ?event.kind, "event handler panicked");
                }
            }
        }
    }

    pub fn register_handler(&self, kind: NetworkEventKind, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::SeqCst));
        Self::write_lock(&self.handlers)
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        let mut handlers = Self::write_lock(&self.handlers);
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Newest-first slice of the event log.
    pub fn recent_events(&self, limit: usize) -> Vec<NetworkEvent> {
        Self::read_lock(&self.events)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Tracked link state plus a live snapshot of the primary interface.
    pub async fn interface_status(&self) -> InterfaceStatus {
        let interface = Self::read_lock(&self.primary_interface).clone();
        let link = Self::read_lock(&self.link_states)
            .get(&interface)
            .copied()
            .unwrap_or(LinkState::Unknown);
        InterfaceStatus {
            link,
            state: netinfo::interface_state(&interface).await,
        }
    }

    pub fn primary_interface(&self) -> String {
        Self::read_lock(&self.primary_interface).clone()
    }

    /// Reconfigure the connect auto-run behavior at runtime.
    pub fn set_auto_run(&self, enabled: bool, plugins: Option<Vec<String>>) {
        self.auto_run.store(enabled, Ordering::SeqCst);
        if let Some(plugins) = plugins {
            *Self::write_lock(&self.auto_run_plugins) = plugins;
        }
        info!(enabled, "auto-run on connect updated");
    }

    pub fn auto_run_enabled(&self) -> bool {
        self.auto_run.load(Ordering::SeqCst)
    }

    pub fn auto_run_plugins(&self) -> Vec<String> {
        Self::read_lock(&self.auto_run_plugins).clone()
    }
}

/// Register the connect handler that runs the configured diagnostic
/// sequence whenever the link comes up.
pub fn install_auto_run(
    monitor: &Arc<LinkStateMonitor>,
    engine: Arc<ExecutionEngine>,
) -> HandlerId {
    let weak = Arc::downgrade(monitor);
    monitor.register_handler(
        NetworkEventKind::Connect,
        Arc::new(move |event: &NetworkEvent| {
            let Some(monitor) = weak.upgrade() else {
                return Ok(());
            };
            if !monitor.auto_run_enabled() {
                return Ok(());
            }
            let plugins = monitor.auto_run_plugins();
            if plugins.is_empty() {
                return Ok(());
            }
            info!(interface = %event.interface, plugins = ?plugins, "link up, starting auto-run sequence");
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if let Err(e) = engine.run_sequence(plugins, true, None).await {
                    warn!(error = %e, "auto-run sequence failed to start");
                }
            });
            Ok(())
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn test_network(interface: &str) -> NetworkConfig {
        NetworkConfig {
            interface: interface.to_string(),
            poll_interval: 1,
            monitor_method: "poll".to_string(),
            auto_run_on_connect: false,
            default_plugins: vec![],
            helper_status_file: std::env::temp_dir().join("netprobe_test_status"),
            event_log_capacity: 5,
        }
    }

    fn event(kind: NetworkEventKind) -> NetworkEvent {
        NetworkEvent {
            kind,
            interface: "test0".to_string(),
            timestamp: Utc::now(),
            state: InterfaceState {
                interface: "test0".to_string(),
                exists: false,
                up: kind == NetworkEventKind::Connect,
                carrier: kind == NetworkEventKind::Connect,
                addresses: Default::default(),
                observed_at: Utc::now(),
            },
        }
    }

    /// Strategy that replays a fixed series of observations, holding the
    /// final value once the script is exhausted.
    struct ScriptedDetector {
        script: Mutex<(VecDeque<bool>, bool)>,
    }

    impl ScriptedDetector {
        fn new(observations: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new((observations.iter().copied().collect(), false)),
            })
        }
    }

    #[async_trait]
    impl DetectionStrategy for ScriptedDetector {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn observe(&self, _interface: &str) -> Result<bool> {
            let mut script = self.script.lock().unwrap();
            if let Some(value) = script.0.pop_front() {
                script.1 = value;
            }
            Ok(script.1)
        }
    }

    #[test]
    fn transition_emits_edges_only() {
        let mut last = LinkState::Unknown;
        let observed = [true, true, false, false, true];
        let edges: Vec<_> = observed
            .iter()
            .filter_map(|&up| transition(&mut last, up))
            .collect();
        assert_eq!(
            edges,
            vec![
                NetworkEventKind::Connect,
                NetworkEventKind::Disconnect,
                NetworkEventKind::Connect
            ]
        );
        assert_eq!(last, LinkState::Up);
    }

    #[test]
    fn first_observation_down_is_silent() {
        let mut last = LinkState::Unknown;
        assert_eq!(transition(&mut last, false), None);
        assert_eq!(last, LinkState::Down);
        assert_eq!(transition(&mut last, true), Some(NetworkEventKind::Connect));
    }

    #[tokio::test]
    async fn handlers_run_in_order_and_failures_are_isolated() {
        let monitor = LinkStateMonitor::new(test_network("test0"));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&calls);
        monitor.register_handler(
            NetworkEventKind::Connect,
            Arc::new(move |_e| {
                c.lock().unwrap().push("first");
                Ok(())
            }),
        );
        monitor.register_handler(
            NetworkEventKind::Connect,
            Arc::new(|_e| Err(NetProbeError::MonitorError("boom".to_string()))),
        );
        let c = Arc::clone(&calls);
        monitor.register_handler(
            NetworkEventKind::Connect,
            Arc::new(move |_e| {
                c.lock().unwrap().push("third");
                Ok(())
            }),
        );

        monitor.dispatch(&event(NetworkEventKind::Connect));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "third"]);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_dispatch() {
        let monitor = LinkStateMonitor::new(test_network("test0"));
        monitor.register_handler(NetworkEventKind::Connect, Arc::new(|_e| panic!("bad")));
        let hit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&hit);
        monitor.register_handler(
            NetworkEventKind::Connect,
            Arc::new(move |_e| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        );
        monitor.dispatch(&event(NetworkEventKind::Connect));
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn disconnect_handlers_see_only_disconnects() {
        let monitor = LinkStateMonitor::new(test_network("test0"));
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        monitor.register_handler(
            NetworkEventKind::Disconnect,
            Arc::new(move |_e| {
                *counter.lock().unwrap() += 1;
                Ok(())
            }),
        );
        monitor.dispatch(&event(NetworkEventKind::Connect));
        monitor.dispatch(&event(NetworkEventKind::Disconnect));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn unregistered_handler_is_not_called() {
        let monitor = LinkStateMonitor::new(test_network("test0"));
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let id = monitor.register_handler(
            NetworkEventKind::Connect,
            Arc::new(move |_e| {
                *counter.lock().unwrap() += 1;
                Ok(())
            }),
        );
        monitor.dispatch(&event(NetworkEventKind::Connect));
        assert!(monitor.unregister_handler(id));
        assert!(!monitor.unregister_handler(id));
        monitor.dispatch(&event(NetworkEventKind::Connect));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn event_log_is_bounded_and_newest_first() {
        let monitor = LinkStateMonitor::new(test_network("test0"));
        for i in 0..8 {
            let mut e = event(if i % 2 == 0 {
                NetworkEventKind::Connect
            } else {
                NetworkEventKind::Disconnect
            });
            e.timestamp = Utc::now() + chrono::Duration::seconds(i);
            monitor.record_event(e);
        }
        let recent = monitor.recent_events(100);
        // capacity is 5
        assert_eq!(recent.len(), 5);
        assert!(recent[0].timestamp > recent[4].timestamp);
        assert_eq!(monitor.recent_events(2).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_loop_emits_edges_from_observations() {
        let monitor = LinkStateMonitor::new(test_network("scripted0"));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        monitor.register_handler(
            NetworkEventKind::Connect,
            Arc::new(move |e| {
                sink.lock().unwrap().push(e.kind);
                Ok(())
            }),
        );
        let sink = Arc::clone(&events);
        monitor.register_handler(
            NetworkEventKind::Disconnect,
            Arc::new(move |e| {
                sink.lock().unwrap().push(e.kind);
                Ok(())
            }),
        );

        let strategy = ScriptedDetector::new(&[true, true, false, false, true]);
        monitor
            .watch_interface("scripted0".to_string(), strategy)
            .await;

        // five poll ticks plus slack, virtual time
        tokio::time::sleep(Duration::from_secs(7)).await;
        monitor.stop().await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                NetworkEventKind::Connect,
                NetworkEventKind::Disconnect,
                NetworkEventKind::Connect
            ]
        );
        assert_eq!(monitor.recent_events(10).len(), 3);
    }

    #[tokio::test]
    async fn set_auto_run_updates_flag_and_sequence() {
        let monitor = LinkStateMonitor::new(test_network("test0"));
        assert!(!monitor.auto_run_enabled());
        monitor.set_auto_run(true, Some(vec!["ping".to_string()]));
        assert!(monitor.auto_run_enabled());
        assert_eq!(monitor.auto_run_plugins(), vec!["ping".to_string()]);
        monitor.set_auto_run(false, None);
        assert!(!monitor.auto_run_enabled());
        assert_eq!(monitor.auto_run_plugins(), vec!["ping".to_string()]);
    }
}
