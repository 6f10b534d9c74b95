//! NetProbe — a network diagnostics host
//!
//! A self-contained service that discovers diagnostic plugins on disk, runs
//! them on demand or in sequences under a hard deadline, watches network
//! link state and reacts to connectivity changes, and persists every run
//! result for later retrieval.
//!
//! The crate is organized into four layers:
//! - [`core`]: configuration, errors, logging
//! - [`plugin`]: discovery, loading, execution, result storage
//! - [`monitor`]: link-state detection and event dispatch
//! - [`api`]: the HTTP surface over the other layers

pub mod api;
pub mod core;
pub mod monitor;
pub mod plugin;

pub use crate::core::config::Config;
pub use crate::core::error::{NetProbeError, Result};
pub use crate::monitor::LinkStateMonitor;
pub use crate::plugin::{ExecutionEngine, PluginRegistry, ResultStore};
