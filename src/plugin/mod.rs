//! Plugin system
//!
//! Discovery ([`registry`]), loading ([`loader`]), execution ([`engine`])
//! and result persistence ([`store`]) for diagnostic plugins, plus the
//! builtin diagnostics every installation ships with.

pub mod builtin;
pub mod descriptor;
pub mod engine;
pub mod instance;
pub mod loader;
pub mod registry;
pub mod store;

pub use descriptor::{CatalogEntry, DescriptorSnapshot, ParameterSpec, PluginDescriptor, PluginId};
pub use engine::{CompleteCallback, ExecutionEngine, SequenceCallback, SequenceOutcome};
pub use instance::{
    DiagnosticPlugin, InstanceStatus, LifecycleState, PluginInstance, ProgressCallback, RunContext,
};
pub use loader::{FactoryLoader, PluginLoader};
pub use registry::PluginRegistry;
pub use store::{IndexEntry, ResultStore, RunOutcome, RunRecord};
