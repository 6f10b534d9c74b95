//! Core application layer
//!
//! This module provides the cross-cutting concerns shared by the plugin
//! engine and the network monitor:
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{ErrorResponse, NetProbeError, Result};
pub use logging::Logger;
