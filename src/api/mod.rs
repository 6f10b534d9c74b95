//! REST API module
//!
//! HTTP surface over the plugin engine and link monitor.

pub mod handlers;
pub mod routes;
pub mod server;

pub use handlers::AppState;
pub use server::ApiServer;
