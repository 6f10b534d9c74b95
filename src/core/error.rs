//! Error type system for NetProbe
//!
//! This module provides the error type system with:
//! - Stable error kinds the API layer and callers can branch on
//! - HTTP status code mapping
//! - Retryability classification for callers deciding whether to re-invoke

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Main error type for the NetProbe system
#[derive(Debug, thiserror::Error)]
pub enum NetProbeError {
    // System-level errors
    #[error("System initialization failed: {0}")]
    InitializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Plugin catalog errors
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin unavailable: {0}")]
    PluginUnavailable(String),

    #[error("Plugin already running: {0}")]
    AlreadyRunning(String),

    #[error("Plugin discovery error: {0}")]
    DiscoveryError(String),

    #[error("Plugin load failed: {0}")]
    PluginLoadError(String),

    // Execution errors
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),

    #[error("Execution timed out: {0}")]
    Timeout(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    // Result store errors
    #[error("Result not found: {0}")]
    ResultNotFound(String),

    #[error("Result store error: {0}")]
    StoreError(String),

    // Monitor errors
    #[error("Network monitor error: {0}")]
    MonitorError(String),

    #[error("Detection error: {0}")]
    DetectionError(String),

    // API-related errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // I/O and serialization
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl NetProbeError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            NetProbeError::InvalidRequest(_)
            | NetProbeError::SerializationError(_)
            | NetProbeError::ValidationError(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            NetProbeError::NotFound(_)
            | NetProbeError::PluginNotFound(_)
            | NetProbeError::ResultNotFound(_) => StatusCode::NOT_FOUND,

            // 408 Request Timeout
            NetProbeError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,

            // 409 Conflict
            NetProbeError::AlreadyRunning(_) => StatusCode::CONFLICT,

            // 503 Service Unavailable
            NetProbeError::PluginUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            NetProbeError::InitializationError(_)
            | NetProbeError::ConfigError(_)
            | NetProbeError::DiscoveryError(_)
            | NetProbeError::PluginLoadError(_)
            | NetProbeError::ExecutionError(_)
            | NetProbeError::Cancelled(_)
            | NetProbeError::StoreError(_)
            | NetProbeError::MonitorError(_)
            | NetProbeError::DetectionError(_)
            | NetProbeError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the stable error kind name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            NetProbeError::InitializationError(_) => "InitializationError",
            NetProbeError::ConfigError(_) => "ConfigError",
            NetProbeError::PluginNotFound(_) => "NotFound",
            NetProbeError::PluginUnavailable(_) => "Unavailable",
            NetProbeError::AlreadyRunning(_) => "AlreadyRunning",
            NetProbeError::DiscoveryError(_) => "DiscoveryError",
            NetProbeError::PluginLoadError(_) => "PluginLoadError",
            NetProbeError::ExecutionError(_) => "ExecutionError",
            NetProbeError::Timeout(_) => "Timeout",
            NetProbeError::Cancelled(_) => "Cancelled",
            NetProbeError::ResultNotFound(_) => "ResultNotFound",
            NetProbeError::StoreError(_) => "StoreError",
            NetProbeError::MonitorError(_) => "MonitorError",
            NetProbeError::DetectionError(_) => "DetectionError",
            NetProbeError::InvalidRequest(_) => "InvalidRequest",
            NetProbeError::NotFound(_) => "NotFound",
            NetProbeError::IoError(_) => "IoError",
            NetProbeError::SerializationError(_) => "SerializationError",
            NetProbeError::ValidationError(_) => "ValidationError",
        }
    }

    /// Check if this error is retryable
    ///
    /// `AlreadyRunning` is deliberately not retryable: the caller should poll
    /// status instead of re-invoking immediately. `Unavailable` persists until
    /// the next scan, so a bare retry will not help either.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetProbeError::Timeout(_)
                | NetProbeError::IoError(_)
                | NetProbeError::DetectionError(_)
        )
    }
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error kind identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response with a generated trace ID
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an error response from a NetProbeError
    pub fn from_error(error: &NetProbeError) -> Self {
        Self::new(error.error_type().to_string(), error.to_string())
    }
}

/// Implement IntoResponse for NetProbeError to enable automatic error handling in Axum
impl IntoResponse for NetProbeError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        tracing::error!(
            error_type = self.error_type(),
            trace_id = %error_response.trace_id,
            status_code = %status_code,
            "Request failed: {}",
            self
        );

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with NetProbeError
pub type Result<T> = std::result::Result<T, NetProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            NetProbeError::InvalidRequest("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            NetProbeError::PluginNotFound("test".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            NetProbeError::AlreadyRunning("test".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            NetProbeError::Timeout("test".into()).status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            NetProbeError::PluginUnavailable("test".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            NetProbeError::ExecutionError("test".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_types_are_stable_kinds() {
        assert_eq!(
            NetProbeError::PluginNotFound("ping".into()).error_type(),
            "NotFound"
        );
        assert_eq!(
            NetProbeError::AlreadyRunning("ping".into()).error_type(),
            "AlreadyRunning"
        );
        assert_eq!(
            NetProbeError::PluginUnavailable("ping".into()).error_type(),
            "Unavailable"
        );
        assert_eq!(NetProbeError::Timeout("ping".into()).error_type(), "Timeout");
        assert_eq!(
            NetProbeError::ExecutionError("ping".into()).error_type(),
            "ExecutionError"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(NetProbeError::Timeout("test".into()).is_retryable());
        assert!(!NetProbeError::AlreadyRunning("test".into()).is_retryable());
        assert!(!NetProbeError::PluginUnavailable("test".into()).is_retryable());
        assert!(!NetProbeError::InvalidRequest("test".into()).is_retryable());
    }

    #[test]
    fn test_error_response_creation() {
        let error = NetProbeError::PluginNotFound("arp_scan".into());
        let response = ErrorResponse::from_error(&error);

        assert_eq!(response.error, "NotFound");
        assert!(response.message.contains("arp_scan"));
        assert!(!response.trace_id.is_empty());
    }
}
