//! Error types and handling
//!
//! Common error types used across the capture pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Capture-wide error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No cameras available")]
    NoCameras,

    #[error("Camera device {0} unavailable, try rebooting")]
    DeviceUnavailable(usize),

    #[error("Failed to create {resource}: {reason}")]
    ResourceCreation {
        resource: &'static str,
        reason: String,
    },

    #[error("Sensor mode {requested} is not available ({available} modes reported)")]
    SensorModeInvalid { requested: usize, available: usize },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("{worker} did not connect to its stream within {timeout:?}")]
    ConnectTimeout { worker: String, timeout: Duration },

    #[error("Platform error: {0}")]
    Platform(String),
}

impl CaptureError {
    /// Shorthand for a failed resource creation
    pub fn resource(resource: &'static str, reason: impl ToString) -> Self {
        CaptureError::ResourceCreation {
            resource,
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::Configuration(_) => "CONFIGURATION_ERROR",
            CaptureError::Io(_) => "IO_ERROR",
            CaptureError::Serialization(_) => "SERIALIZATION_ERROR",
            CaptureError::NoCameras => "NO_CAMERAS",
            CaptureError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            CaptureError::ResourceCreation { .. } => "RESOURCE_CREATION_ERROR",
            CaptureError::SensorModeInvalid { .. } => "SENSOR_MODE_INVALID",
            CaptureError::Encode(_) => "ENCODE_ERROR",
            CaptureError::Write(_) => "WRITE_ERROR",
            CaptureError::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            CaptureError::Platform(_) => "PLATFORM_ERROR",
        }
    }
}

/// Error report printed by the binary before exiting
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&CaptureError> for ErrorResponse {
    fn from(error: &CaptureError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;
