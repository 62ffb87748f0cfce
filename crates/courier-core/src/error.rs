//! Error types for courier setup paths.
//!
//! `NetworkClient::request` never returns these: every request failure is a
//! case of [`ResponseOutcome`](crate::ResponseOutcome). `CourierError` covers
//! the fallible work around it, such as building the client, building request
//! descriptors, loading certificates and writing downloads to disk.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for courier.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Failed to build HTTP client: {message}")]
    ClientBuild {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Invalid request field {field}: {message}")]
    InvalidRequest { field: &'static str, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Certificate error: {message}")]
    Certificate { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for courier setup operations.
pub type Result<T> = std::result::Result<T, CourierError>;

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        CourierError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CourierError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CourierError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        CourierError::InvalidRequest {
            field,
            message: message.into(),
        }
    }
}
