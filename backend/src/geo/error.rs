//! Errors raised while talking to the geospatial service.

use std::time::Duration;

pub type GeoResult<T> = Result<T, GeoError>;

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to decode service response: {0}")]
    Decode(String),

    #[error("Service returned HTTP {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Unsupported request: {0}")]
    Unsupported(String),
}

impl GeoError {
    /// Timeouts and connection failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, GeoError::Network(_) | GeoError::Timeout(_))
    }
}

impl From<reqwest::Error> for GeoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GeoError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            GeoError::Service {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            GeoError::Network(err.to_string())
        }
    }
}
