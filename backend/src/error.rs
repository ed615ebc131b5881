//! Failures of an analysis step.
//!
//! Each public operation returns either its typed outcome or one of these.
//! Nothing here is a panic path: remote and storage errors are caught at the
//! component boundary and converted.

use crate::geo::GeoError;
use crate::models::{BoundaryError, DateWindowError};

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A mandatory collection window had no images.
    #[error("{0}")]
    ImageUnavailable(String),

    /// Valid/total pixel ratio below the floor. Triggers the radar fallback,
    /// so it only escapes when it is reported on its own.
    #[error("insufficient optical coverage: {ratio:.2} < {floor:.2}")]
    InsufficientCoverage { ratio: f64, floor: f64 },

    /// Neither optical nor radar data was usable.
    #[error("{0}")]
    SourceExhausted(String),

    /// A cached payload could not be used.
    #[error("cache read failed: {0}")]
    CacheReadFailure(String),

    #[error("remote service failure: {0}")]
    RemoteServiceFailure(#[from] GeoError),

    /// The licensing gate refused the request.
    #[error("{0}")]
    AccessDenied(String),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AnalysisError {
    /// Stable machine-readable code for API bodies and job logs.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::ImageUnavailable(_) => "IMAGE_UNAVAILABLE",
            AnalysisError::InsufficientCoverage { .. } => "INSUFFICIENT_COVERAGE",
            AnalysisError::SourceExhausted(_) => "SOURCE_EXHAUSTED",
            AnalysisError::CacheReadFailure(_) => "CACHE_READ_FAILURE",
            AnalysisError::RemoteServiceFailure(_) => "REMOTE_SERVICE_FAILURE",
            AnalysisError::AccessDenied(_) => "ACCESS_DENIED",
            AnalysisError::Cancelled => "CANCELLED",
            AnalysisError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

impl From<BoundaryError> for AnalysisError {
    fn from(err: BoundaryError) -> Self {
        AnalysisError::InvalidRequest(err.to_string())
    }
}

impl From<DateWindowError> for AnalysisError {
    fn from(err: DateWindowError) -> Self {
        AnalysisError::InvalidRequest(err.to_string())
    }
}
