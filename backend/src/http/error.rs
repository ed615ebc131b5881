//! HTTP error handling and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::RepositoryError;
use crate::error::AnalysisError;

/// API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
    Analysis(AnalysisError),
    Repository(RepositoryError),
}

fn analysis_status(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AnalysisError::AccessDenied(_) => StatusCode::FORBIDDEN,
        AnalysisError::ImageUnavailable(_)
        | AnalysisError::SourceExhausted(_)
        | AnalysisError::InsufficientCoverage { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::RemoteServiceFailure(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::CacheReadFailure(_) | AnalysisError::Cancelled => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", msg)),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ApiError::new("BAD_REQUEST", msg))
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTERNAL_ERROR", msg),
            ),
            AppError::Analysis(e) => {
                let mut body = ApiError::new(e.code(), e.to_string());
                if let AnalysisError::RemoteServiceFailure(inner) = &e {
                    body = body.with_details(format!("{:?}", inner));
                }
                (analysis_status(&e), body)
            }
            AppError::Repository(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("REPOSITORY_ERROR", e.to_string()),
            ),
        };

        (status, Json(error)).into_response()
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        AppError::Analysis(err)
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::Repository(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AnalysisError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (AnalysisError::AccessDenied("x".into()), StatusCode::FORBIDDEN),
            (AnalysisError::SourceExhausted("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (AnalysisError::ImageUnavailable("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                AnalysisError::RemoteServiceFailure(crate::geo::GeoError::Network("refused".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
        assert_eq!(
            AppError::NotFound("job".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
