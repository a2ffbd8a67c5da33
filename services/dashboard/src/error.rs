use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors raised by the persistence backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Missing required configuration: {0}")]
    NotConfigured(&'static str),

    #[error("Document store error: {0}")]
    DocumentStore(#[from] mongodb::error::Error),

    #[error("Key-value store error: {0}")]
    KeyValue(String),
}

/// Errors raised by the image analysis adapter
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Missing required configuration: {0}")]
    NotConfigured(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Inference API returned no text")]
    EmptyResponse,
}

/// Request-level errors, each mapped to one HTTP status
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("Failed to load ingestion source: {0}")]
    Source(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Shorthand for a missing-parameter rejection
    pub fn missing(params: &str) -> Self {
        ApiError::Validation(format!("Missing required parameters: {params}"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Inference(_) | ApiError::Source(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Store(_) => "BACKEND_ERROR",
            ApiError::Inference(_) => "INFERENCE_ERROR",
            ApiError::Source(_) => "SOURCE_ERROR",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ApiError::Validation(message) | ApiError::NotFound(message) => ErrorResponse {
                error: message.clone(),
                code: self.code().to_string(),
                details: None,
            },
            ApiError::Store(e) => {
                error!(error = %e, "Backend request failed");
                metrics::counter!("dashboard.requests.failed").increment(1);
                ErrorResponse {
                    error: "Internal server error".to_string(),
                    code: self.code().to_string(),
                    details: Some(e.to_string()),
                }
            }
            ApiError::Inference(e) => {
                error!(error = %e, "Image analysis failed");
                metrics::counter!("dashboard.requests.failed").increment(1);
                ErrorResponse {
                    error: "Failed to analyze image".to_string(),
                    code: self.code().to_string(),
                    details: Some(e.to_string()),
                }
            }
            ApiError::Source(message) => {
                error!(error = %message, "Ingestion source unavailable");
                metrics::counter!("dashboard.requests.failed").increment(1);
                ErrorResponse {
                    error: "Failed to ingest records".to_string(),
                    code: self.code().to_string(),
                    details: Some(message.clone()),
                }
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::missing("user_email").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::NotFound("Record not found".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StoreError::NotConfigured("document_store.uri")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(InferenceError::EmptyResponse).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_message() {
        let err = ApiError::missing("collection, user_email");
        assert_eq!(
            err.to_string(),
            "Missing required parameters: collection, user_email"
        );
    }
}
