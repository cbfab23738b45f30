use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::request::ErrorFlags;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Backend(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("{0}")]
    Provider(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("other: {0}")]
    Other(String),
}

impl ServiceError {
    pub fn error_flags(&self) -> ErrorFlags {
        match self {
            ServiceError::InvalidRequest(_) => ErrorFlags {
                is_retriable: false,
                is_fatal: false,
            },
            ServiceError::Unsupported(_) => ErrorFlags {
                is_retriable: false,
                is_fatal: true,
            },
            _ => ErrorFlags {
                is_retriable: true,
                is_fatal: false,
            },
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            ServiceError::Provider(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Backend(_)
            | ServiceError::Tokenizer(_)
            | ServiceError::Cache(_)
            | ServiceError::Dataset(_)
            | ServiceError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
