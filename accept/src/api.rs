use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcceptError {
    #[error("id is required")]
    MissingId,
    #[error("invalid id")]
    InvalidId,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // Duplicates and store failures look the same to the caller
    #[error("failed")]
    Duplicate,
    #[error("failed")]
    StoreUnavailable,
}

impl AcceptError {
    /// Label used for the rejection counter.
    pub fn cause(&self) -> &'static str {
        match self {
            AcceptError::MissingId => "missing_id",
            AcceptError::InvalidId => "invalid_id",
            AcceptError::InvalidEndpoint(_) => "invalid_endpoint",
            AcceptError::Duplicate => "duplicate",
            AcceptError::StoreUnavailable => "store_unavailable",
        }
    }
}

impl IntoResponse for AcceptError {
    fn into_response(self) -> Response {
        match self {
            AcceptError::MissingId | AcceptError::InvalidId | AcceptError::InvalidEndpoint(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            AcceptError::Duplicate | AcceptError::StoreUnavailable => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        }
        .into_response()
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to produce window count: {0}")]
    Produce(String),
    #[error("window count was not acknowledged before the write timeout")]
    AckTimeout,
}

/// Query string of `GET /api/verve/accept`. Both fields are kept raw so
/// that validation errors are ours to report, not the extractor's.
#[derive(Debug, Default, Deserialize)]
pub struct AcceptQuery {
    pub id: Option<String>,
    pub endpoint: Option<String>,
}

/// Body POSTed to a caller-supplied callback endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub count: u64,
}
