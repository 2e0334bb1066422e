use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::path::PathBuf;

const TRACING_TARGET: &str = "docchat::server";

/// Failure while reading the document directory.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to list documents in {}: {source}", path.display())]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read document {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while opening or draining a completion stream.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("language model returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("language model error: {0}")]
    Model(String),
    #[error("malformed language model response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Anything that ends a chat session early. Its display text becomes the
/// `error` field of the terminal `RUN_FINISHED` event.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("context resolution failed: {0}")]
    ContextResolution(#[from] DocumentError),
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
}

/// Errors returned synchronously by the HTTP handlers, before any stream is
/// opened.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Document not found")]
    NotFound,
    #[error("{0}")]
    MalformedRequest(String),
    #[error(transparent)]
    Documents(#[from] DocumentError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MalformedRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Documents(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: TRACING_TARGET, error = %self, "request failed");
        }
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
