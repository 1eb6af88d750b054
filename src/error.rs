use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Failures talking to the remote object store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The stored revision moved on, or a create hit an existing path.
    #[error("conflict writing {path} ({status}): {detail}")]
    Conflict {
        path: String,
        status: u16,
        detail: String,
    },

    #[error("remote store returned {status}: {detail}")]
    Remote { status: u16, detail: String },

    #[error("request to remote store failed: {message}")]
    Transport { message: String },

    #[error("could not decode remote response: {message}")]
    Decode { message: String },
}

impl StoreError {
    /// HTTP status reported by the remote store, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::NotFound { .. } => Some(404),
            StoreError::Conflict { status, .. } | StoreError::Remote { status, .. } => {
                Some(*status)
            }
            StoreError::Transport { .. } | StoreError::Decode { .. } => None,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            StoreError::Conflict { detail, .. } | StoreError::Remote { detail, .. } => {
                detail.clone()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport {
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("manifest is not valid: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{0}")]
    Validation(String),

    #[error("image write failed: {0}")]
    Store(#[from] StoreError),

    /// No trustworthy timestamp to name the image with.
    #[error("system clock unavailable")]
    Clock,
}

impl ResponseError for UploadError {
    fn status_code(&self) -> StatusCode {
        match self {
            UploadError::Validation(_) => StatusCode::BAD_REQUEST,
            UploadError::Store(_) | UploadError::Clock => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            UploadError::Validation(msg) => json!({
                "error": "invalid upload",
                "detail": msg,
            }),
            UploadError::Store(err) => json!({
                "error": "github upload failed",
                "status_code": err.status(),
                "detail": err.detail(),
            }),
            UploadError::Clock => json!({
                "error": "clock unavailable",
                "detail": self.to_string(),
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
