//! Server errors and their rendering as JSON HTTP responses.

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use scopehub_sync::{SyncError, WebhookError};

/// Error surface for configuration, runtime, notification and HTTP handling.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Sync(#[from] SyncError),

    #[error("{0}")]
    Webhook(#[from] WebhookError),

    #[error("publishing to {topic} timed out after {timeout_ms}ms")]
    PublishTimeout { topic: String, timeout_ms: u128 },

    #[error("background task failed: {0}")]
    Join(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ServerError {
    ServerError::Io {
        path: path.into(),
        source,
    }
}

// ---------------------------------------------------------------------------
// HTTP mapping
// ---------------------------------------------------------------------------

pub type ApiResult<T> = Result<T, ApiError>;

/// An error ready to be rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Authentication failures never say which check failed.
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::ScopeNotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::InvalidSourceType { .. } | SyncError::InvalidScopeId { .. } => {
                StatusCode::BAD_REQUEST
            }
            SyncError::Fetch { .. } | SyncError::FetchTimeout { .. } => StatusCode::BAD_GATEWAY,
            SyncError::NonFastForward { .. }
            | SyncError::DiffBaseUnresolvable { .. }
            | SyncError::SourceChanged { .. }
            | SyncError::NothingToPull { .. } => StatusCode::CONFLICT,
            SyncError::Registry(_) | SyncError::Git(_) | SyncError::Io { .. } => {
                tracing::error!(error = %err, "internal error while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidSignature => Self::unauthorized(),
            WebhookError::MalformedPayload(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
        }
    }
}

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Sync(err) => err.into(),
            ServerError::Webhook(err) => err.into(),
            other => {
                tracing::error!(error = %other, "internal error while serving request");
                Self::internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SyncError::ScopeNotFound { scope_id: "x".into() }, StatusCode::NOT_FOUND)]
    #[case(SyncError::InvalidSourceType { source_type: "svn".into() }, StatusCode::BAD_REQUEST)]
    #[case(SyncError::Fetch { url: "u".into(), message: "m".into() }, StatusCode::BAD_GATEWAY)]
    #[case(SyncError::FetchTimeout { url: "u".into(), timeout_secs: 1 }, StatusCode::BAD_GATEWAY)]
    #[case(SyncError::NonFastForward { local: "a".into(), upstream: "b".into() }, StatusCode::CONFLICT)]
    #[case(SyncError::DiffBaseUnresolvable { base: "a".into(), target: "b".into() }, StatusCode::CONFLICT)]
    #[case(SyncError::SourceChanged { scope_id: "x".into() }, StatusCode::CONFLICT)]
    fn sync_errors_map_to_status(#[case] err: SyncError, #[case] status: StatusCode) {
        assert_eq!(ApiError::from(err).status, status);
    }

    #[test]
    fn invalid_source_type_body_names_the_type() {
        let err = ApiError::from(SyncError::InvalidSourceType {
            source_type: "svn".into(),
        });
        assert_eq!(err.message, "Invalid scope source type: svn");
    }

    #[test]
    fn bad_signature_leaks_nothing() {
        let err = ApiError::from(WebhookError::InvalidSignature);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "unauthorized");
    }

    #[test]
    fn server_side_failures_render_as_internal() {
        let err = ApiError::from(ServerError::PublishTimeout {
            topic: "policy:demo".into(),
            timeout_ms: 50,
        });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("policy:demo"), "got: {}", err.message);

        let err = ApiError::from(ServerError::Sync(SyncError::ScopeNotFound {
            scope_id: "x".into(),
        }));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
