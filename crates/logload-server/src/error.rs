//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use logload_common::PipelineError;
use serde_json::json;
use thiserror::Error;

pub type ServerResult<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ServerError {
    /// `400` tells the trigger not to redeliver, `500` asks it to retry.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(err) if err.is_permanent() => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Invocation failed");
        } else {
            tracing::warn!(error = %self, "Rejected invocation");
        }

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::from(PipelineError::invalid_event("no bucket")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::from(PipelineError::config("DEST_BUCKET_NAME unset")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServerError::from(PipelineError::Cancelled { phase: "reading" }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServerError::BadRequest("unsupported content type".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
