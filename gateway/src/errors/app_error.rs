use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use super::pipeline_error::PipelineError;

pub type AppResult<T> = Result<T, AppError>;

/// Errors returned by HTTP handlers
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Pipeline(err) => match err {
                PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                PipelineError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::UpstreamProtocol { .. } => StatusCode::BAD_GATEWAY,
                PipelineError::Synthesis { .. } | PipelineError::Cancelled { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({ "error": self.to_string() });

        if let AppError::Pipeline(err) = &self {
            body["stage"] = json!(err.stage().as_str());
            if let Some(chunk_index) = err.chunk_index() {
                body["chunk_index"] = json!(chunk_index);
            }
        }

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_status_mapping() {
        let timeout = AppError::from(PipelineError::UpstreamTimeout {
            chunk_index: 0,
            timeout_ms: 10,
        });
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let protocol = AppError::from(PipelineError::UpstreamProtocol {
            chunk_index: 0,
            message: "status 500".to_string(),
        });
        assert_eq!(protocol.status_code(), StatusCode::BAD_GATEWAY);

        let invalid = AppError::from(PipelineError::InvalidInput("empty".to_string()));
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_error_body_includes_stage() {
        let response = AppError::from(PipelineError::Synthesis {
            chunk_index: 3,
            window_index: 1,
            message: "codec failure".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["stage"], "synthesis");
        assert_eq!(json["chunk_index"], 3);
    }
}
