use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use desk_memory::RetrievalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Internal(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Unavailable(_) | RetrievalError::Embedding(_) => {
                Self::Unavailable(err.to_string())
            }
            RetrievalError::DimensionMismatch { .. } => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use desk_memory::VectorStoreError;
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn unavailable_renders_503_with_error_body() {
        let err = ApiError::from(RetrievalError::Unavailable(VectorStoreError::Connection(
            "refused".into(),
        )));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("refused"));
    }

    #[test]
    fn dimension_mismatch_is_internal() {
        let err = ApiError::from(RetrievalError::DimensionMismatch {
            expected: 384,
            actual: 3,
        });
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
