use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("model has not been loaded yet")]
    ModelNotLoaded,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("generation failed: {0}")]
    Generation(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::Load(_) | ServiceError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Tokenizer(_) | ServiceError::Generation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
