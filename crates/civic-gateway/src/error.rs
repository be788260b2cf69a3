use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use civic_core::wire::ErrorBody;
use civic_store::StoreError;

/// Failure of a gateway request, rendered as `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Store(e) => {
                tracing::error!(error = %e, "store failure");
                "Internal server error".to_string()
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}
