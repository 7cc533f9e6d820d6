use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::{metrics, storage::StoreError, types::ValidationError};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    NotFound(String),
    #[error("Storage is unavailable, try again later")]
    Unavailable,
    #[error("Internal error")]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::NotFound(format!("Job id supplied led to no hits: {key}")),
            StoreError::Unavailable(e) => {
                tracing::warn!("Store unavailable: {e}");
                Self::Unavailable
            }
            other => Self::Other(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Validation(err) => {
                metrics::BAD_REQUEST.inc();
                (StatusCode::BAD_REQUEST, Json(err.into_messages())).into_response()
            }
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            s @ Self::Unavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, s.to_string()).into_response()
            }
            Self::Other(err) => {
                tracing::error!("Request failed: {err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Couldn't process request: {err}"),
                )
                    .into_response()
            }
        }
    }
}
