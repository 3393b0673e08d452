use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Body shape for a 400 response, matching the `{details, choices}` contract.
#[derive(Debug, Serialize)]
pub struct ValidationBody {
    pub details: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

#[derive(Error, Debug)]
pub enum TileServerError {
    /// Startup-fatal: the serialized config failed to compile into a Config.
    #[error("schema error: {0}")]
    SchemaError(String),

    /// 4xx, recovered at the request boundary. `choices` lists the valid
    /// alternatives when the rejection was an unknown name (field, layer, view).
    #[error("validation error: {details}")]
    ValidationError {
        details: String,
        choices: Vec<String>,
    },

    #[error("not found: {0}")]
    NotFoundError(String),

    #[error("storage error: {0}")]
    StorageError(#[from] tokio_postgres::Error),

    #[error("postgres pool error: {0}")]
    PostgresPoolError(#[from] deadpool_postgres::PoolError),

    #[error("postgres pool build error: {0}")]
    PostgresPoolBuildError(#[from] deadpool_postgres::CreatePoolError),

    #[error("cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TileServerError {
    pub fn validation(details: impl Into<String>) -> Self {
        TileServerError::ValidationError {
            details: details.into(),
            choices: Vec::new(),
        }
    }

    pub fn validation_with_choices(details: impl Into<String>, choices: Vec<String>) -> Self {
        TileServerError::ValidationError {
            details: details.into(),
            choices,
        }
    }
}

impl IntoResponse for TileServerError {
    fn into_response(self) -> Response {
        match self {
            TileServerError::SchemaError(ref msg) => {
                tracing::error!(error = %msg, "schema error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
            TileServerError::ValidationError {
                ref details,
                ref choices,
            } => {
                tracing::warn!(details = %details, "rejected write");
                (
                    StatusCode::BAD_REQUEST,
                    axum::Json(ValidationBody {
                        details: details.clone(),
                        choices: choices.clone(),
                    }),
                )
                    .into_response()
            }
            TileServerError::NotFoundError(ref what) => {
                (StatusCode::NOT_FOUND, what.clone()).into_response()
            }
            TileServerError::StorageError(ref e) => {
                tracing::error!(error = %e, "storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage error".to_string()).into_response()
            }
            TileServerError::PostgresPoolError(ref e) => {
                tracing::error!(error = %e, "postgres pool error");
                (StatusCode::INTERNAL_SERVER_ERROR, "pool error".to_string()).into_response()
            }
            TileServerError::PostgresPoolBuildError(ref e) => {
                tracing::error!(error = %e, "postgres pool build error");
                (StatusCode::INTERNAL_SERVER_ERROR, "pool error".to_string()).into_response()
            }
            TileServerError::CacheError(ref e) => {
                tracing::error!(error = %e, "cache error");
                (StatusCode::INTERNAL_SERVER_ERROR, "cache error".to_string()).into_response()
            }
            TileServerError::Internal(ref e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
                    .into_response()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TileServerError>;
