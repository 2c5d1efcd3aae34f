use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parlor_core::EncodeError;
use thiserror::Error;
use uuid::Uuid;

use crate::{bus::BusError, store::StoreError};

pub type AppResult<T> = Result<T, AppError>;

/// Errori delle API HTTP. Ogni variante ha il suo status e un `code` stabile per i client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("message {0} not found")]
    NotFound(Uuid),

    #[error("message {0} already exists")]
    Conflict(Uuid),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(id) => AppError::Conflict(id),
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Bus(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::Store(_) => "store_error",
            AppError::Bus(_) => "bus_error",
            AppError::Encode(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // i dettagli dei guasti interni restano nei log, al client va solo il codice
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            format!("{} while handling the request", self.code())
        } else {
            self.to_string()
        };
        let body = parlor_core::Error::new(self.code(), message);
        (status, Json(body)).into_response()
    }
}
