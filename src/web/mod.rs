//! REST surface of the execution core.

mod routes;

use crate::core::{ClosureError, ErrorClass};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub use routes::{ApiState, closure_router};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Closure(ClosureError),
    Input(String),
    NotFound(String),
    Internal(String),
}

impl From<ClosureError> for WebError {
    fn from(err: ClosureError) -> Self {
        WebError::Closure(err)
    }
}

impl WebError {
    fn parts(self) -> (StatusCode, String, &'static str) {
        match self {
            WebError::Closure(err) => {
                let message = err.to_string();
                match err.class() {
                    ErrorClass::Validation => {
                        let (status, code) = match err {
                            ClosureError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                            ClosureError::IllegalTransition { .. } => {
                                (StatusCode::BAD_REQUEST, "illegal_transition")
                            }
                            ClosureError::ConcurrencyViolation { .. } => {
                                (StatusCode::BAD_REQUEST, "concurrency_violation")
                            }
                            _ => (StatusCode::BAD_REQUEST, "validation_error"),
                        };
                        (status, message, code)
                    }
                    ErrorClass::Conflict => (StatusCode::CONFLICT, message, "conflict"),
                    ErrorClass::Infrastructure | ErrorClass::SideChannel => {
                        (StatusCode::INTERNAL_SERVER_ERROR, message, "internal_error")
                    }
                }
            }
            WebError::Input(msg) => (StatusCode::BAD_REQUEST, msg, "input_error"),
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found"),
            WebError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, "internal_error"),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = self.parts();
        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;
