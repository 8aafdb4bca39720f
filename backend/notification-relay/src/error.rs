use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ApiResponse;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Missing, invalid or unverifiable credential
    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid Method")]
    MethodNotAllowed,

    /// Missing fields or an undecodable recipient list
    #[error("{0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Unauthorized(_) => 403,
            AppError::MethodNotAllowed => 405,
            AppError::BadRequest(_) => 400,
            AppError::ServiceUnavailable(_) => 503,
            AppError::Config(_) | AppError::StartServer(_) => 500,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self))
            .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
            .json(ApiResponse::error(self.to_string()))
    }
}

impl From<crate::auth::AuthError> for AppError {
    fn from(e: crate::auth::AuthError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Unauthorized("nope".into()).status_code(), 403);
        assert_eq!(AppError::MethodNotAllowed.status_code(), 405);
        assert_eq!(AppError::BadRequest("Bad Request".into()).status_code(), 400);
        assert_eq!(
            AppError::ServiceUnavailable("queue closed".into()).status_code(),
            503
        );
        assert_eq!(AppError::StartServer("bind".into()).status_code(), 500);
    }

    #[test]
    fn test_error_response_envelope() {
        let resp = AppError::MethodNotAllowed.error_response();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }
}
