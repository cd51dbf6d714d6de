use crate::api::v1::handler::ApiResponse;
use crate::application_port::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let code = if let Some(code) = err.find::<ApiErrorCode>() {
        code.clone()
    } else if err.is_not_found() {
        ApiErrorCode::NotFound
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        ApiErrorCode::MethodNotAllowed
    } else {
        ApiErrorCode::internal(format!("unhandled rejection: {:?}", err))
    };

    let json = warp::reply::json(&ApiResponse::<()>::err(code.clone(), code.to_string()));
    Ok(warp::reply::with_status(json, code.status()))
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
pub enum ApiErrorCode {
    #[error("Header 'name' is missing")]
    MissingPrincipal,
    #[error("Header 'name' is not a valid user name")]
    InvalidPrincipal,
    #[error("Refresh token is missing")]
    MissingRefreshToken,
    #[error("Token is not valid")]
    InvalidToken,
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Internal error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        warn!("Internal error: {}", error);
        ApiErrorCode::InternalError
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::MissingPrincipal
            | ApiErrorCode::InvalidPrincipal
            | ApiErrorCode::MissingRefreshToken => StatusCode::BAD_REQUEST,
            ApiErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl reject::Reject for ApiErrorCode {}

// Missing, mismatched and expired sessions look the same from outside.
impl From<SessionError> for ApiErrorCode {
    fn from(error: SessionError) -> Self {
        if error.is_rejection() {
            ApiErrorCode::InvalidToken
        } else {
            ApiErrorCode::internal(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_collapse_to_one_code() {
        for e in [
            SessionError::InvalidSession,
            SessionError::InvalidCredential,
            SessionError::SessionExpired,
        ] {
            assert_eq!(ApiErrorCode::from(e), ApiErrorCode::InvalidToken);
        }
    }

    #[test]
    fn internal_failures_hide_detail() {
        let code = ApiErrorCode::from(SessionError::Storage("mysql get: boom".into()));
        assert_eq!(code, ApiErrorCode::InternalError);
        assert!(!code.to_string().contains("boom"));
        assert_eq!(code.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
