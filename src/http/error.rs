use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::domain::order::OrderError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Missing or invalid X-User-Id header")]
    Unauthenticated,

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Order(e) => e.code(),
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Order(e) => e.public_message(),
            ApiError::Internal(_) => "Something went wrong, please try again".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Order(e) => match e {
                OrderError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                OrderError::InvalidTransition { .. }
                | OrderError::InsufficientStock { .. }
                | OrderError::NotSettleable { .. }
                | OrderError::OrderHasSettlement(_)
                | OrderError::DuplicateSettlement(_) => StatusCode::CONFLICT,
                OrderError::EmptyCart
                | OrderError::ProductUnavailable(_)
                | OrderError::InvalidQuantity(_) => StatusCode::UNPROCESSABLE_ENTITY,
                OrderError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        HttpResponse::build(status).json(ErrorBody {
            code: self.code(),
            message: self.public_message(),
        })
    }
}
