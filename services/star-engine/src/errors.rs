use crate::metrics;
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use point_ledger::LedgerError;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Seconds a client should wait before resubmitting a retryable request
const RETRY_AFTER_SECS: &str = "1";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Ledger error reported as a client rejection regardless of kind
    #[error(transparent)]
    Rejected(LedgerError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ApiError {
    /// Burn errors: an unknown project or wallet is a bad request, not a
    /// missing resource
    pub fn burn(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => ApiError::Rejected(err),
            other => ApiError::Ledger(other),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Ledger(e) | ApiError::Rejected(e) => e.kind(),
            ApiError::Validation(_) => "validation_error",
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        if status_code.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", error_message);
        }
        metrics::REQUEST_ERRORS_TOTAL
            .with_label_values(&[self.kind()])
            .inc();

        let mut response = HttpResponse::build(status_code);
        if matches!(self, ApiError::Ledger(e) if e.is_retryable()) {
            response.insert_header(("Retry-After", RETRY_AFTER_SECS));
        }

        response.json(json!({
            "success": false,
            "error": {
                "code": status_code.as_u16(),
                "kind": self.kind(),
                "message": error_message
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(e) => match e {
                LedgerError::Validation(_)
                | LedgerError::Duplicate(_)
                | LedgerError::State(_)
                | LedgerError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
                LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::Retryable(_) => StatusCode::SERVICE_UNAVAILABLE,
                LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Rejected(e) if e.is_rejection() => StatusCode::BAD_REQUEST,
            ApiError::Rejected(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LedgerError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::Duplicate("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::State("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::NotFound("Project".into()), StatusCode::NOT_FOUND),
            (LedgerError::Retryable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (LedgerError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_burn_not_found_is_bad_request() {
        let err = ApiError::burn(LedgerError::NotFound("Project".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "not_found");

        let err = ApiError::burn(LedgerError::Storage("down".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_retryable_sets_retry_after() {
        let response = ApiError::from(LedgerError::Retryable("lock".into())).error_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("Retry-After").unwrap().to_str().unwrap(),
            RETRY_AFTER_SECS
        );
    }
}
