//! HTTP mapping of ledger errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keyledger::FieldError;
use keyledger_store::LedgerError;

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    /// The blocking task running a store call did not complete.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(LedgerError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Ledger(LedgerError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Ledger(LedgerError::InvalidTransition { .. })
            | ApiError::Ledger(LedgerError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Ledger(LedgerError::Persistence(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<Vec<FieldError>> for ApiError {
    fn from(fields: Vec<FieldError>) -> Self {
        ApiError::Ledger(LedgerError::Validation(fields))
    }
}

impl From<FieldError> for ApiError {
    fn from(field: FieldError) -> Self {
        ApiError::Ledger(LedgerError::Validation(vec![field]))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Ledger(err @ LedgerError::Validation(fields)) => serde_json::json!({
                "error": err.to_string(),
                "kind": "validation",
                "fields": fields,
            }),
            ApiError::Ledger(LedgerError::Persistence(detail)) => {
                tracing::error!(%detail, "store unavailable");
                serde_json::json!({ "error": "storage unavailable", "kind": "persistence" })
            }
            ApiError::Ledger(err) => serde_json::json!({ "error": err.to_string(), "kind": err.kind() }),
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                serde_json::json!({ "error": "internal server error", "kind": "internal" })
            }
        };
        (status, Json(body)).into_response()
    }
}
