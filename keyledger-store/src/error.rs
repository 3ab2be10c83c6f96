//! Error types for repositories, the lifecycle engine and stores.

use keyledger::{FieldError, KeyState};
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("validation failed: {}", describe_fields(.0))]
    Validation(Vec<FieldError>),
    #[error("invalid transition for {id}: cannot {operation} a {from} key")]
    InvalidTransition {
        id: String,
        from: KeyState,
        operation: String,
    },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl LedgerError {
    pub fn key_type_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "key type",
            id: id.to_string(),
        }
    }

    pub fn key_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "crypto key",
            id: id.to_string(),
        }
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn invalid_transition(id: impl ToString, from: KeyState, operation: impl ToString) -> Self {
        Self::InvalidTransition {
            id: id.to_string(),
            from,
            operation: operation.to_string(),
        }
    }

    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::Persistence(_) => "persistence",
        }
    }
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<Vec<FieldError>> for LedgerError {
    fn from(fields: Vec<FieldError>) -> Self {
        Self::Validation(fields)
    }
}

impl From<FieldError> for LedgerError {
    fn from(field: FieldError) -> Self {
        Self::Validation(vec![field])
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(err.to_string())
            }
            _ => Self::Persistence(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("encoding: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_fields() {
        let err = LedgerError::Validation(vec![
            FieldError::new("name", "is required"),
            FieldError::new("size_bits", "must be between 64 and 4096"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: name: is required; size_bits: must be between 64 and 4096"
        );
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn transition_message_names_operation_and_state() {
        let err = LedgerError::invalid_transition("k-1", KeyState::Revoked, "suspend");
        assert_eq!(err.to_string(), "invalid transition for k-1: cannot suspend a Revoked key");
    }

    #[test]
    fn sqlite_constraint_violations_become_conflicts() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: LedgerError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "conflict");
    }
}
