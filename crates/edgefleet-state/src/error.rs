//! Error types for the EdgeFleet state store.

use edgefleet_core::{Coded, ErrorCode};
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
///
/// Unique violations are kept apart from other SQLite failures because
/// callers turn them into a user-facing "already exists" response.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("sqlite error: {0}")]
    Sqlite(String),
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StateError::UniqueViolation(_))
    }
}

impl From<rusqlite::Error> for StateError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => StateError::NotFound(err.to_string()),
            rusqlite::Error::SqliteFailure(code, msg) => {
                let detail = msg.clone().unwrap_or_else(|| err.to_string());
                match code.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        StateError::UniqueViolation(detail)
                    }
                    _ if code.code == rusqlite::ErrorCode::ConstraintViolation => {
                        StateError::Constraint(detail)
                    }
                    _ => StateError::Sqlite(detail),
                }
            }
            _ => StateError::Sqlite(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialize(err.to_string())
    }
}

impl Coded for StateError {
    fn code(&self) -> ErrorCode {
        match self {
            StateError::NotFound(_) => ErrorCode::RecordNotFound,
            StateError::UniqueViolation(_) => ErrorCode::Duplicate,
            _ => ErrorCode::DbError,
        }
    }
}
