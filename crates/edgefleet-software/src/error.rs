//! Error types for the software manager and the edge installer.

use edgefleet_bus::BusError;
use edgefleet_core::{Coded, ErrorCode, ValidationError};
use edgefleet_state::StateError;
use thiserror::Error;

pub type SoftwareResult<T> = Result<T, SoftwareError>;

#[derive(Debug, Error)]
pub enum SoftwareError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl Coded for SoftwareError {
    fn code(&self) -> ErrorCode {
        match self {
            SoftwareError::Validation(_) => ErrorCode::ParamInvalid,
            SoftwareError::State(e) => e.code(),
            SoftwareError::Bus(e) => e.code(),
            SoftwareError::Json(_) | SoftwareError::Io(_) | SoftwareError::Crypto(_) => {
                ErrorCode::Internal
            }
            SoftwareError::NotFound(_) => ErrorCode::RecordNotFound,
        }
    }
}
