//! Error types for the module bus.

use edgefleet_core::{Coded, ErrorCode};
use thiserror::Error;

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("module {0} is not registered")]
    UnknownModule(String),

    #[error("module {0} is already registered")]
    AlreadyRegistered(String),

    #[error("no response from {destination} for {resource} within the response window")]
    Timeout { destination: String, resource: String },

    #[error("mailbox of {0} is closed")]
    Closed(String),

    #[error("message content: {0}")]
    Codec(String),

    /// The destination handled the call and answered with a failure code.
    #[error("{msg}")]
    Remote { code: ErrorCode, msg: String },
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Codec(err.to_string())
    }
}

impl Coded for BusError {
    fn code(&self) -> ErrorCode {
        match self {
            BusError::Timeout { .. } => ErrorCode::Timeout,
            BusError::Codec(_) => ErrorCode::ParamConvert,
            BusError::Remote { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }
}
