//! Error types for cluster facade calls.

use edgefleet_core::{Coded, ErrorCode};
use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Optimistic-concurrency conflict on an update.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network-class failure; the call may be retried.
    #[error("transient cluster failure: {0}")]
    Transient(String),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("cluster error: {0}")]
    Other(String),
}

impl ClusterError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ClusterError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        ClusterError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Transient(_))
    }
}

impl Coded for ClusterError {
    fn code(&self) -> ErrorCode {
        match self {
            ClusterError::Invalid(_) => ErrorCode::ParamInvalid,
            _ => ErrorCode::ClusterError,
        }
    }
}
