//! Error types for the node manager and node informer.

use edgefleet_bus::BusError;
use edgefleet_cluster::ClusterError;
use edgefleet_core::page::PageError;
use edgefleet_core::{Coded, ErrorCode, ValidationError};
use edgefleet_state::StateError;
use thiserror::Error;

pub type NodeResult<T> = Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid page: {0}")]
    Page(#[from] PageError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("{what} count would reach {count}, the maximum is {max}")]
    CountExceeded {
        what: &'static str,
        count: u64,
        max: u64,
    },

    #[error("{0}")]
    CheckFailed(String),

    #[error("{0}")]
    Invalid(String),
}

impl NodeError {
    /// Map a unique violation to a `Duplicate` naming `name`.
    pub(crate) fn duplicate_on(name: &str) -> impl FnOnce(StateError) -> NodeError + '_ {
        move |e| {
            if e.is_unique_violation() {
                NodeError::Duplicate(name.to_string())
            } else {
                NodeError::State(e)
            }
        }
    }
}

impl Coded for NodeError {
    fn code(&self) -> ErrorCode {
        match self {
            NodeError::Validation(_) | NodeError::Page(_) | NodeError::Invalid(_) => {
                ErrorCode::ParamInvalid
            }
            NodeError::State(e) => e.code(),
            NodeError::Cluster(e) => e.code(),
            NodeError::Bus(e) => e.code(),
            NodeError::NotFound(_) => ErrorCode::RecordNotFound,
            NodeError::Duplicate(_) => ErrorCode::Duplicate,
            NodeError::CountExceeded { .. } => ErrorCode::CountExceeded,
            NodeError::CheckFailed(_) => ErrorCode::CheckFailed,
        }
    }
}
