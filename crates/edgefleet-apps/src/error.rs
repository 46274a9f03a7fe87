//! Error types for the app manager and app-status informer.

use edgefleet_bus::BusError;
use edgefleet_cluster::ClusterError;
use edgefleet_core::page::PageError;
use edgefleet_core::{BatchResp, Coded, ErrorCode, ValidationError};
use edgefleet_state::StateError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
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

    #[error("malformed stored document: {0}")]
    Json(#[from] serde_json::Error),

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

    /// A deploy failed part way and was rolled back; `batch` names the
    /// failing group and any group whose rollback failed.
    #[error("deploy into node group {group_id} failed: {source}")]
    DeployFailed {
        group_id: u64,
        #[source]
        source: Box<AppError>,
        batch: BatchResp,
    },
}

impl AppError {
    /// Map a unique violation to a `Duplicate` naming `name`.
    pub(crate) fn duplicate_on(name: &str) -> impl FnOnce(StateError) -> AppError + '_ {
        move |e| {
            if e.is_unique_violation() {
                AppError::Duplicate(name.to_string())
            } else {
                AppError::State(e)
            }
        }
    }
}

impl Coded for AppError {
    fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) | AppError::Page(_) | AppError::Invalid(_) => {
                ErrorCode::ParamInvalid
            }
            AppError::State(e) => e.code(),
            AppError::Cluster(e) => e.code(),
            AppError::Bus(e) => e.code(),
            AppError::Json(_) => ErrorCode::Internal,
            AppError::NotFound(_) => ErrorCode::RecordNotFound,
            AppError::Duplicate(_) => ErrorCode::Duplicate,
            AppError::CountExceeded { .. } => ErrorCode::CountExceeded,
            AppError::CheckFailed(_) => ErrorCode::CheckFailed,
            AppError::DeployFailed { source, .. } => source.code(),
        }
    }
}
