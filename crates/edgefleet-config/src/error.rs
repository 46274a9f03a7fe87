//! Error types for the config manager.

use edgefleet_bus::BusError;
use edgefleet_cluster::ClusterError;
use edgefleet_core::{Coded, ErrorCode, ValidationError};
use edgefleet_state::StateError;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    /// Token verification failed or the token has expired.
    #[error("{0}")]
    CheckFailed(String),

    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl Coded for ConfigError {
    fn code(&self) -> ErrorCode {
        match self {
            ConfigError::Validation(_) => ErrorCode::ParamInvalid,
            ConfigError::State(e) => e.code(),
            ConfigError::Cluster(e) => e.code(),
            ConfigError::Bus(e) => e.code(),
            ConfigError::Json(_) | ConfigError::Crypto(_) => ErrorCode::Internal,
            ConfigError::NotFound(_) => ErrorCode::RecordNotFound,
            ConfigError::CheckFailed(_) => ErrorCode::CheckFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_maps_to_not_found() {
        let err = ConfigError::from(StateError::NotFound("token".into()));
        assert_eq!(err.code(), ErrorCode::RecordNotFound);
        assert_eq!(ConfigError::Crypto("rng".into()).code(), ErrorCode::Internal);
    }
}
