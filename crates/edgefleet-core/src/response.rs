//! Module-boundary responses and their stable status codes.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error taxonomy surfaced at the module boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Success,
    ParamConvert,
    ParamInvalid,
    RecordNotFound,
    Duplicate,
    TypeAssert,
    CountExceeded,
    CheckFailed,
    DbError,
    ClusterError,
    Timeout,
    Internal,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 12] = [
        ErrorCode::Success,
        ErrorCode::ParamConvert,
        ErrorCode::ParamInvalid,
        ErrorCode::RecordNotFound,
        ErrorCode::Duplicate,
        ErrorCode::TypeAssert,
        ErrorCode::CountExceeded,
        ErrorCode::CheckFailed,
        ErrorCode::DbError,
        ErrorCode::ClusterError,
        ErrorCode::Timeout,
        ErrorCode::Internal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "00000000",
            ErrorCode::ParamConvert => "10001001",
            ErrorCode::ParamInvalid => "10001002",
            ErrorCode::TypeAssert => "10001003",
            ErrorCode::RecordNotFound => "10002001",
            ErrorCode::Duplicate => "10002002",
            ErrorCode::CountExceeded => "10003001",
            ErrorCode::CheckFailed => "10003002",
            ErrorCode::DbError => "10004001",
            ErrorCode::ClusterError => "10004002",
            ErrorCode::Timeout => "10005001",
            ErrorCode::Internal => "10005002",
        }
    }

    pub fn from_code(code: &str) -> Option<ErrorCode> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know which boundary code they map to.
pub trait Coded: std::fmt::Display {
    fn code(&self) -> ErrorCode;
}

/// Handler result: a status code, a message, and an optional JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespMsg {
    pub status: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RespMsg {
    pub fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                status: ErrorCode::Success.as_str().to_string(),
                msg: String::new(),
                data,
            },
            Err(e) => Self::fail(ErrorCode::Internal, format!("encode response: {e}")),
        }
    }

    pub fn ok_empty() -> Self {
        Self::ok(serde_json::Value::Null)
    }

    pub fn fail(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            status: code.as_str().to_string(),
            msg: msg.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn from_error<E: Coded>(err: &E) -> Self {
        Self::fail(err.code(), err.to_string())
    }

    /// Failure that still carries a payload, e.g. a partially applied batch.
    pub fn fail_with<T: Serialize>(code: ErrorCode, msg: impl Into<String>, data: T) -> Self {
        Self {
            data: serde_json::to_value(data).unwrap_or_default(),
            ..Self::fail(code, msg)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ErrorCode::Success.as_str()
    }

    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(&self.status)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

impl<T: Serialize, E: Coded> From<Result<T, E>> for RespMsg {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => RespMsg::ok(data),
            Err(e) => RespMsg::from_error(&e),
        }
    }
}

/// Outcome of a batch operation that continues past individual failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResp {
    pub success_ids: Vec<u64>,
    pub failed_infos: BTreeMap<u64, String>,
}

impl BatchResp {
    pub fn succeed(&mut self, id: u64) {
        self.success_ids.push(id);
    }

    pub fn fail(&mut self, id: u64, reason: impl Into<String>) {
        self.failed_infos.insert(id, reason.into());
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_infos.is_empty()
    }

    /// Success when nothing failed, otherwise `code` with the batch as payload.
    pub fn into_resp(self, code: ErrorCode) -> RespMsg {
        if self.all_succeeded() {
            RespMsg::ok(self)
        } else {
            let total = self.failed_infos.len() + self.success_ids.len();
            let msg = format!("{} of {total} failed", self.failed_infos.len());
            RespMsg::fail_with(code, msg, self)
        }
    }
}
