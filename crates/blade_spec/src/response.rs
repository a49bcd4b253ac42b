use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Code carried by every successful response.
pub const OK_CODE: i32 = 200;

/// Domain failure kinds. Each maps to a fixed numeric code in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ParameterLess,
    ParameterIllegal,
    DatabaseError,
    DataNotFound,
    GenerateUidFailed,
    HandlerExecNotFound,
    OsCmdExecFailed,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::ParameterLess => 45000,
            ErrorKind::ParameterIllegal => 46000,
            ErrorKind::DatabaseError => 47000,
            ErrorKind::DataNotFound => 48000,
            ErrorKind::GenerateUidFailed => 49000,
            ErrorKind::HandlerExecNotFound => 51000,
            ErrorKind::OsCmdExecFailed => 52000,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        [
            ErrorKind::ParameterLess,
            ErrorKind::ParameterIllegal,
            ErrorKind::DatabaseError,
            ErrorKind::DataNotFound,
            ErrorKind::GenerateUidFailed,
            ErrorKind::HandlerExecNotFound,
            ErrorKind::OsCmdExecFailed,
        ]
        .into_iter()
        .find(|k| k.code() == code)
    }

    /// Failures of the server itself rather than of the caller's input.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            ErrorKind::DatabaseError | ErrorKind::GenerateUidFailed | ErrorKind::OsCmdExecFailed
        )
    }

    pub fn describe(self, detail: &str) -> String {
        let prefix = match self {
            ErrorKind::ParameterLess => "less parameter",
            ErrorKind::ParameterIllegal => "illegal parameter",
            ErrorKind::DatabaseError => "database error",
            ErrorKind::DataNotFound => "data not found",
            ErrorKind::GenerateUidFailed => "generate uid failed",
            ErrorKind::HandlerExecNotFound => "executor not found",
            ErrorKind::OsCmdExecFailed => "os command exec failed",
        };
        if detail.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}: {detail}")
        }
    }
}

/// The envelope every executor, service and endpoint answers with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: i32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    pub fn ok(result: impl Into<Value>) -> Self {
        Response {
            code: OK_CODE,
            success: true,
            err: String::new(),
            result: Some(result.into()),
        }
    }

    pub fn ok_empty() -> Self {
        Response {
            code: OK_CODE,
            success: true,
            err: String::new(),
            result: None,
        }
    }

    pub fn fail(kind: ErrorKind, detail: impl AsRef<str>) -> Self {
        Response {
            code: kind.code(),
            success: false,
            err: kind.describe(detail.as_ref()),
            result: None,
        }
    }

    /// `ParameterIllegal` naming the offending parameter and the reason.
    pub fn illegal(param: &str, reason: impl AsRef<str>) -> Self {
        Response::fail(
            ErrorKind::ParameterIllegal,
            format!("`{param}`, {}", reason.as_ref()),
        )
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        if self.success {
            None
        } else {
            ErrorKind::from_code(self.code)
        }
    }

    pub fn with_result(mut self, result: impl Into<Value>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Result payload as a string, if it is one.
    pub fn result_str(&self) -> Option<&str> {
        self.result.as_ref().and_then(Value::as_str)
    }
}
