use blade_spec::{ErrorKind, Response};
use thiserror::Error;

/// A domain failure raised by a service before or around dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, detail: impl AsRef<str>) -> Self {
        ServiceError {
            kind,
            message: kind.describe(detail.as_ref()),
        }
    }

    pub fn parameter_less(param: &str) -> Self {
        Self::new(ErrorKind::ParameterLess, param)
    }

    pub fn parameter_illegal(param: &str, reason: impl AsRef<str>) -> Self {
        Self::new(
            ErrorKind::ParameterIllegal,
            format!("`{param}`, {}", reason.as_ref()),
        )
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorKind::DataNotFound, what)
    }

    pub fn database(op: &str, err: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::DatabaseError, format!("{op}: {err}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The failure in the shared response envelope.
    pub fn to_response(&self) -> Response {
        Response {
            code: self.kind.code(),
            success: false,
            err: self.message.clone(),
            result: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
