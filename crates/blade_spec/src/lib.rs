//! Shared vocabulary of the blade control plane.
//!
//! Everything that crosses a crate boundary lives here: the experiment model
//! handed to executors, the invocation context with its create/destroy
//! intent, the JSON response envelope, the lifecycle status values and the
//! canonical `--key=value` flag encoding stored alongside each record.

pub mod bundle;
pub mod executor;
pub mod flags;
pub mod model;
pub mod response;
pub mod status;

use thiserror::Error;

pub use bundle::{ActionSpec, BundleSpec, ModelSpec};
pub use executor::{Channel, Executor};
pub use model::{
    executor_key, revive_command, split_command, CancelFlag, ExecContext, ExpModel, Intent,
};
pub use response::{ErrorKind, Response};
pub use status::{upper_first, Status};

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unterminated quote in flag string: {0}")]
    UnterminatedQuote(String),
    #[error("dangling escape in flag string: {0}")]
    DanglingEscape(String),
    #[error("invalid bundle yaml: {0}")]
    Bundle(#[from] serde_yaml::Error),
    #[error("unknown status '{0}'")]
    UnknownStatus(String),
}

pub type Result<T> = std::result::Result<T, SpecError>;
