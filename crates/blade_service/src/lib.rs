//! The experiment lifecycle: routing requests to executors and keeping the
//! record store in step with what the executors report.

pub mod dispatcher;
pub mod error;
pub mod experiment;
pub mod loader;
pub mod preparation;
pub mod uid;

pub use dispatcher::{Dispatcher, ExecutionRequest};
pub use error::{Result, ServiceError};
pub use experiment::{
    CreateExperimentRequest, DestroyExperimentRequest, ExperimentService, StatusQuery,
};
pub use loader::{load_executors, register_bundle, Executors};
pub use preparation::{Attacher, PrepareRequest, PreparationService, RevokeRequest};
