pub mod config;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod rpc;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use blade_exec::bundles::BundleError;
use blade_exec::{LocalChannel, SandboxAttacher};
use blade_service::{load_executors, Dispatcher, Executors, ExperimentService, PreparationService};
use blade_store::Store;

pub use config::Config;
pub use http::router;
pub use middleware::IdempotencyStore;

pub const OPENAPI_DOC: &str = include_str!("../docs/openapi.yaml");

/// Everything the handlers share.
#[derive(Clone)]
pub struct AppState {
    pub experiments: Arc<ExperimentService>,
    pub preparations: Arc<PreparationService>,
    pub auth_token: Option<Arc<str>>,
    pub idempotency: Arc<IdempotencyStore>,
    pub openapi: Arc<str>,
}

impl AppState {
    pub fn new(experiments: Arc<ExperimentService>, preparations: Arc<PreparationService>) -> Self {
        AppState {
            experiments,
            preparations,
            auth_token: None,
            idempotency: Arc::new(IdempotencyStore::new(Duration::from_secs(600))),
            openapi: Arc::from(OPENAPI_DOC),
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.map(Arc::from);
        self
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency = Arc::new(IdempotencyStore::new(ttl));
        self
    }

    pub fn with_openapi(mut self, doc: String) -> Self {
        self.openapi = Arc::from(doc);
        self
    }
}

/// The wired services over one store.
pub struct Services {
    pub dispatcher: Arc<Dispatcher>,
    pub executors: Executors,
    pub experiments: Arc<ExperimentService>,
    pub preparations: Arc<PreparationService>,
}

/// Registers the executor bundles and builds both services.
pub fn bootstrap(
    store: Arc<Store>,
    sandbox_home: &Path,
    spec_dir: Option<&Path>,
) -> Result<Services, BundleError> {
    let dispatcher = Arc::new(Dispatcher::new());
    let executors = Executors::new(store.clone());
    load_executors(&dispatcher, &executors, spec_dir)?;

    let attacher = SandboxAttacher::new(store.clone(), Arc::new(LocalChannel::new()), sandbox_home);
    Ok(Services {
        experiments: Arc::new(ExperimentService::new(store.clone(), dispatcher.clone())),
        preparations: Arc::new(PreparationService::new(store, Arc::new(attacher))),
        dispatcher,
        executors,
    })
}
