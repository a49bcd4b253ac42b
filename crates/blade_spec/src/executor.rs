use std::sync::Arc;

use crate::model::{ExecContext, ExpModel};
use crate::response::Response;

/// How an executor reaches its target: a local subprocess, a container, ...
pub trait Channel: Send + Sync {
    fn run(&self, ctx: &ExecContext, program: &str, args: &[String]) -> Response;
}

/// Something that can inject a fault and tear it down again.
///
/// Create and destroy share `exec`; the context's intent tells them apart.
/// Executors that can run a given model inside the calling thread (after
/// namespace entry, for example) report it through `supports_in_process`
/// and implement `exec_in_process`.
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    fn set_channel(&self, channel: Arc<dyn Channel>);

    fn exec(&self, ctx: &ExecContext, model: &ExpModel) -> Response;

    fn supports_in_process(&self, _model: &ExpModel) -> bool {
        false
    }

    fn exec_in_process(&self, ctx: &ExecContext, model: &ExpModel) -> Response {
        self.exec(ctx, model)
    }
}
