use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use blade_spec::{executor_key, Channel, ErrorKind, ExecContext, ExpModel, Executor, Response};

use crate::ns::{Namespace, NamespaceEntry, ProcNamespaces};

const ENTERED: [Namespace; 3] = [Namespace::Pid, Namespace::Net, Namespace::Mnt];

/// Container executor: finds the container's main process, enters its
/// namespaces and hands the request to the executor registered for
/// `target-action`.
pub struct CriExecutor {
    inner: RwLock<HashMap<String, Arc<dyn Executor>>>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    namespaces: Arc<dyn NamespaceEntry>,
}

impl CriExecutor {
    pub fn new() -> Self {
        Self::with_namespaces(Arc::new(ProcNamespaces::new()))
    }

    pub fn with_namespaces(namespaces: Arc<dyn NamespaceEntry>) -> Self {
        CriExecutor {
            inner: RwLock::new(HashMap::new()),
            channel: RwLock::new(None),
            namespaces,
        }
    }

    pub fn register_inner(&self, target: &str, action: &str, executor: Arc<dyn Executor>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(executor_key("", target, action), executor);
    }

    fn inner_for(&self, model: &ExpModel) -> Option<Arc<dyn Executor>> {
        let key = executor_key("", &model.target, &model.action);
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    fn target_pid(&self, ctx: &ExecContext, model: &ExpModel) -> Result<i32, Response> {
        if let Some(raw) = model.flag("pid") {
            return match raw.trim().parse::<i32>() {
                Ok(pid) if pid > 0 => Ok(pid),
                _ => Err(Response::illegal("pid", "must be a positive integer")),
            };
        }
        let Some(container) = model.flag("container-id") else {
            return Err(Response::fail(ErrorKind::ParameterLess, "pid|container-id"));
        };

        let channel = self
            .channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Response::fail(ErrorKind::OsCmdExecFailed, "channel not set"))?;
        let args = [
            "inspect",
            "--output",
            "go-template",
            "--template",
            "{{.info.pid}}",
            container,
        ]
        .map(String::from);
        let resp = channel.run(ctx, "crictl", &args);
        if !resp.success {
            return Err(resp);
        }
        resp.result_str()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .filter(|pid| *pid > 0)
            .ok_or_else(|| {
                Response::fail(
                    ErrorKind::OsCmdExecFailed,
                    format!("cannot resolve pid of container {container}"),
                )
            })
    }
}

impl Default for CriExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for CriExecutor {
    fn name(&self) -> &str {
        "cri"
    }

    fn set_channel(&self, channel: Arc<dyn Channel>) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    fn exec(&self, ctx: &ExecContext, model: &ExpModel) -> Response {
        let Some(inner) = self.inner_for(model) else {
            return Response::fail(
                ErrorKind::HandlerExecNotFound,
                format!("cri target={} action={}", model.target, model.action),
            );
        };
        let pid = match self.target_pid(ctx, model) {
            Ok(pid) => pid,
            Err(resp) => return resp,
        };

        let mut inner_model = model.clone();
        inner_model.scope.clear();
        let inner_ctx = ctx.clone();
        tracing::debug!(uid = ctx.uid(), "entering namespaces of pid {}", pid);

        let task = Box::new(move || {
            if inner.supports_in_process(&inner_model) {
                inner.exec_in_process(&inner_ctx, &inner_model)
            } else {
                inner.exec(&inner_ctx, &inner_model)
            }
        });
        match self.namespaces.run_in(pid, &ENTERED, task) {
            Ok(resp) => resp,
            Err(e) => Response::fail(ErrorKind::OsCmdExecFailed, e.to_string()),
        }
    }
}
