use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use blade_spec::{executor_key, ErrorKind, ExecContext, ExpModel, Executor, Intent, Response};

use crate::error::{Result, ServiceError};

/// One routed invocation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub model: ExpModel,
    pub intent: Intent,
}

impl ExecutionRequest {
    pub fn create(model: ExpModel) -> Self {
        ExecutionRequest {
            model,
            intent: Intent::Create,
        }
    }

    pub fn destroy(model: ExpModel) -> Self {
        ExecutionRequest {
            model,
            intent: Intent::Destroy,
        }
    }
}

/// Executors keyed by `scope[-target][-action]`.
#[derive(Default)]
pub struct Dispatcher {
    executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `executor` to the key, replacing any previous binding. `None`
    /// leaves the registry untouched.
    pub fn register(
        &self,
        scope: &str,
        target: &str,
        action: &str,
        executor: Option<Arc<dyn Executor>>,
    ) {
        let Some(executor) = executor else {
            return;
        };
        let key = executor_key(scope, target, action);
        tracing::debug!("register executor {} for {}", executor.name(), key);
        self.executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, executor);
    }

    pub fn get(&self, scope: &str, target: &str, action: &str) -> Option<Arc<dyn Executor>> {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&executor_key(scope, target, action))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Routes one request to its executor, exactly once.
    pub fn dispatch(&self, ctx: &ExecContext, req: &ExecutionRequest) -> Result<Response> {
        let m = &req.model;
        let executor = self.get(&m.scope, &m.target, &m.action).ok_or_else(|| {
            ServiceError::new(
                ErrorKind::HandlerExecNotFound,
                format!("scope={} target={} action={}", m.scope, m.target, m.action),
            )
        })?;
        let ctx = ctx.clone().with_intent(req.intent);
        tracing::debug!(
            uid = ctx.uid(),
            "dispatch {:?} {} to {}",
            req.intent,
            m.key(),
            executor.name()
        );
        Ok(executor.exec(&ctx, m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blade_spec::Channel;
    use std::sync::Mutex;

    struct Echo {
        name: &'static str,
        seen: Mutex<Vec<(String, Intent)>>,
    }

    impl Echo {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Echo {
                name,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Executor for Echo {
        fn name(&self) -> &str {
            self.name
        }
        fn set_channel(&self, _channel: Arc<dyn Channel>) {}
        fn exec(&self, ctx: &ExecContext, _model: &ExpModel) -> Response {
            self.seen
                .lock()
                .unwrap()
                .push((ctx.uid().to_string(), ctx.intent()));
            Response::ok(self.name)
        }
    }

    #[test]
    fn register_then_get_returns_same_executor() {
        let d = Dispatcher::new();
        let a = Echo::new("a");
        d.register("cri", "jvm", "delay", Some(a.clone() as Arc<dyn Executor>));
        let got = d.get("cri", "jvm", "delay").unwrap();
        assert_eq!(got.name(), "a");

        d.register("cri", "jvm", "delay", None);
        assert_eq!(d.get("cri", "jvm", "delay").unwrap().name(), "a");

        d.register("cri", "jvm", "delay", Some(Echo::new("b") as Arc<dyn Executor>));
        assert_eq!(d.get("cri", "jvm", "delay").unwrap().name(), "b");
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn dispatch_sets_intent_and_reports_missing_executor() {
        let d = Dispatcher::new();
        let echo = Echo::new("os");
        d.register("", "os", "load", Some(echo.clone() as Arc<dyn Executor>));

        let model = ExpModel::new("", "os", "load", Default::default());
        let ctx = ExecContext::new("u1");
        d.dispatch(&ctx, &ExecutionRequest::create(model.clone())).unwrap();
        d.dispatch(&ctx, &ExecutionRequest::destroy(model)).unwrap();
        assert_eq!(
            *echo.seen.lock().unwrap(),
            vec![
                ("u1".to_string(), Intent::Create),
                ("u1".to_string(), Intent::Destroy)
            ]
        );

        let missing = ExpModel::new("", "disk", "fill", Default::default());
        let err = d
            .dispatch(&ctx, &ExecutionRequest::create(missing))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerExecNotFound);
        assert!(err.to_string().contains("target=disk action=fill"));
    }
}
