use std::sync::{Arc, PoisonError, RwLock};

use blade_spec::{Channel, ErrorKind, ExecContext, ExpModel, Executor, Intent, Response};

use crate::pool::{CpuLoadPool, PoolError};

/// Binary that carries out host-level injections.
pub const DEFAULT_OS_BIN: &str = "chaos_os";

const CPU_PERCENT: &str = "cpu-percent";

/// Host executor. `os load` runs in-process on the CPU worker pool; every
/// other action is forwarded to the OS injection binary over the channel.
pub struct OsExecutor {
    bin: String,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    pool: CpuLoadPool,
}

impl OsExecutor {
    pub fn new() -> Self {
        Self::with_bin(DEFAULT_OS_BIN)
    }

    pub fn with_bin(bin: impl Into<String>) -> Self {
        OsExecutor {
            bin: bin.into(),
            channel: RwLock::new(None),
            pool: CpuLoadPool::new(),
        }
    }

    pub fn pool(&self) -> &CpuLoadPool {
        &self.pool
    }

    fn cpu_load(&self, ctx: &ExecContext, model: &ExpModel) -> Response {
        if let Some(uid) = ctx.destroy_uid() {
            self.pool.stop(uid);
            return Response::ok("destroyed");
        }

        let Some(raw) = model.flag(CPU_PERCENT) else {
            return Response::illegal(CPU_PERCENT, "is required");
        };
        let Ok(percent) = raw.trim().parse::<i64>() else {
            return Response::illegal(CPU_PERCENT, "must be integer");
        };
        if !(1..=100).contains(&percent) {
            return Response::illegal(CPU_PERCENT, "must be between 1 and 100");
        }

        match self.pool.start(ctx.uid(), percent as u32) {
            Ok(()) => Response::ok(ctx.uid()),
            Err(PoolError::AlreadyExists(_)) => Response::illegal("uid", "uid already exists"),
            Err(e) => Response::fail(ErrorKind::OsCmdExecFailed, e.to_string()),
        }
    }

    fn forward(&self, ctx: &ExecContext, model: &ExpModel) -> Response {
        let channel = self
            .channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(channel) = channel else {
            return Response::fail(ErrorKind::OsCmdExecFailed, "channel not set");
        };
        let verb = match ctx.intent() {
            Intent::Create => "create",
            Intent::Destroy => "destroy",
        };
        let mut args = vec![
            verb.to_string(),
            model.target.clone(),
            model.action.clone(),
            format!("--uid={}", ctx.uid()),
        ];
        args.extend(model.flags.iter().map(|(k, v)| format!("--{k}={v}")));
        let resp = channel.run(ctx, &self.bin, &args);
        if resp.success && ctx.intent() == Intent::Create {
            return Response::ok(ctx.uid());
        }
        resp
    }
}

impl Default for OsExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_cpu_load(model: &ExpModel) -> bool {
    model.target == "os" && model.action == "load"
}

impl Executor for OsExecutor {
    fn name(&self) -> &str {
        "os"
    }

    fn set_channel(&self, channel: Arc<dyn Channel>) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    fn exec(&self, ctx: &ExecContext, model: &ExpModel) -> Response {
        if is_cpu_load(model) {
            self.cpu_load(ctx, model)
        } else {
            self.forward(ctx, model)
        }
    }

    fn supports_in_process(&self, model: &ExpModel) -> bool {
        is_cpu_load(model)
    }

    fn exec_in_process(&self, ctx: &ExecContext, model: &ExpModel) -> Response {
        self.cpu_load(ctx, model)
    }
}
