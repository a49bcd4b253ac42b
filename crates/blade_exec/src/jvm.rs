//! JVM injections through a sandbox agent attached to the target process.
//!
//! `SandboxAttacher` installs and removes the agent and keeps the
//! preparation record in step; `JvmExecutor` talks to an attached agent
//! over its local HTTP port.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use blade_spec::{Channel, ErrorKind, ExecContext, ExpModel, Executor, Intent, Response, Status};
use blade_store::{PreparationRecord, Store};
use reqwest::blocking::Client;

pub const PROGRAM_TYPE: &str = "jvm";

const SANDBOX_SCRIPT: &str = "bin/sandbox.sh";
const MODULE_PATH: &str = "sandbox/default/module/http/chaosblade";

// Flags that address the process rather than parameterise the injection.
const ADDRESSING_FLAGS: [&str; 2] = ["process", "pid"];

fn http_client() -> Result<&'static Client, String> {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    if let Some(c) = CLIENT.get() {
        return Ok(c);
    }
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| format!("failed to build sandbox http client: {e}"))?;
    Ok(CLIENT.get_or_init(|| client))
}

/// Talks HTTP to the attached agent, so it never needs a command channel.
pub struct JvmExecutor {
    store: Arc<Store>,
}

impl JvmExecutor {
    pub fn new(store: Arc<Store>) -> Self {
        JvmExecutor { store }
    }

    fn sandbox_port(&self, model: &ExpModel) -> Result<String, Response> {
        let process = model.flag("process").unwrap_or_default();
        let pid = model.flag("pid").unwrap_or_default();
        if process.is_empty() && pid.is_empty() {
            return Err(Response::fail(ErrorKind::ParameterLess, "process|pid"));
        }
        let record = self
            .store
            .query_running_preparation(PROGRAM_TYPE, process, pid)
            .map_err(|e| Response::fail(ErrorKind::DatabaseError, format!("query: {e}")))?
            .ok_or_else(|| {
                Response::fail(
                    ErrorKind::DataNotFound,
                    format!("no running jvm preparation for process={process} pid={pid}"),
                )
            })?;
        if record.port.is_empty() {
            return Err(Response::fail(
                ErrorKind::DataNotFound,
                format!("preparation {} has no sandbox port", record.uid),
            ));
        }
        Ok(record.port)
    }
}

impl Executor for JvmExecutor {
    fn name(&self) -> &str {
        PROGRAM_TYPE
    }

    fn set_channel(&self, _channel: Arc<dyn Channel>) {}

    fn exec(&self, ctx: &ExecContext, model: &ExpModel) -> Response {
        let port = match self.sandbox_port(model) {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        let client = match http_client() {
            Ok(c) => c,
            Err(e) => return Response::fail(ErrorKind::OsCmdExecFailed, e),
        };
        let op = match ctx.intent() {
            Intent::Create => "create",
            Intent::Destroy => "destroy",
        };
        let mut query: Vec<(String, String)> = vec![
            ("target".into(), model.target.clone()),
            ("action".into(), model.action.clone()),
            ("suid".into(), ctx.uid().to_string()),
        ];
        query.extend(
            model
                .flags
                .iter()
                .filter(|(k, _)| !ADDRESSING_FLAGS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let url = format!("http://127.0.0.1:{port}/{MODULE_PATH}/{op}");
        tracing::debug!(uid = ctx.uid(), "sandbox request {}", url);
        let reply = client
            .get(&url)
            .query(&query)
            .send()
            .and_then(|r| r.text());
        match reply {
            Ok(body) => serde_json::from_str::<Response>(&body)
                .unwrap_or_else(|_| Response::fail(ErrorKind::OsCmdExecFailed, body)),
            Err(e) => Response::fail(ErrorKind::OsCmdExecFailed, e.to_string()),
        }
    }
}

/// Parameters for attaching a sandbox to a JVM.
#[derive(Debug, Clone, Default)]
pub struct AttachRequest {
    pub uid: String,
    pub process: String,
    pub pid: String,
    pub java_home: String,
    pub port: String,
    /// Attach again even if a running preparation already exists.
    pub refresh: bool,
}

/// Installs and removes the sandbox agent via its control script.
pub struct SandboxAttacher {
    store: Arc<Store>,
    channel: Arc<dyn Channel>,
    sandbox_home: PathBuf,
}

impl SandboxAttacher {
    pub fn new(store: Arc<Store>, channel: Arc<dyn Channel>, sandbox_home: impl Into<PathBuf>) -> Self {
        SandboxAttacher {
            store,
            channel,
            sandbox_home: sandbox_home.into(),
        }
    }

    fn script(&self) -> String {
        self.sandbox_home.join(SANDBOX_SCRIPT).display().to_string()
    }

    fn running(&self, process: &str, pid: &str) -> blade_store::Result<Option<PreparationRecord>> {
        if !pid.is_empty() {
            if let Some(r) = self.store.query_running_preparation(PROGRAM_TYPE, "", pid)? {
                return Ok(Some(r));
            }
        }
        if !process.is_empty() {
            return self.store.query_running_preparation(PROGRAM_TYPE, process, "");
        }
        Ok(None)
    }

    fn resolve_pid(&self, ctx: &ExecContext, process: &str) -> Result<String, Response> {
        let resp = self
            .channel
            .run(ctx, "pgrep", &["-f".to_string(), process.to_string()]);
        resp.result_str()
            .and_then(|out| out.lines().next())
            .map(|l| l.trim().to_string())
            .filter(|pid| !pid.is_empty())
            .ok_or_else(|| Response::fail(ErrorKind::DataNotFound, format!("process {process}")))
    }

    /// Attaches the agent. On success the result is the preparation uid.
    pub fn prepare(&self, ctx: &ExecContext, req: &AttachRequest) -> Response {
        if req.process.is_empty() && req.pid.is_empty() {
            return Response::fail(ErrorKind::ParameterLess, "process|pid");
        }
        if req.uid.is_empty() {
            return Response::fail(ErrorKind::ParameterLess, "uid");
        }

        if !req.refresh {
            match self.running(&req.process, &req.pid) {
                Ok(Some(existing)) => {
                    tracing::info!(
                        "jvm preparation {} already running for process={} pid={}",
                        existing.uid,
                        existing.process,
                        existing.pid
                    );
                    return Response::ok(existing.uid);
                }
                Ok(None) => {}
                Err(e) => return Response::fail(ErrorKind::DatabaseError, format!("query: {e}")),
            }
        }

        let pid = if req.pid.is_empty() {
            match self.resolve_pid(ctx, &req.process) {
                Ok(pid) => pid,
                Err(resp) => return resp,
            }
        } else {
            req.pid.clone()
        };

        let mut record = PreparationRecord {
            uid: req.uid.clone(),
            program_type: PROGRAM_TYPE.to_string(),
            process: req.process.clone(),
            pid: pid.clone(),
            status: Status::Created.to_string(),
            ..PreparationRecord::default()
        };
        if let Err(e) = self.store.insert_preparation(&mut record) {
            return Response::fail(ErrorKind::DatabaseError, format!("insert: {e}"));
        }

        let (program, mut args) = if req.java_home.is_empty() {
            (self.script(), Vec::new())
        } else {
            (
                "env".to_string(),
                vec![format!("JAVA_HOME={}", req.java_home), self.script()],
            )
        };
        args.extend(["-p".to_string(), pid.clone()]);
        if !req.port.is_empty() {
            args.extend(["-P".to_string(), req.port.clone()]);
        }

        let resp = self.channel.run(ctx, &program, &args);
        if !resp.success {
            self.mark(&record.uid, Status::Error, &resp.err);
            return resp;
        }

        let port = resp
            .result_str()
            .and_then(parse_server_port)
            .or_else(|| Some(req.port.clone()).filter(|p| !p.is_empty()));
        let Some(port) = port else {
            let err = "cannot determine sandbox port";
            self.mark(&record.uid, Status::Error, err);
            return Response::fail(ErrorKind::OsCmdExecFailed, err);
        };

        if let Err(e) = self.store.update_preparation_port_by_uid(&record.uid, &port) {
            tracing::warn!("failed to record port for preparation {}: {}", record.uid, e);
        }
        if let Err(e) = self.supersede(&req.process, &pid) {
            self.mark(&record.uid, Status::Error, &e.to_string());
            return Response::fail(ErrorKind::DatabaseError, format!("query: {e}"));
        }
        self.mark(&record.uid, Status::Running, "");
        tracing::info!("attached sandbox to pid {} on port {}", pid, port);
        Response::ok(record.uid)
    }

    /// Shuts the agent down. The caller decides what the result means for
    /// the record.
    pub fn revoke(&self, ctx: &ExecContext, record: &PreparationRecord) -> Response {
        if record.pid.is_empty() {
            return Response::fail(ErrorKind::ParameterLess, "pid");
        }
        let args = vec!["-p".to_string(), record.pid.clone(), "-S".to_string()];
        self.channel.run(ctx, &self.script(), &args)
    }

    /// Revokes every running record for the pid or process, leaving room for
    /// exactly one new running attachment.
    fn supersede(&self, process: &str, pid: &str) -> blade_store::Result<()> {
        while let Some(stale) = self.running(process, pid)? {
            tracing::info!("jvm preparation {} superseded by refresh", stale.uid);
            self.store
                .update_preparation_status_by_uid(&stale.uid, Status::Revoked.as_str(), "")?;
        }
        Ok(())
    }

    fn mark(&self, uid: &str, status: Status, err: &str) {
        if let Err(e) = self.store.update_preparation_status_by_uid(uid, status.as_str(), err) {
            tracing::warn!("failed to update preparation {} to {}: {}", uid, status, e);
        }
    }
}

/// Reads `SERVER_PORT : 39653` out of the sandbox script's banner.
fn parse_server_port(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("SERVER_PORT")?;
        let port = rest.trim_start().strip_prefix(':')?.trim();
        port.parse::<u16>().ok().map(|p| p.to_string())
    })
}
