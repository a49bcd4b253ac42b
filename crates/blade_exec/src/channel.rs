use std::process::Command;

use blade_spec::{Channel, ErrorKind, ExecContext, Response};

/// Runs programs as local subprocesses.
#[derive(Debug, Default, Clone)]
pub struct LocalChannel;

impl LocalChannel {
    pub fn new() -> Self {
        LocalChannel
    }
}

impl Channel for LocalChannel {
    fn run(&self, ctx: &ExecContext, program: &str, args: &[String]) -> Response {
        if ctx.is_cancelled() {
            return Response::fail(ErrorKind::OsCmdExecFailed, "request cancelled");
        }
        tracing::debug!(uid = ctx.uid(), "exec {} {}", program, args.join(" "));

        let output = match Command::new(program).args(args).output() {
            Ok(o) => o,
            Err(e) => {
                return Response::fail(ErrorKind::OsCmdExecFailed, format!("{program}: {e}"));
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Response::ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() { stdout } else { stderr };
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Response::fail(
            ErrorKind::OsCmdExecFailed,
            format!("{program} exited with {code}: {detail}"),
        )
    }
}
