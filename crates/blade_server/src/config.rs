use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_SANDBOX_HOME: &str = "/opt/chaosblade/lib/sandbox";

#[derive(Parser, Debug, Clone)]
#[command(name = "bladed", about = "Chaos experiment control plane", version)]
pub struct Config {
    /// REST listen address; `:PORT` binds every interface.
    #[arg(long = "http", env = "BLADE_HTTP_ADDR", default_value = ":9000")]
    pub http_addr: String,

    /// JSON-lines RPC listen address.
    #[arg(long = "grpc", env = "BLADE_RPC_ADDR", default_value = ":9001")]
    pub rpc_addr: String,

    /// Bearer token required on /api/v1. Empty disables the check.
    #[arg(long, env = "BLADE_AUTH_TOKEN", default_value = "")]
    pub auth_token: String,

    #[arg(long, default_value_t = 600)]
    pub idempotency_ttl_secs: u64,

    #[arg(long, env = "BLADE_SANDBOX_HOME", default_value = DEFAULT_SANDBOX_HOME)]
    pub sandbox_home: PathBuf,

    /// Serve this file at /api/v1/openapi instead of the built-in document.
    #[arg(long)]
    pub openapi: Option<PathBuf>,
}

impl Config {
    pub fn http_addr(&self) -> String {
        normalize_addr(&self.http_addr)
    }

    pub fn rpc_addr(&self) -> String {
        normalize_addr(&self.rpc_addr)
    }

    pub fn auth_token(&self) -> Option<String> {
        let t = self.auth_token.trim();
        (!t.is_empty()).then(|| t.to_string())
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

/// `:9000` becomes `0.0.0.0:9000`; anything else is left alone.
pub fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
