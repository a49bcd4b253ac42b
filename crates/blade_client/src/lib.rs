use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use blade_server::rpc::{RpcRecord, RpcRequest, RpcResponse};
use blade_service::{CreateExperimentRequest, DestroyExperimentRequest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response from bladed")]
    EmptyResponse,
    #[error("bladed error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("unexpected response: {0:?}")]
    Unexpected(RpcResponse),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// The `experiment` reply to create and destroy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentReply {
    pub uid: String,
    pub success: bool,
    pub code: i32,
    pub error: String,
}

/// Thin blocking SDK over the bladed JSON-lines RPC listener. Each call opens
/// its own connection.
#[derive(Clone, Debug)]
pub struct RpcClient {
    addr: String,
    timeout: Option<Duration>,
}

impl RpcClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: None,
        }
    }

    /// Uses `BLADE_RPC_ADDR`, or `127.0.0.1:9001`.
    pub fn from_env() -> Self {
        let addr = std::env::var("BLADE_RPC_ADDR").unwrap_or_else(|_| "127.0.0.1:9001".to_string());
        Self::new(addr)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn send(&self, req: &RpcRequest) -> Result<RpcResponse> {
        let buf = self.send_raw(req)?;
        Ok(serde_json::from_str(&buf)?)
    }

    /// Sends a request and returns the raw response line.
    pub fn send_raw(&self, req: &RpcRequest) -> Result<String> {
        let mut stream = TcpStream::connect(&self.addr)?;
        stream.set_read_timeout(self.timeout)?;

        let mut line = serde_json::to_string(req)?;
        line.push('\n');
        stream.write_all(line.as_bytes())?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut buf = String::new();
        reader.read_line(&mut buf)?;
        if buf.trim().is_empty() {
            return Err(ClientError::EmptyResponse);
        }
        Ok(buf)
    }

    pub fn create(&self, req: CreateExperimentRequest) -> Result<ExperimentReply> {
        experiment(self.send(&RpcRequest::Create(req))?)
    }

    pub fn destroy(&self, req: DestroyExperimentRequest) -> Result<ExperimentReply> {
        experiment(self.send(&RpcRequest::Destroy(req))?)
    }

    pub fn query(&self, uid: &str) -> Result<RpcRecord> {
        match self.send(&RpcRequest::Query {
            uid: uid.to_string(),
        })? {
            RpcResponse::Record(r) => Ok(r),
            RpcResponse::Error { code, message } => Err(ClientError::Remote { code, message }),
            other => Err(ClientError::Unexpected(other)),
        }
    }
}

fn experiment(resp: RpcResponse) -> Result<ExperimentReply> {
    match resp {
        RpcResponse::Experiment {
            uid,
            success,
            code,
            error,
        } => Ok(ExperimentReply {
            uid,
            success,
            code,
            error,
        }),
        RpcResponse::Error { code, message } => Err(ClientError::Remote { code, message }),
        other => Err(ClientError::Unexpected(other)),
    }
}
