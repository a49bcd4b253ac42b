//! JSON-lines RPC: one request object per line in, one response line out.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use blade_service::{
    CreateExperimentRequest, DestroyExperimentRequest, ExperimentService, ServiceError,
};
use blade_spec::{CancelFlag, ErrorKind};
use blade_store::ExperimentRecord;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

// Pause after a failed accept (EMFILE and friends) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RpcRequest {
    Create(CreateExperimentRequest),
    Destroy(DestroyExperimentRequest),
    Query { uid: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcResponse {
    Experiment {
        uid: String,
        success: bool,
        code: i32,
        error: String,
    },
    Record(RpcRecord),
    Error {
        code: i32,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRecord {
    pub uid: String,
    pub command: String,
    pub sub_command: String,
    pub flag: String,
    pub status: String,
    pub error: String,
    pub create_time: String,
    pub update_time: String,
}

impl From<ExperimentRecord> for RpcRecord {
    fn from(r: ExperimentRecord) -> Self {
        RpcRecord {
            uid: r.uid,
            command: r.command,
            sub_command: r.sub_command,
            flag: r.flag,
            status: r.status,
            error: r.error,
            create_time: r.create_time,
            update_time: r.update_time,
        }
    }
}

impl RpcResponse {
    fn failed_experiment(uid: String, e: &ServiceError) -> Self {
        RpcResponse::Experiment {
            uid,
            success: false,
            code: e.kind().code(),
            error: e.to_string(),
        }
    }
}

/// Answers one request. Blocks on the store and the executors.
pub fn handle_request(svc: &ExperimentService, req: RpcRequest) -> RpcResponse {
    match req {
        RpcRequest::Create(req) => {
            let requested = req.uid.clone();
            match svc.create(req, CancelFlag::new()) {
                Ok((resp, record)) => RpcResponse::Experiment {
                    uid: record.uid,
                    success: resp.success,
                    code: resp.code,
                    error: resp.err,
                },
                Err(e) => RpcResponse::failed_experiment(requested, &e),
            }
        }
        RpcRequest::Destroy(req) => {
            let uid = req.uid.clone();
            match svc.destroy(req, CancelFlag::new()) {
                Ok(resp) => RpcResponse::Experiment {
                    uid,
                    success: resp.success,
                    code: resp.code,
                    error: resp.err,
                },
                Err(e) => RpcResponse::failed_experiment(uid, &e),
            }
        }
        RpcRequest::Query { uid } => match svc.query(&uid) {
            Ok(record) => RpcResponse::Record(record.into()),
            Err(e) => RpcResponse::Error {
                code: e.kind().code(),
                message: e.to_string(),
            },
        },
    }
}

/// Runs until the task is aborted. Accept failures are logged and retried.
pub async fn serve(listener: TcpListener, svc: Arc<ExperimentService>) {
    let listener = Arc::new(listener);
    accept_loop(
        move || {
            let listener = listener.clone();
            async move { listener.accept().await }
        },
        svc,
    )
    .await
}

async fn accept_loop<F, Fut>(mut accept: F, svc: Arc<ExperimentService>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<(TcpStream, SocketAddr)>>,
{
    loop {
        match accept().await {
            Ok((stream, peer)) => {
                let svc = svc.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, svc).await {
                        tracing::warn!("rpc client {} error: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("rpc accept error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handle_client(stream: TcpStream, svc: Arc<ExperimentService>) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let resp = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(req) => {
                let svc = svc.clone();
                match tokio::task::spawn_blocking(move || handle_request(&svc, req)).await {
                    Ok(resp) => resp,
                    Err(e) => RpcResponse::Error {
                        code: ErrorKind::OsCmdExecFailed.code(),
                        message: format!("rpc task failed: {e}"),
                    },
                }
            }
            Err(e) => RpcResponse::Error {
                code: ErrorKind::ParameterIllegal.code(),
                message: format!("invalid request: {e}"),
            },
        };

        let mut out = serde_json::to_string(&resp)?;
        out.push('\n');
        write.write_all(out.as_bytes()).await?;
        write.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn accept_errors_do_not_stop_the_listener() {
        let store = Arc::new(blade_store::Store::open_in_memory().unwrap());
        let services = crate::bootstrap(store, Path::new("/nonexistent/sandbox"), None).unwrap();
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let server = tokio::spawn(accept_loop(
            move || {
                let listener = listener.clone();
                let n = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(std::io::Error::other("too many open files"))
                    } else {
                        listener.accept().await
                    }
                }
            },
            services.experiments,
        ));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        write
            .write_all(b"{\"method\":\"query\",\"uid\":\"ghost\"}\n")
            .await
            .unwrap();
        let line = BufReader::new(read).lines().next_line().await.unwrap().unwrap();
        let resp: RpcResponse = serde_json::from_str(&line).unwrap();
        assert!(matches!(
            resp,
            RpcResponse::Error { code, .. } if code == ErrorKind::DataNotFound.code()
        ));
        assert!(attempts.load(Ordering::SeqCst) >= 2);
        server.abort();
    }

    #[test]
    fn wire_shapes() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"method":"query","uid":"abc"}"#).unwrap();
        assert!(matches!(req, RpcRequest::Query { ref uid } if uid == "abc"));

        let req: RpcRequest = serde_json::from_str(
            r#"{"method":"create","target":"cpu","action":"fullload","flags":{"cpu-percent":"50"}}"#,
        )
        .unwrap();
        match req {
            RpcRequest::Create(c) => {
                assert_eq!(c.target, "cpu");
                assert_eq!(c.flags.unwrap()["cpu-percent"], "50");
            }
            other => panic!("unexpected {other:?}"),
        }

        let line = serde_json::to_string(&RpcResponse::Record(RpcRecord {
            uid: "u".into(),
            sub_command: "fullload".into(),
            ..RpcRecord::default()
        }))
        .unwrap();
        assert!(line.contains(r#""kind":"record""#));
        assert!(line.contains(r#""subCommand":"fullload""#));
    }
}
