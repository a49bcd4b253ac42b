use std::sync::Arc;
use std::time::Duration;

use blade_exec::{AttachRequest, SandboxAttacher};
use blade_spec::{CancelFlag, ErrorKind, ExecContext, Response, Status};
use blade_store::{PreparationRecord, Store};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::uid::{allocate_uid, validate_uid};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepareRequest {
    #[serde(default, rename = "type")]
    pub program_type: String,
    #[serde(default)]
    pub process: String,
    #[serde(default)]
    pub pid: String,
    #[serde(default, rename = "javaHome")]
    pub java_home: String,
    /// Attach in the background and return the uid straight away.
    #[serde(default, rename = "async")]
    pub run_async: bool,
    /// Receives the final response as a JSON POST when `async` is set.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub port: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default, rename = "type")]
    pub program_type: String,
    #[serde(default)]
    pub process: String,
    #[serde(default)]
    pub pid: String,
}

/// The attach/detach seam the preparation service drives.
pub trait Attacher: Send + Sync {
    fn prepare(&self, ctx: &ExecContext, req: &AttachRequest) -> Response;
    fn revoke(&self, ctx: &ExecContext, record: &PreparationRecord) -> Response;
}

impl Attacher for SandboxAttacher {
    fn prepare(&self, ctx: &ExecContext, req: &AttachRequest) -> Response {
        SandboxAttacher::prepare(self, ctx, req)
    }

    fn revoke(&self, ctx: &ExecContext, record: &PreparationRecord) -> Response {
        SandboxAttacher::revoke(self, ctx, record)
    }
}

pub struct PreparationService {
    store: Arc<Store>,
    jvm: Arc<dyn Attacher>,
}

fn is_jvm(program_type: &str) -> bool {
    matches!(program_type.to_lowercase().as_str(), "jvm" | "java")
}

impl PreparationService {
    pub fn new(store: Arc<Store>, jvm: Arc<dyn Attacher>) -> Self {
        PreparationService { store, jvm }
    }

    pub fn prepare(
        &self,
        req: PrepareRequest,
        cancel: CancelFlag,
    ) -> Result<(Response, Option<PreparationRecord>)> {
        if !is_jvm(&req.program_type) {
            return Err(ServiceError::parameter_illegal(
                "type",
                format!("{}, not support the type", req.program_type),
            ));
        }
        let uid = if req.uid.is_empty() {
            allocate_uid(|u| Ok(self.store.query_preparation_by_uid(u)?.is_some()))?
        } else {
            validate_uid(&req.uid)?;
            req.uid.clone()
        };
        let attach = AttachRequest {
            uid: uid.clone(),
            process: req.process,
            pid: req.pid,
            java_home: req.java_home,
            port: req.port,
            refresh: req.refresh,
        };
        let ctx = ExecContext::new(&uid).with_cancel_flag(cancel);

        if req.run_async {
            let jvm = self.jvm.clone();
            let endpoint = req.endpoint;
            std::thread::Builder::new()
                .name(format!("prepare-{uid}"))
                .spawn(move || {
                    let resp = jvm.prepare(&ctx, &attach);
                    if !resp.success {
                        tracing::warn!("async prepare {} failed: {}", ctx.uid(), resp.err);
                    }
                    if !endpoint.is_empty() {
                        notify(&endpoint, &resp);
                    }
                })
                .map_err(|e| ServiceError::new(ErrorKind::OsCmdExecFailed, e.to_string()))?;
            return Ok((Response::ok(uid), None));
        }

        let resp = self.jvm.prepare(&ctx, &attach);
        if !resp.success {
            return Ok((resp, None));
        }
        let prepared = resp.result_str().unwrap_or(&uid).to_string();
        let record = self
            .store
            .query_preparation_by_uid(&prepared)
            .map_err(|e| ServiceError::database("query", e))?;
        Ok((resp, record))
    }

    /// Detaches the attachment. An agent that is already gone ("connection
    /// refused") counts as revoked.
    pub fn revoke(&self, req: RevokeRequest, cancel: CancelFlag) -> Result<Response> {
        if req.uid.is_empty() {
            return Err(ServiceError::parameter_less("uid"));
        }
        let record = self
            .store
            .query_preparation_by_uid(&req.uid)
            .map_err(|e| ServiceError::database("query", e))?
            .ok_or_else(|| ServiceError::not_found(&req.uid))?;
        if !is_jvm(&record.program_type) {
            return Err(ServiceError::parameter_illegal(
                "type",
                format!("{}, not support the type", record.program_type),
            ));
        }

        let ctx = ExecContext::new(&record.uid).with_cancel_flag(cancel);
        let resp = self.jvm.revoke(&ctx, &record);
        if resp.success || resp.err.contains("connection refused") {
            self.mark(&record.uid, Status::Revoked.as_str(), "");
            return Ok(if resp.success {
                resp
            } else {
                Response::ok("success")
            });
        }
        self.mark(&record.uid, &record.status, &resp.err);
        Ok(resp)
    }

    fn mark(&self, uid: &str, status: &str, err: &str) {
        if let Err(e) = self.store.update_preparation_status_by_uid(uid, status, err) {
            tracing::warn!("failed to update preparation {} to {}: {}", uid, status, e);
        }
    }
}

fn notify(endpoint: &str, resp: &Response) {
    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("failed to build callback client: {}", e);
            return;
        }
    };
    match client.post(endpoint).json(resp).send() {
        Ok(r) if r.status().is_success() => {}
        Ok(r) => tracing::warn!("prepare callback {} answered {}", endpoint, r.status()),
        Err(e) => tracing::warn!("prepare callback {} failed: {}", endpoint, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeAttacher {
        store: Arc<Store>,
        revoke_reply: Response,
        revoked: Mutex<Vec<String>>,
    }

    impl Attacher for FakeAttacher {
        fn prepare(&self, _ctx: &ExecContext, req: &AttachRequest) -> Response {
            let mut rec = PreparationRecord {
                uid: req.uid.clone(),
                program_type: "jvm".into(),
                process: req.process.clone(),
                pid: req.pid.clone(),
                port: "39653".into(),
                status: "Running".into(),
                ..PreparationRecord::default()
            };
            self.store.insert_preparation(&mut rec).unwrap();
            Response::ok(req.uid.clone())
        }

        fn revoke(&self, _ctx: &ExecContext, record: &PreparationRecord) -> Response {
            self.revoked.lock().unwrap().push(record.uid.clone());
            self.revoke_reply.clone()
        }
    }

    fn service(revoke_reply: Response) -> (PreparationService, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let fake = Arc::new(FakeAttacher {
            store: store.clone(),
            revoke_reply,
            revoked: Mutex::new(Vec::new()),
        });
        (PreparationService::new(store.clone(), fake), store)
    }

    fn jvm_req(uid: &str) -> PrepareRequest {
        PrepareRequest {
            program_type: "java".into(),
            process: "app".into(),
            uid: uid.into(),
            ..PrepareRequest::default()
        }
    }

    #[test]
    fn prepare_returns_stored_record() {
        let (svc, _) = service(Response::ok_empty());
        let (resp, record) = svc.prepare(jvm_req("p1"), CancelFlag::new()).unwrap();
        assert!(resp.success);
        let record = record.unwrap();
        assert_eq!(record.uid, "p1");
        assert_eq!(record.status, "Running");
    }

    #[test]
    fn unsupported_type_is_illegal() {
        let (svc, _) = service(Response::ok_empty());
        let mut req = jvm_req("p1");
        req.program_type = "python".into();
        let err = svc.prepare(req, CancelFlag::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterIllegal);
        assert!(err.to_string().contains("not support the type"));
    }

    #[test]
    fn connection_refused_counts_as_revoked() {
        let (svc, store) = service(Response::fail(
            ErrorKind::OsCmdExecFailed,
            "connect 127.0.0.1:39653: connection refused",
        ));
        svc.prepare(jvm_req("p1"), CancelFlag::new()).unwrap();
        let resp = svc
            .revoke(
                RevokeRequest {
                    uid: "p1".into(),
                    ..RevokeRequest::default()
                },
                CancelFlag::new(),
            )
            .unwrap();
        assert!(resp.success);
        let rec = store.query_preparation_by_uid("p1").unwrap().unwrap();
        assert_eq!(rec.status, "Revoked");
        assert_eq!(rec.error, "");
    }

    #[test]
    fn other_revoke_failures_keep_status_and_store_error() {
        let (svc, store) = service(Response::fail(ErrorKind::OsCmdExecFailed, "permission denied"));
        svc.prepare(jvm_req("p1"), CancelFlag::new()).unwrap();
        let resp = svc
            .revoke(
                RevokeRequest {
                    uid: "p1".into(),
                    ..RevokeRequest::default()
                },
                CancelFlag::new(),
            )
            .unwrap();
        assert!(!resp.success);
        let rec = store.query_preparation_by_uid("p1").unwrap().unwrap();
        assert_eq!(rec.status, "Running");
        assert!(rec.error.contains("permission denied"));
    }

    #[test]
    fn revoke_requires_known_uid() {
        let (svc, _) = service(Response::ok_empty());
        let err = svc.revoke(RevokeRequest::default(), CancelFlag::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterLess);
        let err = svc
            .revoke(
                RevokeRequest {
                    uid: "ghost".into(),
                    ..RevokeRequest::default()
                },
                CancelFlag::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataNotFound);
    }
}
