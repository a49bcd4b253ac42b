use std::sync::Arc;

use blade_spec::flags::{self, FlagMap};
use blade_spec::{revive_command, split_command, CancelFlag, ExecContext, ExpModel, Response, Status};
use blade_store::{ExperimentQuery, ExperimentRecord, PreparationQuery, Store};
use serde::{Deserialize, Serialize};

use crate::dispatcher::{Dispatcher, ExecutionRequest};
use crate::error::{Result, ServiceError};
use crate::uid::{allocate_uid, validate_uid};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateExperimentRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub flags: Option<FlagMap>,
    #[serde(default)]
    pub description: String,
}

/// Destroy by uid. The addressing fields are only used when no record
/// exists for the uid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestroyExperimentRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub flags: Option<FlagMap>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusQuery {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, alias = "flag-filter")]
    pub flag: String,
    #[serde(default)]
    pub limit: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub asc: bool,
}

pub struct ExperimentService {
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
}

impl ExperimentService {
    pub fn new(store: Arc<Store>, dispatcher: Arc<Dispatcher>) -> Self {
        ExperimentService { store, dispatcher }
    }

    /// Records, dispatches and reconciles one injection.
    ///
    /// A dispatch error is returned as-is and leaves the record `Created`.
    /// A failed executor response marks the record `Error` and is returned
    /// as a normal response.
    pub fn create(
        &self,
        req: CreateExperimentRequest,
        cancel: CancelFlag,
    ) -> Result<(Response, ExperimentRecord)> {
        if req.target.is_empty() || req.action.is_empty() {
            return Err(ServiceError::parameter_less("target|action"));
        }
        let uid = if req.uid.is_empty() {
            allocate_uid(|u| Ok(self.store.query_experiment_by_uid(u)?.is_some()))?
        } else {
            validate_uid(&req.uid)?;
            req.uid.clone()
        };
        let flags = req.flags.unwrap_or_default();

        let (command, sub_command) = split_command(&req.scope, &req.target, &req.action);
        let mut record = ExperimentRecord {
            uid: uid.clone(),
            command,
            sub_command,
            flag: flags::serialize(&flags),
            status: Status::Created.to_string(),
            ..ExperimentRecord::default()
        };
        self.store
            .insert_experiment(&mut record)
            .map_err(|e| ServiceError::database("insert", e))?;
        if !req.description.is_empty() {
            tracing::info!(uid = %uid, "creating experiment: {}", req.description);
        }

        let model = ExpModel::new(req.scope, req.target, req.action, flags);
        let ctx = ExecContext::new(&uid).with_cancel_flag(cancel);
        let mut resp = self
            .dispatcher
            .dispatch(&ctx, &ExecutionRequest::create(model))?;

        if resp.success {
            self.mark(&uid, Status::Success, "");
            resp.result = Some(uid.clone().into());
        } else {
            self.mark(&uid, Status::Error, &resp.err);
        }

        let record = match self.store.query_experiment_by_uid(&uid) {
            Ok(Some(r)) => r,
            _ => {
                let status = if resp.success {
                    Status::Success
                } else {
                    Status::Error
                };
                record.status = status.to_string();
                record.error = resp.err.clone();
                record
            }
        };
        Ok((resp, record))
    }

    /// Tears down an injection. Only a successful response moves the record
    /// to `Destroyed`.
    pub fn destroy(&self, req: DestroyExperimentRequest, cancel: CancelFlag) -> Result<Response> {
        if req.uid.is_empty() {
            return Err(ServiceError::parameter_less("uid"));
        }
        let record = self
            .store
            .query_experiment_by_uid(&req.uid)
            .map_err(|e| ServiceError::database("query", e))?;

        let model = match &record {
            Some(r) => revive(r)?,
            None if !req.target.is_empty() && !req.action.is_empty() => ExpModel::new(
                req.scope,
                req.target,
                req.action,
                req.flags.unwrap_or_default(),
            ),
            None => return Err(ServiceError::not_found(&req.uid)),
        };

        let ctx = ExecContext::new(&req.uid).with_cancel_flag(cancel);
        let resp = self
            .dispatcher
            .dispatch(&ctx, &ExecutionRequest::destroy(model))?;
        if resp.success && record.is_some() {
            self.mark(&req.uid, Status::Destroyed, "");
        }
        Ok(resp)
    }

    pub fn query(&self, uid: &str) -> Result<ExperimentRecord> {
        if uid.is_empty() {
            return Err(ServiceError::parameter_less("uid"));
        }
        self.store
            .query_experiment_by_uid(uid)
            .map_err(|e| ServiceError::database("query", e))?
            .ok_or_else(|| ServiceError::not_found(uid))
    }

    pub fn status(&self, q: &StatusQuery) -> Result<Response> {
        match q.kind.to_lowercase().as_str() {
            "create" | "destroy" | "c" | "d" => {
                if !q.uid.is_empty() {
                    return Ok(Response::ok(to_json(&self.query(&q.uid)?)?));
                }
                let records = self
                    .store
                    .query_experiments(&ExperimentQuery {
                        target: q.target.clone(),
                        action: q.action.clone(),
                        flag: q.flag.clone(),
                        status: q.status.clone(),
                        limit: q.limit.clone(),
                        asc: q.asc,
                    })
                    .map_err(|e| ServiceError::database("query", e))?;
                Ok(Response::ok(to_json(&records)?))
            }
            "prepare" | "revoke" | "p" | "r" => {
                if !q.uid.is_empty() {
                    let record = self
                        .store
                        .query_preparation_by_uid(&q.uid)
                        .map_err(|e| ServiceError::database("query", e))?
                        .ok_or_else(|| ServiceError::not_found(&q.uid))?;
                    return Ok(Response::ok(to_json(&record)?));
                }
                let records = self
                    .store
                    .query_preparations(&PreparationQuery {
                        program_type: q.target.clone(),
                        status: q.status.clone(),
                        limit: q.limit.clone(),
                        asc: q.asc,
                    })
                    .map_err(|e| ServiceError::database("query", e))?;
                Ok(Response::ok(to_json(&records)?))
            }
            _ => {
                if q.uid.is_empty() {
                    return Err(ServiceError::parameter_less(
                        "type|uid, must specify the right type or uid",
                    ));
                }
                if let Some(r) = self
                    .store
                    .query_experiment_by_uid(&q.uid)
                    .map_err(|e| ServiceError::database("query", e))?
                {
                    return Ok(Response::ok(to_json(&r)?));
                }
                if let Some(r) = self
                    .store
                    .query_preparation_by_uid(&q.uid)
                    .map_err(|e| ServiceError::database("query", e))?
                {
                    return Ok(Response::ok(to_json(&r)?));
                }
                Err(ServiceError::not_found(&q.uid))
            }
        }
    }

    // Post-dispatch bookkeeping: the executor's answer stands even if the
    // store cannot record it.
    fn mark(&self, uid: &str, status: Status, err: &str) {
        if let Err(e) = self
            .store
            .update_experiment_status_by_uid(uid, status.as_str(), err)
        {
            tracing::warn!("failed to update experiment {} to {}: {}", uid, status, e);
        }
    }
}

fn revive(record: &ExperimentRecord) -> Result<ExpModel> {
    let (scope, target, action) = revive_command(&record.command, &record.sub_command);
    let flags = flags::parse(&record.flag)
        .map_err(|e| ServiceError::parameter_illegal("flag", e.to_string()))?;
    Ok(ExpModel::new(scope, target, action, flags))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ServiceError::database("encode", e))
}
