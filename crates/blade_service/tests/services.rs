use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use blade_service::{
    CreateExperimentRequest, DestroyExperimentRequest, Dispatcher, ExperimentService, StatusQuery,
};
use blade_spec::{CancelFlag, Channel, ErrorKind, ExecContext, ExpModel, Executor, Intent, Response};
use blade_store::Store;

/// Records every call and answers with a fixed response per intent.
struct Scripted {
    create: Response,
    destroy: Response,
    calls: Mutex<Vec<(Intent, String)>>,
}

impl Scripted {
    fn ok() -> Arc<Self> {
        Self::with(Response::ok_empty(), Response::ok("destroyed"))
    }

    fn with(create: Response, destroy: Response) -> Arc<Self> {
        Arc::new(Scripted {
            create,
            destroy,
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl Executor for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn set_channel(&self, _channel: Arc<dyn Channel>) {}

    fn exec(&self, ctx: &ExecContext, model: &ExpModel) -> Response {
        self.calls
            .lock()
            .unwrap()
            .push((ctx.intent(), model.key()));
        match ctx.intent() {
            Intent::Create => self.create.clone(),
            Intent::Destroy => self.destroy.clone(),
        }
    }
}

fn setup(exec: Arc<Scripted>) -> (ExperimentService, Arc<Store>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register("", "cpu", "fullload", Some(exec.clone() as Arc<dyn Executor>));
    dispatcher.register("cri", "jvm", "delay", Some(exec as Arc<dyn Executor>));
    (ExperimentService::new(store.clone(), dispatcher), store)
}

fn cpu_request(uid: &str) -> CreateExperimentRequest {
    let mut flags = BTreeMap::new();
    flags.insert("cpu-percent".to_string(), "60".to_string());
    CreateExperimentRequest {
        uid: uid.into(),
        target: "cpu".into(),
        action: "fullload".into(),
        flags: Some(flags),
        ..CreateExperimentRequest::default()
    }
}

#[test]
fn create_success_marks_record_and_returns_uid() {
    let exec = Scripted::ok();
    let (svc, _) = setup(exec.clone());

    let (resp, record) = svc.create(cpu_request(""), CancelFlag::new()).unwrap();
    assert!(resp.success);
    assert_eq!(resp.result_str(), Some(record.uid.as_str()));
    assert_eq!(record.uid.len(), 32);
    assert_eq!(record.command, "cpu");
    assert_eq!(record.sub_command, "fullload");
    assert_eq!(record.flag, "--cpu-percent=60");
    assert_eq!(record.status, "Success");
    assert_eq!(exec.calls.lock().unwrap().len(), 1);
}

#[test]
fn executor_failure_marks_error_and_keeps_response() {
    let exec = Scripted::with(
        Response::illegal("cpu-percent", "must be between 1 and 100"),
        Response::ok_empty(),
    );
    let (svc, store) = setup(exec);

    let (resp, record) = svc.create(cpu_request("bad"), CancelFlag::new()).unwrap();
    assert!(!resp.success);
    assert_eq!(resp.code, ErrorKind::ParameterIllegal.code());
    assert_eq!(record.status, "Error");
    assert!(record.error.contains("cpu-percent"));

    let stored = store.query_experiment_by_uid("bad").unwrap().unwrap();
    assert_eq!(stored.status, "Error");
}

#[test]
fn missing_executor_leaves_record_created() {
    let (svc, store) = setup(Scripted::ok());
    let req = CreateExperimentRequest {
        uid: "nope".into(),
        target: "disk".into(),
        action: "fill".into(),
        ..CreateExperimentRequest::default()
    };
    let err = svc.create(req, CancelFlag::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandlerExecNotFound);

    let stored = store.query_experiment_by_uid("nope").unwrap().unwrap();
    assert_eq!(stored.status, "Created");
}

#[test]
fn create_requires_target_and_action() {
    let (svc, _) = setup(Scripted::ok());
    let err = svc
        .create(CreateExperimentRequest::default(), CancelFlag::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterLess);
}

#[test]
fn oversized_uid_is_rejected_before_insert() {
    let (svc, store) = setup(Scripted::ok());
    let uid = "x".repeat(33);
    let err = svc.create(cpu_request(&uid), CancelFlag::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterIllegal);
    assert!(store.query_experiment_by_uid(&uid).unwrap().is_none());
}

#[test]
fn destroy_revives_model_from_record() {
    let exec = Scripted::ok();
    let (svc, store) = setup(exec.clone());
    let req = CreateExperimentRequest {
        uid: "c1".into(),
        scope: "cri".into(),
        target: "jvm".into(),
        action: "delay".into(),
        ..CreateExperimentRequest::default()
    };
    let (_, record) = svc.create(req, CancelFlag::new()).unwrap();
    assert_eq!(record.command, "cri");
    assert_eq!(record.sub_command, "jvm delay");

    let resp = svc
        .destroy(
            DestroyExperimentRequest {
                uid: "c1".into(),
                ..DestroyExperimentRequest::default()
            },
            CancelFlag::new(),
        )
        .unwrap();
    assert!(resp.success);
    assert_eq!(
        store.query_experiment_by_uid("c1").unwrap().unwrap().status,
        "Destroyed"
    );
    assert_eq!(
        exec.calls.lock().unwrap().last().unwrap(),
        &(Intent::Destroy, "cri-jvm-delay".to_string())
    );
}

#[test]
fn destroy_without_record_uses_request_fields() {
    let exec = Scripted::ok();
    let (svc, store) = setup(exec.clone());
    let resp = svc
        .destroy(
            DestroyExperimentRequest {
                uid: "orphan".into(),
                target: "cpu".into(),
                action: "fullload".into(),
                ..DestroyExperimentRequest::default()
            },
            CancelFlag::new(),
        )
        .unwrap();
    assert!(resp.success);
    assert!(store.query_experiment_by_uid("orphan").unwrap().is_none());
    assert_eq!(exec.calls.lock().unwrap().len(), 1);
}

#[test]
fn destroy_unknown_uid_is_not_found() {
    let (svc, _) = setup(Scripted::ok());
    let err = svc
        .destroy(
            DestroyExperimentRequest {
                uid: "ghost".into(),
                ..DestroyExperimentRequest::default()
            },
            CancelFlag::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataNotFound);
}

#[test]
fn failed_destroy_keeps_previous_status() {
    let exec = Scripted::with(
        Response::ok_empty(),
        Response::fail(ErrorKind::OsCmdExecFailed, "chaos_os exited with 1"),
    );
    let (svc, store) = setup(exec);
    svc.create(cpu_request("k1"), CancelFlag::new()).unwrap();
    let resp = svc
        .destroy(
            DestroyExperimentRequest {
                uid: "k1".into(),
                ..DestroyExperimentRequest::default()
            },
            CancelFlag::new(),
        )
        .unwrap();
    assert!(!resp.success);
    assert_eq!(
        store.query_experiment_by_uid("k1").unwrap().unwrap().status,
        "Success"
    );
}

#[test]
fn status_filters_by_target_and_status() {
    let (svc, _) = setup(Scripted::ok());
    svc.create(cpu_request("s1"), CancelFlag::new()).unwrap();
    svc.create(cpu_request("s2"), CancelFlag::new()).unwrap();

    let resp = svc
        .status(&StatusQuery {
            kind: "create".into(),
            target: "cpu".into(),
            status: "success".into(),
            ..StatusQuery::default()
        })
        .unwrap();
    let list = resp.result.unwrap();
    let uids: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uid"].as_str().unwrap())
        .collect();
    assert_eq!(uids, vec!["s2", "s1"]);

    let resp = svc
        .status(&StatusQuery {
            uid: "s1".into(),
            ..StatusQuery::default()
        })
        .unwrap();
    assert_eq!(resp.result.unwrap()["uid"], "s1");
}

#[test]
fn status_needs_type_or_uid() {
    let (svc, _) = setup(Scripted::ok());
    let err = svc.status(&StatusQuery::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterLess);

    let err = svc
        .status(&StatusQuery {
            uid: "missing".into(),
            ..StatusQuery::default()
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataNotFound);
}
