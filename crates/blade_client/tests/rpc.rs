use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use blade_client::{ClientError, RpcClient};
use blade_server::{bootstrap, rpc};
use blade_service::{CreateExperimentRequest, DestroyExperimentRequest};
use blade_store::Store;

async fn start() -> RpcClient {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let services = bootstrap(store, Path::new("/nonexistent/sandbox"), None).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(rpc::serve(listener, services.experiments));
    RpcClient::new(addr.to_string()).with_timeout(Duration::from_secs(10))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_query_destroy_round_trip() {
    let client = start().await;

    tokio::task::spawn_blocking(move || {
        let mut flags = BTreeMap::new();
        flags.insert("cpu-percent".to_string(), "5".to_string());
        let created = client
            .create(CreateExperimentRequest {
                uid: "rpc1".into(),
                target: "os".into(),
                action: "load".into(),
                flags: Some(flags),
                ..CreateExperimentRequest::default()
            })
            .unwrap();
        assert!(created.success, "{created:?}");
        assert_eq!(created.uid, "rpc1");
        assert_eq!(created.code, 200);

        let record = client.query("rpc1").unwrap();
        assert_eq!(record.status, "Success");
        assert_eq!(record.command, "os");
        assert_eq!(record.sub_command, "load");

        let destroyed = client
            .destroy(DestroyExperimentRequest {
                uid: "rpc1".into(),
                ..DestroyExperimentRequest::default()
            })
            .unwrap();
        assert!(destroyed.success);
        assert_eq!(client.query("rpc1").unwrap().status, "Destroyed");
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failures_come_back_as_codes() {
    let client = start().await;

    tokio::task::spawn_blocking(move || {
        match client.query("missing") {
            Err(ClientError::Remote { code, .. }) => assert_eq!(code, 48000),
            other => panic!("unexpected {other:?}"),
        }

        let reply = client
            .create(CreateExperimentRequest {
                target: "k8s".into(),
                action: "delete".into(),
                ..CreateExperimentRequest::default()
            })
            .unwrap();
        assert!(!reply.success);
        assert_eq!(reply.code, 51000);
    })
    .await
    .unwrap();
}
