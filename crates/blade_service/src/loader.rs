use std::path::Path;
use std::sync::Arc;

use blade_exec::bundles::{self, BundleError};
use blade_exec::{CriExecutor, JvmExecutor, LocalChannel, OsExecutor};
use blade_spec::{BundleSpec, Channel, Executor};
use blade_store::Store;

use crate::dispatcher::Dispatcher;

/// The concrete executors behind the embedded bundles.
pub struct Executors {
    pub os: Arc<OsExecutor>,
    pub jvm: Arc<JvmExecutor>,
    pub cri: Arc<CriExecutor>,
}

impl Executors {
    pub fn new(store: Arc<Store>) -> Self {
        Executors {
            os: Arc::new(OsExecutor::new()),
            jvm: Arc::new(JvmExecutor::new(store)),
            cri: Arc::new(CriExecutor::new()),
        }
    }
}

/// Registers every action (and alias) of `spec` against `executor`, under
/// `parent` when it is non-empty. Returns how many keys were bound.
pub fn register_bundle(
    dispatcher: &Dispatcher,
    parent: &str,
    spec: &BundleSpec,
    executor: Arc<dyn Executor>,
    channel: Arc<dyn Channel>,
) -> usize {
    executor.set_channel(channel);
    let mut bound = 0;
    for model in &spec.models {
        let command = model.command_name();
        for action in &model.actions {
            for name in action.names() {
                dispatcher.register(parent, &command, name, Some(executor.clone()));
                bound += 1;
            }
        }
    }
    bound
}

/// Loads the os, jvm and cri bundles into the dispatcher. Bundles found in
/// `spec_dir` replace the embedded ones.
pub fn load_executors(
    dispatcher: &Dispatcher,
    executors: &Executors,
    spec_dir: Option<&Path>,
) -> Result<usize, BundleError> {
    let channel: Arc<dyn Channel> = Arc::new(LocalChannel::new());

    let os = bundles::load(bundles::OS, spec_dir)?;
    let jvm = bundles::load(bundles::JVM, spec_dir)?;
    let cri = bundles::load(bundles::CRI, spec_dir)?;

    let mut bound = register_bundle(dispatcher, "", &os, executors.os.clone(), channel.clone());
    bound += register_bundle(dispatcher, "", &jvm, executors.jvm.clone(), channel.clone());
    bound += register_bundle(dispatcher, bundles::CRI, &cri, executors.cri.clone(), channel.clone());
    // `cri jvm <action>` enters the container before reaching the sandbox.
    bound += register_bundle(dispatcher, bundles::CRI, &jvm, executors.cri.clone(), channel);

    for (spec, inner) in [
        (&os, executors.os.clone() as Arc<dyn Executor>),
        (&jvm, executors.jvm.clone() as Arc<dyn Executor>),
    ] {
        for model in &spec.models {
            for action in &model.actions {
                for name in action.names() {
                    executors.cri.register_inner(&model.target, name, inner.clone());
                }
            }
        }
    }

    tracing::info!("registered {} executor bindings", bound);
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_bundles_route_expected_keys() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let d = Dispatcher::new();
        let executors = Executors::new(store);
        let bound = load_executors(&d, &executors, None).unwrap();
        assert!(bound > 0);

        assert_eq!(d.get("", "os", "load").unwrap().name(), "os");
        assert_eq!(d.get("", "cpu", "fl").unwrap().name(), "os");
        assert_eq!(d.get("", "jvm", "delay").unwrap().name(), "jvm");
        assert_eq!(d.get("cri", "jvm", "delay").unwrap().name(), "cri");
        assert_eq!(d.get("cri", "cpu", "fullload").unwrap().name(), "cri");
        assert!(d.get("", "k8s", "delete").is_none());
    }

    #[test]
    fn foreign_scopes_are_glued_into_the_command() {
        let spec = BundleSpec::from_yaml(
            "name: k8s\nmodels:\n  - target: pod\n    scope: k8s\n    actions:\n      - action: delete\n",
        )
        .unwrap();
        let d = Dispatcher::new();
        let exec: Arc<dyn Executor> = Arc::new(OsExecutor::new());
        assert_eq!(
            register_bundle(&d, "", &spec, exec, Arc::new(LocalChannel::new())),
            1
        );
        assert!(d.get("", "k8s-pod", "delete").is_some());
    }
}
