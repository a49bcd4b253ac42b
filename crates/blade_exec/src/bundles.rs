//! Executor bundles shipped with the binary, optionally replaced from disk.

use std::path::Path;

use blade_spec::{BundleSpec, SpecError};

pub const OS: &str = "os";
pub const JVM: &str = "jvm";
pub const CRI: &str = "cri";

pub fn embedded(name: &str) -> Option<&'static str> {
    match name {
        OS => Some(include_str!("../specs/os.yaml")),
        JVM => Some(include_str!("../specs/jvm.yaml")),
        CRI => Some(include_str!("../specs/cri.yaml")),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("unknown bundle {0}")]
    Unknown(String),
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("bundle {name}: {source}")]
    Parse { name: String, source: SpecError },
}

/// `<dir>/<name>.yaml` when present, the embedded copy otherwise.
pub fn load(name: &str, override_dir: Option<&Path>) -> Result<BundleSpec, BundleError> {
    let on_disk = override_dir
        .map(|dir| dir.join(format!("{name}.yaml")))
        .filter(|p| p.is_file());
    let text = match on_disk {
        Some(path) => {
            tracing::info!("loading {} bundle from {}", name, path.display());
            std::fs::read_to_string(&path).map_err(|source| BundleError::Read {
                path: path.display().to_string(),
                source,
            })?
        }
        None => embedded(name)
            .ok_or_else(|| BundleError::Unknown(name.to_string()))?
            .to_string(),
    };
    BundleSpec::from_yaml(&text).map_err(|source| BundleError::Parse {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn embedded_bundles_parse() {
        for name in [OS, JVM, CRI] {
            let spec = load(name, None).unwrap();
            assert_eq!(spec.name, name);
            assert!(!spec.models.is_empty());
        }
        assert!(matches!(load("k8s", None), Err(BundleError::Unknown(_))));
    }

    #[test]
    fn directory_override_wins() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("os.yaml"),
            "name: os\nmodels:\n  - target: os\n    actions:\n      - action: load\n",
        )
        .unwrap();
        let spec = load(OS, Some(dir.path())).unwrap();
        assert_eq!(spec.models.len(), 1);
        // jvm has no override file and comes from the binary
        assert!(load(JVM, Some(dir.path())).unwrap().models.len() > 1);
    }
}
