//! Running a closure inside another process's Linux namespaces.

use std::path::PathBuf;

use blade_spec::Response;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Pid,
    Net,
    Mnt,
}

impl Namespace {
    /// Entry name under `/proc/<pid>/ns/`.
    pub fn proc_name(self) -> &'static str {
        match self {
            Namespace::Pid => "pid",
            Namespace::Net => "net",
            Namespace::Mnt => "mnt",
        }
    }
}

#[derive(Debug, Error)]
pub enum NsError {
    #[error("open namespace {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("enter {ns} namespace of pid {pid}: {reason}")]
    Enter {
        ns: &'static str,
        pid: i32,
        reason: String,
    },
    #[error("namespace worker thread: {0}")]
    Thread(String),
    #[error("namespace entry is only supported on linux")]
    Unsupported,
}

pub type Task = Box<dyn FnOnce() -> Response + Send>;

pub trait NamespaceEntry: Send + Sync {
    fn run_in(&self, pid: i32, namespaces: &[Namespace], task: Task) -> Result<Response, NsError>;
}

/// Enters namespaces through `/proc/<pid>/ns/*` on a throwaway thread, so
/// no pooled thread is ever left inside a container.
#[derive(Debug, Clone)]
pub struct ProcNamespaces {
    proc_root: PathBuf,
}

impl ProcNamespaces {
    pub fn new() -> Self {
        ProcNamespaces {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl Default for ProcNamespaces {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl NamespaceEntry for ProcNamespaces {
    fn run_in(&self, pid: i32, namespaces: &[Namespace], task: Task) -> Result<Response, NsError> {
        use nix::sched::{setns, unshare, CloneFlags};
        use std::fs::File;

        // Handles are opened up front: entering mnt changes what /proc means.
        let mut handles = Vec::with_capacity(namespaces.len());
        for ns in namespaces {
            let path = self.proc_root.join(pid.to_string()).join("ns").join(ns.proc_name());
            let file = File::open(&path).map_err(|source| NsError::Open {
                path: path.display().to_string(),
                source,
            })?;
            handles.push((*ns, file));
        }

        let worker = std::thread::Builder::new()
            .name(format!("ns-{pid}"))
            .spawn(move || -> Result<Response, NsError> {
                // setns(CLONE_NEWNS) refuses threads that share fs state.
                unshare(CloneFlags::CLONE_FS).map_err(|e| NsError::Enter {
                    ns: "fs",
                    pid,
                    reason: e.to_string(),
                })?;
                for (ns, file) in &handles {
                    let flag = match ns {
                        Namespace::Pid => CloneFlags::CLONE_NEWPID,
                        Namespace::Net => CloneFlags::CLONE_NEWNET,
                        Namespace::Mnt => CloneFlags::CLONE_NEWNS,
                    };
                    setns(file, flag).map_err(|e| NsError::Enter {
                        ns: ns.proc_name(),
                        pid,
                        reason: e.to_string(),
                    })?;
                }
                Ok(task())
            })
            .map_err(|e| NsError::Thread(e.to_string()))?;

        worker
            .join()
            .map_err(|_| NsError::Thread("panicked".to_string()))?
    }
}

#[cfg(not(target_os = "linux"))]
impl NamespaceEntry for ProcNamespaces {
    fn run_in(&self, _pid: i32, _namespaces: &[Namespace], _task: Task) -> Result<Response, NsError> {
        let _ = &self.proc_root;
        Err(NsError::Unsupported)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn missing_process_fails_to_open() {
        let err = ProcNamespaces::new()
            .run_in(i32::MAX, &[Namespace::Net], Box::new(Response::ok_empty))
            .unwrap_err();
        assert!(matches!(err, NsError::Open { .. }), "{err}");
    }
}
