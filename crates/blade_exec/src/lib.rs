//! Executors that carry out fault injections.
//!
//! * [`OsExecutor`] runs `os load` on an in-process CPU worker pool and
//!   forwards other host actions to the OS injection binary.
//! * [`CriExecutor`] enters a container's namespaces and delegates.
//! * [`JvmExecutor`] drives a sandbox agent that [`SandboxAttacher`]
//!   installed beforehand.

pub mod bundles;
pub mod channel;
pub mod cri;
pub mod jvm;
pub mod ns;
pub mod os;
pub mod pool;

pub use channel::LocalChannel;
pub use cri::CriExecutor;
pub use jvm::{AttachRequest, JvmExecutor, SandboxAttacher};
pub use ns::{Namespace, NamespaceEntry, NsError, ProcNamespaces};
pub use os::OsExecutor;
pub use pool::{CpuLoadPool, PoolError};
