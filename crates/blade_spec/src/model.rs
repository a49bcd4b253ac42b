use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::flags::FlagMap;

/// What an executor is asked to do to a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpModel {
    #[serde(default)]
    pub scope: String,
    pub target: String,
    pub action: String,
    #[serde(default)]
    pub flags: FlagMap,
}

impl ExpModel {
    pub fn new(
        scope: impl Into<String>,
        target: impl Into<String>,
        action: impl Into<String>,
        flags: FlagMap,
    ) -> Self {
        ExpModel {
            scope: scope.into(),
            target: target.into(),
            action: action.into(),
            flags,
        }
    }

    /// A flag value, treating an empty string as absent.
    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn key(&self) -> String {
        executor_key(&self.scope, &self.target, &self.action)
    }
}

/// Raised when the caller of an invocation has gone away.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Create,
    Destroy,
}

/// Per-invocation context handed to every executor.
///
/// `intent` tells a shared entry point whether to inject or tear down the
/// injection named by `uid`. The cancel flag is raised when the caller goes
/// away; executors check it before starting long work.
#[derive(Debug, Clone)]
pub struct ExecContext {
    uid: String,
    intent: Intent,
    cancel: CancelFlag,
}

impl ExecContext {
    pub fn new(uid: impl Into<String>) -> Self {
        ExecContext {
            uid: uid.into(),
            intent: Intent::Create,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// The uid to tear down, when this is a destroy invocation.
    pub fn destroy_uid(&self) -> Option<&str> {
        match self.intent {
            Intent::Destroy => Some(&self.uid),
            Intent::Create => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// `scope[-target][-action]`, skipping empty components.
pub fn executor_key(scope: &str, target: &str, action: &str) -> String {
    let mut key = scope.to_string();
    for part in [target, action] {
        if part.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push('-');
        }
        key.push_str(part);
    }
    key
}

/// Stored `(command, sub_command)` for a `(scope, target, action)` triple.
pub fn split_command(scope: &str, target: &str, action: &str) -> (String, String) {
    if scope.is_empty() {
        (target.to_string(), action.to_string())
    } else {
        (scope.to_string(), format!("{target} {action}"))
    }
}

/// Recovers `(scope, target, action)` from a stored command pair.
pub fn revive_command(command: &str, sub_command: &str) -> (String, String, String) {
    let parts: Vec<&str> = sub_command.split_whitespace().collect();
    match parts.as_slice() {
        [] => (String::new(), command.to_string(), String::new()),
        [action] => (String::new(), command.to_string(), action.to_string()),
        [.., target, action] => (command.to_string(), target.to_string(), action.to_string()),
    }
}
