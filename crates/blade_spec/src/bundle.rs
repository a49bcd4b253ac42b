//! Declarative executor bundles.
//!
//! ```yaml
//! name: os
//! models:
//!   - target: cpu
//!     actions:
//!       - action: fullload
//!         aliases: [fl, load]
//! ```

use serde::Deserialize;

use crate::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct BundleSpec {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub target: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    pub action: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl BundleSpec {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

impl ModelSpec {
    /// Command name the model's actions are registered under. Host-level
    /// scopes stay out of the name; anything else is glued on.
    pub fn command_name(&self) -> String {
        match self.scope.as_str() {
            "" | "host" | "docker" | "cri" => self.target.clone(),
            scope => format!("{scope}-{}", self.target),
        }
    }
}

impl ActionSpec {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.action.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_models_and_glues_foreign_scopes() {
        let spec = BundleSpec::from_yaml(
            "name: k8s\nmodels:\n  - target: pod\n    scope: k8s\n    actions:\n      - action: delete\n        aliases: [rm]\n  - target: cpu\n    scope: host\n    actions:\n      - action: fullload\n",
        )
        .unwrap();
        assert_eq!(spec.models.len(), 2);
        assert_eq!(spec.models[0].command_name(), "k8s-pod");
        assert_eq!(spec.models[1].command_name(), "cpu");
        let names: Vec<&str> = spec.models[0].actions[0].names().collect();
        assert_eq!(names, vec!["delete", "rm"]);
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(BundleSpec::from_yaml("models: [").is_err());
    }
}
