//! Deployment descriptor: everything a build hands to the worker.

use crate::error::{ErrorKind, Result};
use crate::manifest::{ResourceKey, ResourceManifest};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The resource manifest of a deployment plus its application shell.
///
/// ```json
/// {
///   "resources": { "/": "2a7c...", "index.html": "2a7c...", "main.js": "91d0..." },
///   "core": ["/", "main.js"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub resources: ResourceManifest,
    /// Shell keys, fetched into staging on install.
    #[serde(default)]
    pub core: Vec<ResourceKey>,
}

impl Deployment {
    /// Create a deployment, checking that every shell key is a listed resource.
    pub fn new(resources: ResourceManifest, core: Vec<ResourceKey>) -> Result<Self> {
        let deployment = Self { resources, core };
        deployment.validate()?;
        Ok(deployment)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let deployment: Self =
            serde_json::from_slice(bytes).or_raise(|| ErrorKind::Deployment("malformed descriptor".to_string()))?;
        deployment.validate()?;
        Ok(deployment)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .or_raise(|| ErrorKind::Deployment(format!("cannot read {}", path.display())))?;
        Self::from_json(&bytes)
    }

    fn validate(&self) -> Result<()> {
        // A shell file that isn't a listed resource would be staged and
        // promoted but never served, then purged on the next activation.
        if let Some(key) = self.core.iter().find(|key| !self.resources.contains(key)) {
            exn::bail!(ErrorKind::Deployment(format!("shell key {key} is not a listed resource")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let json = br#"{
            "resources": {"/": "aa", "index.html": "aa", "main.js": "bb", "assets/logo.png": "cc"},
            "core": ["/", "/main.js"]
        }"#;
        let deployment = Deployment::from_json(json).unwrap();
        assert_eq!(deployment.resources.len(), 4);
        assert_eq!(deployment.core, vec![ResourceKey::root(), ResourceKey::new("main.js").unwrap()]);
    }

    #[test]
    fn test_core_defaults_to_empty() {
        let deployment = Deployment::from_json(br#"{"resources": {"a.js": "01"}}"#).unwrap();
        assert!(deployment.core.is_empty());
    }

    #[test]
    fn test_unlisted_shell_key_rejected() {
        let err = Deployment::from_json(br#"{"resources": {"a.js": "01"}, "core": ["b.js"]}"#).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Deployment(_)));
    }

    #[test]
    fn test_malformed_descriptor_rejected() {
        assert!(Deployment::from_json(b"{}").is_err());
        assert!(Deployment::from_json(br#"{"resources": {"a.js": "not hex"}}"#).is_err());
    }

    #[tokio::test]
    async fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployment.json");
        std::fs::write(&path, br#"{"resources": {"/": "aa"}, "core": ["/"]}"#).unwrap();
        let deployment = Deployment::load(&path).await.unwrap();
        assert_eq!(deployment.core.len(), 1);
        assert!(Deployment::load(dir.path().join("missing.json")).await.is_err());
    }
}
