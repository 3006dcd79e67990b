//! Configuration loading and validation.
//!
//! Configuration is layered with [`figment`], later layers overriding
//! earlier ones:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. a configuration file (TOML, YAML or JSON, picked by extension), either
//!    given explicitly or `config.toml` in the platform config directory,
//! 3. environment variables prefixed with `SHELLSYNC_`, nested keys
//!    separated by `__` (e.g. `SHELLSYNC_BUCKETS__DURABLE`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SHELLSYNC_";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin the application is served from, e.g. `https://app.example.com`.
    pub origin: String,
    /// Path of the deployment descriptor (resource manifest and shell keys).
    pub deployment: PathBuf,
    pub storage: StorageConfig,
    pub buckets: BucketNames,
    pub fetch: FetchConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            origin: String::new(),
            deployment: PathBuf::from("deployment.json"),
            storage: StorageConfig::default(),
            buckets: BucketNames::default(),
            fetch: FetchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the cache buckets. Defaults to the platform data
    /// directory.
    pub root: Option<PathBuf>,
}

/// Names of the three cache generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketNames {
    pub durable: String,
    pub staging: String,
    pub manifest: String,
}
impl Default for BucketNames {
    fn default() -> Self {
        Self {
            durable: "shellsync-app-cache".to_string(),
            staging: "shellsync-temp-cache".to_string(),
            manifest: "shellsync-app-manifest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds; unset means no timeout.
    pub timeout_secs: Option<u64>,
}
impl FetchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load and validate configuration from every layer.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(origin = %config.origin, deployment = %config.deployment.display(), "Loaded configuration");
        Ok(config)
    }

    /// The merged [`Figment`] before extraction.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match file {
            Some(path) => figment = merge_file(figment, path),
            None => {
                if let Some(path) = default_config_file()
                    && path.is_file()
                {
                    figment = merge_file(figment, &path);
                }
            },
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        let origin = self.origin.trim();
        if origin.is_empty() {
            exn::bail!(invalid("origin", "must be set"));
        }
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            exn::bail!(invalid("origin", "must be an http or https URL"));
        }
        if self.deployment.as_os_str().is_empty() {
            exn::bail!(invalid("deployment", "must be set"));
        }
        let names = [&self.buckets.durable, &self.buckets.staging, &self.buckets.manifest];
        if names.iter().any(|name| name.trim().is_empty()) {
            exn::bail!(invalid("buckets", "bucket names must not be empty"));
        }
        if names.iter().collect::<HashSet<_>>().len() != names.len() {
            exn::bail!(invalid("buckets", "durable, staging and manifest buckets must be distinct"));
        }
        if self.fetch.timeout_secs == Some(0) {
            exn::bail!(invalid("fetch.timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }

    /// Absolute directory for the local cache storage.
    pub fn storage_root(&self) -> Result<PathBuf> {
        let root = match &self.storage.root {
            Some(root) => root.clone(),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().join("cache"))
                .ok_or_else(|| exn::Exn::from(invalid("storage.root", "no home directory to derive a default from")))?,
        };
        std::path::absolute(&root).or_raise(|| invalid("storage.root", format!("cannot resolve {}", root.display())))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ErrorKind {
    ErrorKind::Invalid { field, reason: reason.into() }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "shellsync")
}

/// Location of the configuration file used when none is given explicitly.
pub fn default_config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
