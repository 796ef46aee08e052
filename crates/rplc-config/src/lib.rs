//! Configuration loading for the replica-management control plane.
//!
//! Layered precedence, highest wins: environment variables (`RPLC_*`) >
//! `replicator.local.toml` (gitignored, local overrides) > `replicator.toml`
//! (project config) > `~/.config/replicator/replicator.toml` (user
//! defaults) > built-in [`Settings::default`]. [`Settings`] is loaded once
//! and passed by value into `Controller::new` — never read from a global.

mod error;
mod loader;
mod paths;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;
use rplc_types::DatabaseFamily;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub controller: ControllerSettings,
    pub workers: Vec<WorkerSettings>,
    pub families: Vec<DatabaseFamily>,
    pub services: ServicesSettings,
    pub ingest: IngestSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub host: String,
    pub request_timeout_secs: u64,
    pub max_concurrent_per_worker: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self { host: "localhost".to_string(), request_timeout_secs: 30, max_concurrent_per_worker: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ServicesSettings {
    Memory,
    Sqlite { path: PathBuf },
}

impl Default for ServicesSettings {
    fn default() -> Self {
        ServicesSettings::Sqlite { path: PathBuf::from(".replicator/catalog.sqlite") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub bind_address: String,
    pub scratch_dir: PathBuf,
    pub auth_key: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1:25081".to_string(), scratch_dir: PathBuf::from(".replicator/ingest"), auth_key: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

impl Settings {
    /// Loads from the default set of locations relative to the current
    /// directory.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn load_from_dir(project_dir: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_self_consistent() {
        let settings = Settings::default();
        assert_eq!(settings.controller.host, "localhost");
        assert!(settings.workers.is_empty());
        assert!(matches!(settings.services, ServicesSettings::Sqlite { .. }));
    }
}
