use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::paths::Paths;
use crate::Settings;

/// Builder that merges the layered TOML sources and a curated set of
/// `RPLC_*` environment overrides into one [`Settings`] value.
///
/// Unlike the original's `kimberlite-config`, which delegates layering to
/// the `config` crate, this loader merges `toml::Value` tables by hand
/// (recursively, later sources overwrite earlier keys) since this
/// workspace depends on `toml` directly rather than the `config` crate —
/// the env-var layer therefore only recognizes a fixed set of known keys
/// rather than arbitrary nested paths.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")), env_prefix: "RPLC".to_string() }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(self) -> Result<Settings, ConfigError> {
        let defaults = toml::Value::try_from(Settings::default()).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let mut merged = defaults;

        let paths = Paths::new();
        if let Ok(user_file) = paths.user_config_file() {
            merge_file(&mut merged, &user_file)?;
        }
        merge_file(&mut merged, &Paths::project_config_file(&self.project_dir))?;
        merge_file(&mut merged, &Paths::local_config_file(&self.project_dir))?;

        apply_env_overrides(&mut merged, &self.env_prefix, env::vars());

        merged.try_into().map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn load_or_default(self) -> Settings {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_file(base: &mut toml::Value, path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read { path: path.to_path_buf(), source: e })?;
    let overlay: toml::Value = toml::from_str(&text).map_err(|e| ConfigError::Parse { path: path.to_path_buf(), source: e })?;
    merge_values(base, &overlay);
    Ok(())
}

fn merge_values(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_table.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value.clone(),
    }
}

/// Recognized overrides: `<PREFIX>_CONTROLLER_HOST`,
/// `<PREFIX>_CONTROLLER_REQUEST_TIMEOUT_SECS`, `<PREFIX>_LOGGING_FILTER`,
/// `<PREFIX>_INGEST_BIND_ADDRESS`, `<PREFIX>_INGEST_AUTH_KEY`. Takes the
/// variable iterator explicitly so tests can supply a fixed set instead
/// of mutating the process environment.
fn apply_env_overrides(merged: &mut toml::Value, prefix: &str, vars: impl Iterator<Item = (String, String)>) {
    let overrides: &[(&str, &[&str])] = &[
        ("CONTROLLER_HOST", &["controller", "host"]),
        ("CONTROLLER_REQUEST_TIMEOUT_SECS", &["controller", "request_timeout_secs"]),
        ("LOGGING_FILTER", &["logging", "filter"]),
        ("INGEST_BIND_ADDRESS", &["ingest", "bind_address"]),
        ("INGEST_AUTH_KEY", &["ingest", "auth_key"]),
    ];
    let env: std::collections::HashMap<String, String> = vars.collect();
    for (suffix, path) in overrides {
        let Some(raw) = env.get(&format!("{prefix}_{suffix}")) else { continue };
        set_path(merged, path, raw.clone());
    }
}

fn set_path(root: &mut toml::Value, path: &[&str], raw: String) {
    let Some((leaf, ancestors)) = path.split_last() else { return };
    let mut node = root;
    for segment in ancestors {
        let table = node.as_table_mut().expect("config root is always a table");
        node = table.entry(segment.to_string()).or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    let table = node.as_table_mut().expect("config root is always a table");
    let parsed = raw.parse::<i64>().map(toml::Value::Integer).unwrap_or(toml::Value::String(raw));
    table.insert((*leaf).to_string(), parsed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(Paths::project_config_file(dir.path()), "[controller]\nhost = \"10.0.0.1\"\n").unwrap();

        let settings = ConfigLoader::new().with_project_dir(dir.path()).load().unwrap();
        assert_eq!(settings.controller.host, "10.0.0.1");
        assert_eq!(settings.controller.request_timeout_secs, 30);
    }

    #[test]
    fn local_file_overrides_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(Paths::project_config_file(dir.path()), "[controller]\nhost = \"10.0.0.1\"\n").unwrap();
        std::fs::write(Paths::local_config_file(dir.path()), "[controller]\nhost = \"127.0.0.1\"\n").unwrap();

        let settings = ConfigLoader::new().with_project_dir(dir.path()).load().unwrap();
        assert_eq!(settings.controller.host, "127.0.0.1");
    }

    #[test]
    fn env_override_wins_over_every_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(Paths::project_config_file(dir.path()), "[logging]\nfilter = \"debug\"\n").unwrap();

        let defaults = toml::Value::try_from(Settings::default()).unwrap();
        let mut merged = defaults;
        merge_file(&mut merged, &Paths::project_config_file(dir.path())).unwrap();
        apply_env_overrides(&mut merged, "RPLC", std::iter::once(("RPLC_LOGGING_FILTER".to_string(), "trace".to_string())));

        let settings: Settings = merged.try_into().unwrap();
        assert_eq!(settings.logging.filter, "trace");
    }
}
