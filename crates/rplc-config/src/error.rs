use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse TOML config at {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("could not determine the user config directory")]
    NoUserConfigDir,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
