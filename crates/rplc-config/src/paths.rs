use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::ConfigError;

/// XDG-compliant path discovery, mirroring the layout a deployed
/// `rplc` controller or CLI looks for configuration in.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self { project_dirs: ProjectDirs::from("dev", "kimberlite", "replicator") }
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs.as_ref().map(|p| p.config_dir().join("replicator.toml")).ok_or(ConfigError::NoUserConfigDir)
    }

    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("replicator.toml")
    }

    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("replicator.local.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_and_local_files_live_under_the_project_dir() {
        let dir = Path::new("/srv/replicator");
        assert_eq!(Paths::project_config_file(dir), dir.join("replicator.toml"));
        assert_eq!(Paths::local_config_file(dir), dir.join("replicator.local.toml"));
    }
}
