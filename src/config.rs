//! Custodian Configuration
//!
//! Loads and saves the runtime configuration from `~/.custodian/custodian.json`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::types::{default_config, CustodianConfig};

/// Config file name within the custodian directory.
const CONFIG_FILENAME: &str = "custodian.json";

/// Returns the custodian state directory: `~/.custodian`.
pub fn get_custodian_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    home.join(".custodian")
}

/// Returns the full path to the config file: `~/.custodian/custodian.json`.
pub fn get_config_path() -> PathBuf {
    get_custodian_dir().join(CONFIG_FILENAME)
}

/// Load the config from disk, merging missing fields with defaults.
///
/// Returns `None` if the config file does not exist or cannot be parsed;
/// callers fall back to [`default_config`].
pub fn load_config() -> Option<CustodianConfig> {
    let config_path = get_config_path();
    if !config_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(&config_path).ok()?;
    let mut config: CustodianConfig = serde_json::from_str(&contents).ok()?;

    // Merge defaults for unset fields
    let defaults = default_config();

    if config.live_root.is_empty() {
        config.live_root = defaults.live_root;
    }
    if config.backend_url.is_empty() {
        config.backend_url = defaults.backend_url;
    }
    if config.backups_dir.is_empty() {
        config.backups_dir = defaults.backups_dir;
    }
    if config.staging_dir.is_empty() {
        config.staging_dir = defaults.staging_dir;
    }
    if config.packages_dir.is_empty() {
        config.packages_dir = defaults.packages_dir;
    }
    if config.db_path.is_empty() {
        config.db_path = defaults.db_path;
    }
    if config.version.is_empty() {
        config.version = defaults.version;
    }

    Some(config)
}

/// Save the config to disk at `~/.custodian/custodian.json`.
///
/// Creates the custodian directory with mode 0o700 if it does not exist.
/// The config file is written with mode 0o600.
pub fn save_config(config: &CustodianConfig) -> Result<()> {
    let dir = get_custodian_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create custodian directory")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    let config_path = get_config_path();
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, &json).context("Failed to write config file")?;
    fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolved on-disk locations the workflow operates on, derived from the
/// config with `~` expanded.
#[derive(Clone, Debug)]
pub struct WorkspacePaths {
    pub live_root: std::path::PathBuf,
    pub backups_dir: std::path::PathBuf,
    pub staging_dir: std::path::PathBuf,
    pub packages_dir: std::path::PathBuf,
}

impl WorkspacePaths {
    pub fn from_config(config: &CustodianConfig) -> Self {
        Self {
            live_root: resolve_path(&config.live_root).into(),
            backups_dir: resolve_path(&config.backups_dir).into(),
            staging_dir: resolve_path(&config.staging_dir).into(),
            packages_dir: resolve_path(&config.packages_dir).into(),
        }
    }
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_with_tilde() {
        let resolved = resolve_path("~/some/path");
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with("some/path"));
    }

    #[test]
    fn test_resolve_path_without_tilde() {
        let path = "/absolute/path/to/file";
        assert_eq!(resolve_path(path), path);
    }

    #[test]
    fn test_default_config_values() {
        let config = default_config();
        assert_eq!(config.backend_url, "http://localhost:8000/api");
        assert_eq!(config.db_path, "~/.custodian/state.db");
        assert_eq!(config.version, "0.1.0");
    }
}
