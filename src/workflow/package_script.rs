//! Deploy Script Artifacts
//!
//! When a package reaches READY, a `deploy_update_<id>.sh` script is
//! written into the packages directory. The script applies the staged
//! files out-of-band; its existence is the durable record of a package
//! that was packaged but not yet deployed through the automated path.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::WorkspacePaths;
use crate::types::StagedPackage;

use super::staging::staging_dir;

/// Path the deploy script for `package_id` is written to.
pub fn script_path(paths: &WorkspacePaths, package_id: &str) -> PathBuf {
    paths
        .packages_dir
        .join(format!("deploy_update_{}.sh", package_id))
}

/// Generate the out-of-band deploy script for a READY package.
pub fn write_deploy_script(paths: &WorkspacePaths, package: &StagedPackage) -> Result<PathBuf> {
    fs::create_dir_all(&paths.packages_dir).with_context(|| {
        format!("failed to create packages dir {}", paths.packages_dir.display())
    })?;

    let staging = staging_dir(paths, &package.id);
    let mut copies = String::new();
    for rel in package.source_files.keys() {
        copies.push_str(&format!(
            "mkdir -p \"$(dirname \"$LIVE_ROOT/{rel}\")\"\ncp \"$STAGING/{rel}\" \"$LIVE_ROOT/{rel}\"\n"
        ));
    }

    let script = format!(
        r#"#!/bin/bash
# Custodian self-update deployment script
# Package: {id}
# Generated: {generated}
set -euo pipefail

LIVE_ROOT="{live_root}"
STAGING="{staging}"

echo "Applying update package {id}"
{copies}
echo "Update package {id} applied."
"#,
        id = package.id,
        generated = Utc::now().to_rfc3339(),
        live_root = paths.live_root.display(),
        staging = staging.display(),
        copies = copies,
    );

    let path = script_path(paths, &package.id);
    fs::write(&path, script)
        .with_context(|| format!("failed to write deploy script {}", path.display()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::env;
    use uuid::Uuid;

    #[test]
    fn test_script_lists_every_staged_file() {
        let base = env::temp_dir().join(format!("custodian-script-{}", Uuid::new_v4()));
        let paths = WorkspacePaths {
            live_root: base.join("live"),
            backups_dir: base.join("backups"),
            staging_dir: base.join("staging"),
            packages_dir: base.join("packages"),
        };

        let mut files = BTreeMap::new();
        files.insert("frontend/chat.js".to_string(), "a".to_string());
        files.insert("backend/main.py".to_string(), "b".to_string());
        let package = StagedPackage {
            id: "pkg-1".to_string(),
            source_files: files,
            created_at: "2026-01-01T00:00:01+00:00".to_string(),
            backup_id: "b1".to_string(),
            state: crate::types::PackageState::Ready,
            test_report: None,
        };

        let path = write_deploy_script(&paths, &package).unwrap();
        assert!(path.ends_with("deploy_update_pkg-1.sh"));

        let script = fs::read_to_string(&path).unwrap();
        assert!(script.contains("frontend/chat.js"));
        assert!(script.contains("backend/main.py"));

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
        fs::remove_dir_all(&base).unwrap();
    }
}
