//! Staging Area
//!
//! Candidate files are written under `staging/<package-id>/`, mirroring
//! their live-relative layout. The live tree is never touched while a
//! package sits in staging; only a gated deploy copies files out.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::WorkspacePaths;
use crate::snapshot::fsops::write_file_atomic;

/// Directory holding the staged payload for `package_id`.
pub fn staging_dir(paths: &WorkspacePaths, package_id: &str) -> PathBuf {
    paths.staging_dir.join(package_id)
}

/// Write all candidate files for a package into its staging directory.
pub fn stage_files(
    paths: &WorkspacePaths,
    package_id: &str,
    source_files: &BTreeMap<String, String>,
) -> Result<()> {
    let dir = staging_dir(paths, package_id);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create staging dir {}", dir.display()))?;

    for (rel, content) in source_files {
        write_file_atomic(&dir.join(rel), content)?;
    }

    Ok(())
}

/// Remove a package's staged payload. Missing directories are fine; the
/// discard path may run after a crash that already cleaned up.
pub fn remove_staging(paths: &WorkspacePaths, package_id: &str) -> Result<()> {
    let dir = staging_dir(paths, package_id);
    if dir.exists() {
        fs::remove_dir_all(&dir)
            .with_context(|| format!("failed to remove staging dir {}", dir.display()))?;
    }
    Ok(())
}

/// Map a backend sandbox path onto the live-relative path it targets.
///
/// Generated files usually replace one of the request's context files; a
/// file-name match wins. Anything else is a new file and lands at its
/// path relative to the sandbox directory. The result is always a plain
/// relative path: root, prefix, and parent-directory components are
/// dropped, so joining it to the live root cannot escape the live tree.
pub fn target_path(sandbox_path: &str, context_files: &[String]) -> String {
    let name = Path::new(sandbox_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| sandbox_path.to_string());

    if let Some(matched) = context_files.iter().find(|c| {
        Path::new(c)
            .file_name()
            .map(|n| n.to_string_lossy() == name.as_str())
            .unwrap_or(false)
    }) {
        return matched.clone();
    }

    let normals: Vec<String> = Path::new(sandbox_path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    // Anything under a sandbox directory is relative to it.
    let start = normals
        .iter()
        .rposition(|part| part == "sandbox")
        .map(|i| i + 1)
        .unwrap_or(0);

    let rel = normals[start..].join("/");
    if rel.is_empty() {
        name
    } else {
        rel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use uuid::Uuid;

    #[test]
    fn test_stage_files_mirrors_layout() {
        let base = env::temp_dir().join(format!("custodian-staging-{}", Uuid::new_v4()));
        let paths = WorkspacePaths {
            live_root: base.join("live"),
            backups_dir: base.join("backups"),
            staging_dir: base.join("staging"),
            packages_dir: base.join("packages"),
        };

        let mut files = BTreeMap::new();
        files.insert("frontend/chat.js".to_string(), "// candidate".to_string());
        stage_files(&paths, "p1", &files).unwrap();

        let staged = staging_dir(&paths, "p1").join("frontend/chat.js");
        assert_eq!(fs::read_to_string(staged).unwrap(), "// candidate");

        remove_staging(&paths, "p1").unwrap();
        assert!(!staging_dir(&paths, "p1").exists());
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_remove_staging_tolerates_missing_dir() {
        let base = env::temp_dir().join(format!("custodian-staging-{}", Uuid::new_v4()));
        let paths = WorkspacePaths {
            live_root: base.join("live"),
            backups_dir: base.join("backups"),
            staging_dir: base.join("staging"),
            packages_dir: base.join("packages"),
        };
        remove_staging(&paths, "never-staged").unwrap();
    }

    #[test]
    fn test_target_path_prefers_context_file_name_match() {
        let context = vec![
            "frontend/index.html".to_string(),
            "frontend/chat.js".to_string(),
        ];
        assert_eq!(
            target_path("./backend/sandbox/chat.js", &context),
            "frontend/chat.js"
        );
    }

    #[test]
    fn test_target_path_strips_sandbox_prefix_for_new_files() {
        assert_eq!(
            target_path("./backend/sandbox/new_helper.py", &[]),
            "new_helper.py"
        );
        assert_eq!(target_path("sandbox/util/format.py", &[]), "util/format.py");
    }

    #[test]
    fn test_target_path_never_escapes_the_live_root() {
        // Absolute sandbox paths map to a relative target.
        assert_eq!(target_path("/tmp/work/sandbox/gen.py", &[]), "gen.py");
        assert_eq!(target_path("/etc/passwd", &[]), "etc/passwd");
        // Parent-directory components are dropped.
        assert_eq!(target_path("../../etc/passwd", &[]), "etc/passwd");
        assert_eq!(
            target_path("sandbox/../../../escape.py", &[]),
            "escape.py"
        );
    }
}
