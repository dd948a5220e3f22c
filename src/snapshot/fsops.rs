//! Transactional File Operations
//!
//! Live files are only ever replaced via write-to-temp-then-rename so a
//! failure partway through one file leaves either the old content or the
//! new content, never a torn write.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

/// Write `content` to `path` atomically: the bytes land in a temp file in
/// the same directory, which is then renamed over the target.
pub fn write_file_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string()),
        Uuid::new_v4()
    ));

    fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;

    if let Err(e) = fs::rename(&tmp, path) {
        // Leave nothing behind on a failed rename.
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("failed to rename into {}", path.display()));
    }

    Ok(())
}

/// Read a file to a string with path context attached.
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Copy one file atomically (read fully, then [`write_file_atomic`]).
pub fn copy_file_atomic(from: &Path, to: &Path) -> Result<()> {
    let content = read_file(from)?;
    write_file_atomic(to, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scratch_dir() -> std::path::PathBuf {
        let dir = env::temp_dir().join(format!("custodian-fsops-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_write_file_atomic_creates_parents() {
        let dir = scratch_dir();
        let target = dir.join("a/b/c.txt");
        write_file_atomic(&target, "hello").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_file_atomic_replaces_existing() {
        let dir = scratch_dir();
        let target = dir.join("file.txt");
        write_file_atomic(&target, "old").unwrap();
        write_file_atomic(&target, "new").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");

        // No temp droppings left behind.
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_copy_file_atomic() {
        let dir = scratch_dir();
        let src = dir.join("src.txt");
        let dst = dir.join("nested/dst.txt");
        fs::write(&src, "payload").unwrap();
        copy_file_atomic(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "payload");
        fs::remove_dir_all(&dir).unwrap();
    }
}
