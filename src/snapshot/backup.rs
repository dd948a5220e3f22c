//! Backup Snapshots
//!
//! Captures an immutable copy of the live files a change request touches,
//! before any staging begins. The snapshot payload lives under
//! `backups/<id>/` mirroring the live-relative layout; the [`BackupRef`]
//! row in the database is the authoritative record.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WorkspacePaths;
use crate::error::WorkflowError;
use crate::state::{audit, Database};
use crate::types::{BackupRef, WorkflowAction};

use super::fsops::copy_file_atomic;

/// Directory holding the snapshot payload for `backup_id`.
pub fn snapshot_dir(paths: &WorkspacePaths, backup_id: &str) -> PathBuf {
    paths.backups_dir.join(backup_id)
}

/// Snapshot the live files named in `files` (live-relative paths) into a
/// fresh backup directory and record the [`BackupRef`].
///
/// Targets that do not exist yet in the live tree have no pre-state to
/// copy; they are recorded as absent so a restore deletes them. Any
/// failure removes the partial snapshot so no half-captured backup is
/// ever retained.
pub fn create_backup(
    db: &Database,
    paths: &WorkspacePaths,
    files: &[String],
) -> Result<BackupRef, WorkflowError> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    let dir = snapshot_dir(paths, &id);

    let result = capture_files(&paths.live_root, &dir, files);
    let (captured, absent) = match result {
        Ok(lists) => lists,
        Err(e) => {
            // No partial backup is retained.
            let _ = fs::remove_dir_all(&dir);
            return Err(WorkflowError::Backup(format!("{e:#}")));
        }
    };

    let backup = BackupRef {
        id: id.clone(),
        files: captured,
        absent,
        created_at,
    };

    if let Err(e) = db.insert_backup(&backup) {
        let _ = fs::remove_dir_all(&dir);
        return Err(WorkflowError::Backup(format!("{e:#}")));
    }

    audit::record(
        db,
        WorkflowAction::BackupCreated,
        None,
        &format!("snapshot {} captured {} file(s)", backup.id, backup.files.len()),
    )
    .map_err(WorkflowError::State)?;

    info!(backup_id = %backup.id, files = backup.files.len(), "backup created");
    Ok(backup)
}

/// Fold additional target paths into an existing backup. Targets already
/// covered are left alone; existing live files are snapshotted, missing
/// ones are recorded as absent so a restore removes them. The backup's
/// timestamp is unchanged: the live tree has not moved since capture.
pub fn extend_backup(
    db: &Database,
    paths: &WorkspacePaths,
    backup: &mut BackupRef,
    targets: impl IntoIterator<Item = String>,
) -> Result<(), WorkflowError> {
    let dir = snapshot_dir(paths, &backup.id);
    let mut changed = false;

    for rel in targets {
        if backup.files.contains(&rel) || backup.absent.contains(&rel) {
            continue;
        }
        let live = paths.live_root.join(&rel);
        if live.exists() {
            copy_file_atomic(&live, &dir.join(&rel))
                .map_err(|e| WorkflowError::Backup(format!("{e:#}")))?;
            backup.files.push(rel);
        } else {
            backup.absent.push(rel);
        }
        changed = true;
    }

    if changed {
        db.update_backup_files(backup)
            .map_err(|e| WorkflowError::Backup(format!("{e:#}")))?;
        info!(backup_id = %backup.id, files = backup.files.len(), absent = backup.absent.len(), "backup extended");
    }

    Ok(())
}

/// Copy each existing live file into the snapshot directory. Returns the
/// live-relative paths captured and those missing from the live tree.
fn capture_files(
    live_root: &Path,
    snapshot: &Path,
    files: &[String],
) -> anyhow::Result<(Vec<String>, Vec<String>)> {
    fs::create_dir_all(snapshot)?;

    let mut captured = Vec::new();
    let mut absent = Vec::new();
    for rel in files {
        let live = live_root.join(rel);
        if !live.exists() {
            warn!(file = %rel, "live file missing, recording as absent");
            absent.push(rel.clone());
            continue;
        }
        copy_file_atomic(&live, &snapshot.join(rel))?;
        captured.push(rel.clone());
    }

    Ok((captured, absent))
}
