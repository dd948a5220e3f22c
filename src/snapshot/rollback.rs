//! Rollback Manager
//!
//! Restores the last known-good backup over the live tree. History is
//! linear: only the most recent backup is a valid target. Rollback is
//! idempotent; restoring an already-restored state succeeds as a no-op.

use std::fs;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WorkspacePaths;
use crate::error::WorkflowError;
use crate::state::{audit, Database};
use crate::types::{BackupRef, DeploymentOutcome, DeploymentRecord, WorkflowAction};

use super::backup::snapshot_dir;
use super::fsops::{read_file, write_file_atomic};

/// Restore the most recent backup over the live files and record the
/// outcome.
///
/// With an explicit `target`, the id must name the most recent backup;
/// anything older is rejected to keep history linear. A restore failure is
/// fatal and surfaced for manual intervention; no automated retry.
pub fn rollback(
    db: &Database,
    paths: &WorkspacePaths,
    target: Option<&str>,
) -> Result<DeploymentRecord, WorkflowError> {
    let latest = db
        .latest_backup()
        .map_err(|e| WorkflowError::Rollback(format!("{e:#}")))?
        .ok_or_else(|| WorkflowError::Rollback("no backup available to restore".to_string()))?;

    if let Some(requested) = target {
        if requested != latest.id {
            return Err(WorkflowError::Rollback(format!(
                "backup {} is not the most recent ({}); history is linear",
                requested, latest.id
            )));
        }
    }

    let restored = restore_backup(paths, &latest)?;
    if restored == 0 {
        info!(backup_id = %latest.id, "live files already match backup, no-op rollback");
    }

    let record = DeploymentRecord {
        id: Uuid::new_v4().to_string(),
        package_id: None,
        backup_id: latest.id.clone(),
        outcome: DeploymentOutcome::RolledBack,
        timestamp: Utc::now().to_rfc3339(),
    };

    db.insert_deployment(&record)
        .map_err(|e| WorkflowError::Rollback(format!("{e:#}")))?;
    audit::record(
        db,
        WorkflowAction::RolledBack,
        None,
        &format!("restored backup {} ({} file(s) rewritten)", latest.id, restored),
    )
    .map_err(WorkflowError::State)?;

    info!(backup_id = %latest.id, restored, "rollback complete");
    Ok(record)
}

/// Overwrite the live files named in `backup` with the snapshot content,
/// and delete live files the backup marks as absent.
///
/// Files already matching the snapshot (and absent files already gone)
/// are left alone, which is what makes repeated rollbacks no-ops.
/// Returns the number of files rewritten or removed.
pub fn restore_backup(
    paths: &WorkspacePaths,
    backup: &BackupRef,
) -> Result<usize, WorkflowError> {
    let snapshot = snapshot_dir(paths, &backup.id);
    let mut restored = 0usize;

    for rel in &backup.files {
        let saved = snapshot.join(rel);
        let live = paths.live_root.join(rel);

        let content =
            read_file(&saved).map_err(|e| WorkflowError::Rollback(format!("{e:#}")))?;

        match read_file(&live) {
            Ok(current) if current == content => continue,
            Ok(_) => {}
            Err(_) => warn!(file = %rel, "live file missing, restoring from snapshot"),
        }

        write_file_atomic(&live, &content)
            .map_err(|e| WorkflowError::Rollback(format!("{e:#}")))?;
        restored += 1;
    }

    // Files absent at snapshot time did not exist pre-deploy; remove them.
    for rel in &backup.absent {
        let live = paths.live_root.join(rel);
        if live.exists() {
            fs::remove_file(&live).map_err(|e| {
                WorkflowError::Rollback(format!("failed to remove {}: {e}", live.display()))
            })?;
            info!(file = %rel, "removed live file that postdates the backup");
            restored += 1;
        }
    }

    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::backup::create_backup;
    use std::env;
    use std::fs;

    fn scratch_paths() -> WorkspacePaths {
        let base = env::temp_dir().join(format!("custodian-rollback-{}", Uuid::new_v4()));
        let paths = WorkspacePaths {
            live_root: base.join("live"),
            backups_dir: base.join("backups"),
            staging_dir: base.join("staging"),
            packages_dir: base.join("packages"),
        };
        fs::create_dir_all(&paths.live_root).unwrap();
        paths
    }

    fn cleanup(paths: &WorkspacePaths) {
        fs::remove_dir_all(paths.live_root.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_rollback_restores_snapshot_exactly() {
        let db = Database::open_in_memory().unwrap();
        let paths = scratch_paths();
        let live = paths.live_root.join("backend/main.py");
        fs::create_dir_all(live.parent().unwrap()).unwrap();
        fs::write(&live, "original").unwrap();

        create_backup(&db, &paths, &["backend/main.py".to_string()]).unwrap();
        fs::write(&live, "clobbered by a bad deploy").unwrap();

        let record = rollback(&db, &paths, None).unwrap();
        assert_eq!(record.outcome, DeploymentOutcome::RolledBack);
        assert_eq!(fs::read_to_string(&live).unwrap(), "original");
        cleanup(&paths);
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let paths = scratch_paths();
        let live = paths.live_root.join("file.txt");
        fs::write(&live, "v1").unwrap();

        create_backup(&db, &paths, &["file.txt".to_string()]).unwrap();
        fs::write(&live, "v2").unwrap();

        rollback(&db, &paths, None).unwrap();
        let after_first = fs::read_to_string(&live).unwrap();
        // Second invocation against the already-restored state: no-op success.
        let record = rollback(&db, &paths, None).unwrap();
        assert_eq!(record.outcome, DeploymentOutcome::RolledBack);
        assert_eq!(fs::read_to_string(&live).unwrap(), after_first);
        cleanup(&paths);
    }

    #[test]
    fn test_rollback_removes_files_created_after_the_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let paths = scratch_paths();
        fs::write(paths.live_root.join("kept.py"), "original").unwrap();

        create_backup(
            &db,
            &paths,
            &["kept.py".to_string(), "added_later.py".to_string()],
        )
        .unwrap();

        // The change lands a file that had no pre-state.
        fs::write(paths.live_root.join("kept.py"), "changed").unwrap();
        fs::write(paths.live_root.join("added_later.py"), "new file").unwrap();

        rollback(&db, &paths, None).unwrap();
        assert_eq!(
            fs::read_to_string(paths.live_root.join("kept.py")).unwrap(),
            "original"
        );
        assert!(!paths.live_root.join("added_later.py").exists());

        // A second rollback is still a no-op success.
        rollback(&db, &paths, None).unwrap();
        assert!(!paths.live_root.join("added_later.py").exists());
        cleanup(&paths);
    }

    #[test]
    fn test_rollback_rejects_non_latest_target() {
        let db = Database::open_in_memory().unwrap();
        let paths = scratch_paths();
        fs::write(paths.live_root.join("f"), "x").unwrap();

        let older = create_backup(&db, &paths, &["f".to_string()]).unwrap();
        // Newer backups get later created_at timestamps.
        std::thread::sleep(std::time::Duration::from_millis(5));
        create_backup(&db, &paths, &["f".to_string()]).unwrap();

        let err = rollback(&db, &paths, Some(&older.id)).unwrap_err();
        assert!(matches!(err, WorkflowError::Rollback(_)));
        cleanup(&paths);
    }

    #[test]
    fn test_rollback_without_backup_fails() {
        let db = Database::open_in_memory().unwrap();
        let paths = scratch_paths();
        let err = rollback(&db, &paths, None).unwrap_err();
        assert!(matches!(err, WorkflowError::Rollback(_)));
        cleanup(&paths);
    }
}
