//! Workflow State Database
//!
//! SQLite-backed persistent state for the self-update workflow.
//! Uses rusqlite for synchronous, single-process access. Packages,
//! backups, deployment records, and the audit log all live here so a
//! restart never loses an in-flight package.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::Path;

use crate::types::*;

use super::schema::{CREATE_TABLES, SCHEMA_VERSION};

/// The workflow's SQLite database handle.
pub struct Database {
    conn: Connection,
}

/// Serialize a serde enum to its bare string form (no surrounding quotes).
fn enum_str<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_default()
        .trim_matches('"')
        .to_string()
}

/// Parse a bare enum string back into its serde form.
fn parse_enum<T: serde::de::DeserializeOwned>(s: &str) -> Option<T> {
    serde_json::from_str(&format!("\"{}\"", s)).ok()
}

impl Database {
    /// Open (or create) the database at `db_path`, apply migrations, and
    /// return the handle.
    pub fn open(db_path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create db directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database: {db_path}"))?;

        // Enable WAL mode for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(CREATE_TABLES)
            .context("failed to create tables")?;

        let current_version: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
                params![SCHEMA_VERSION],
            )
            .context("failed to update schema version")?;
        }

        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(CREATE_TABLES)
            .context("failed to create tables")?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            params![SCHEMA_VERSION],
        )?;
        Ok(Self { conn })
    }

    // ─── Backups ─────────────────────────────────────────────────

    pub fn insert_backup(&self, backup: &BackupRef) -> Result<()> {
        self.conn.execute(
            "INSERT INTO backups (id, created_at, files, absent) VALUES (?1, ?2, ?3, ?4)",
            params![
                backup.id,
                backup.created_at,
                serde_json::to_string(&backup.files)?,
                serde_json::to_string(&backup.absent)?,
            ],
        )?;
        Ok(())
    }

    /// Rewrite the captured/absent file lists of an existing backup.
    /// Used when the targeted set grows after the snapshot was taken.
    pub fn update_backup_files(&self, backup: &BackupRef) -> Result<()> {
        self.conn.execute(
            "UPDATE backups SET files = ?1, absent = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&backup.files)?,
                serde_json::to_string(&backup.absent)?,
                backup.id,
            ],
        )?;
        Ok(())
    }

    pub fn get_backup(&self, id: &str) -> Result<Option<BackupRef>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, created_at, files, absent FROM backups WHERE id = ?1",
                params![id],
                |row| Ok(Self::deserialize_backup(row)),
            )
            .optional()?;
        Ok(result)
    }

    /// The most recent backup, the only valid rollback target.
    pub fn latest_backup(&self) -> Result<Option<BackupRef>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, created_at, files, absent FROM backups ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |row| Ok(Self::deserialize_backup(row)),
            )
            .optional()?;
        Ok(result)
    }

    pub fn delete_backup(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM backups WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn deserialize_backup(row: &Row) -> BackupRef {
        let files_json: String = row.get(2).unwrap_or_default();
        let absent_json: String = row.get(3).unwrap_or_default();
        BackupRef {
            id: row.get(0).unwrap_or_default(),
            created_at: row.get(1).unwrap_or_default(),
            files: serde_json::from_str(&files_json).unwrap_or_default(),
            absent: serde_json::from_str(&absent_json).unwrap_or_default(),
        }
    }

    // ─── Packages ────────────────────────────────────────────────

    pub fn insert_package(&self, package: &StagedPackage) -> Result<()> {
        let report_json = package
            .test_report
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO packages (id, created_at, backup_id, state, source_files, test_report)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                package.id,
                package.created_at,
                package.backup_id,
                enum_str(&package.state),
                serde_json::to_string(&package.source_files)?,
                report_json,
            ],
        )?;
        Ok(())
    }

    pub fn update_package_state(&self, id: &str, state: PackageState) -> Result<()> {
        self.conn.execute(
            "UPDATE packages SET state = ?1 WHERE id = ?2",
            params![enum_str(&state), id],
        )?;
        Ok(())
    }

    pub fn set_package_test_report(&self, id: &str, report: &TestReport) -> Result<()> {
        self.conn.execute(
            "UPDATE packages SET test_report = ?1 WHERE id = ?2",
            params![serde_json::to_string(report)?, id],
        )?;
        Ok(())
    }

    pub fn get_package(&self, id: &str) -> Result<Option<StagedPackage>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, created_at, backup_id, state, source_files, test_report
                 FROM packages WHERE id = ?1",
                params![id],
                |row| Ok(Self::deserialize_package(row)),
            )
            .optional()?;
        Ok(result)
    }

    /// The single package still awaiting a deployment decision, if any.
    pub fn get_active_package(&self) -> Result<Option<StagedPackage>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, created_at, backup_id, state, source_files, test_report
                 FROM packages
                 WHERE state NOT IN ('deployed', 'discarded', 'failed')
                 ORDER BY created_at DESC LIMIT 1",
                [],
                |row| Ok(Self::deserialize_package(row)),
            )
            .optional()?;
        Ok(result)
    }

    pub fn get_recent_packages(&self, limit: i64) -> Result<Vec<StagedPackage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created_at, backup_id, state, source_files, test_report
             FROM packages ORDER BY created_at DESC LIMIT ?1",
        )?;
        let packages = stmt
            .query_map(params![limit], |row| Ok(Self::deserialize_package(row)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    fn deserialize_package(row: &Row) -> StagedPackage {
        let state_str: String = row.get(3).unwrap_or_default();
        let files_json: String = row.get(4).unwrap_or_default();
        let report_json: Option<String> = row.get(5).unwrap_or_default();
        StagedPackage {
            id: row.get(0).unwrap_or_default(),
            created_at: row.get(1).unwrap_or_default(),
            backup_id: row.get(2).unwrap_or_default(),
            state: parse_enum(&state_str).unwrap_or(PackageState::Failed),
            source_files: serde_json::from_str(&files_json).unwrap_or_default(),
            test_report: report_json.and_then(|j| serde_json::from_str(&j).ok()),
        }
    }

    // ─── Deployment Records ──────────────────────────────────────

    pub fn insert_deployment(&self, record: &DeploymentRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO deployments (id, package_id, backup_id, outcome, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.package_id,
                record.backup_id,
                enum_str(&record.outcome),
                record.timestamp,
            ],
        )?;
        Ok(())
    }

    pub fn get_recent_deployments(&self, limit: i64) -> Result<Vec<DeploymentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, package_id, backup_id, outcome, timestamp
             FROM deployments ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit], |row| {
                let outcome_str: String = row.get(3).unwrap_or_default();
                Ok(DeploymentRecord {
                    id: row.get(0).unwrap_or_default(),
                    package_id: row.get(1).unwrap_or_default(),
                    backup_id: row.get(2).unwrap_or_default(),
                    outcome: parse_enum(&outcome_str).unwrap_or(DeploymentOutcome::Failed),
                    timestamp: row.get(4).unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// The newest deployment record, used to detect an already-restored state.
    pub fn latest_deployment(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.get_recent_deployments(1)?.into_iter().next())
    }

    // ─── Audit Log ───────────────────────────────────────────────

    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_log (id, timestamp, action, package_id, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.timestamp,
                enum_str(&entry.action),
                entry.package_id,
                entry.detail,
            ],
        )?;
        Ok(())
    }

    pub fn get_recent_audit_entries(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, action, package_id, detail
             FROM audit_log ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                let action_str: String = row.get(2).unwrap_or_default();
                Ok(AuditEntry {
                    id: row.get(0).unwrap_or_default(),
                    timestamp: row.get(1).unwrap_or_default(),
                    action: parse_enum(&action_str).unwrap_or(WorkflowAction::TestsRecorded),
                    package_id: row.get(3).unwrap_or_default(),
                    detail: row.get(4).unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_backup(id: &str, created_at: &str) -> BackupRef {
        BackupRef {
            id: id.to_string(),
            files: vec!["frontend/chat.js".to_string()],
            absent: Vec::new(),
            created_at: created_at.to_string(),
        }
    }

    fn sample_package(id: &str, backup_id: &str, state: PackageState) -> StagedPackage {
        let mut files = BTreeMap::new();
        files.insert("frontend/chat.js".to_string(), "// new".to_string());
        StagedPackage {
            id: id.to_string(),
            source_files: files,
            created_at: "2026-01-01T00:00:05+00:00".to_string(),
            backup_id: backup_id.to_string(),
            state,
            test_report: None,
        }
    }

    #[test]
    fn test_backup_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let mut backup = sample_backup("b1", "2026-01-01T00:00:00+00:00");
        backup.absent = vec!["frontend/new_widget.js".to_string()];
        db.insert_backup(&backup).unwrap();

        let loaded = db.get_backup("b1").unwrap().unwrap();
        assert_eq!(loaded.id, "b1");
        assert_eq!(loaded.files, vec!["frontend/chat.js"]);
        assert_eq!(loaded.absent, vec!["frontend/new_widget.js"]);
    }

    #[test]
    fn test_update_backup_files_rewrites_lists() {
        let db = Database::open_in_memory().unwrap();
        let mut backup = sample_backup("b1", "2026-01-01T00:00:00+00:00");
        db.insert_backup(&backup).unwrap();

        backup.files.push("backend/main.py".to_string());
        backup.absent.push("brand_new_helper.py".to_string());
        db.update_backup_files(&backup).unwrap();

        let loaded = db.get_backup("b1").unwrap().unwrap();
        assert_eq!(loaded.files, vec!["frontend/chat.js", "backend/main.py"]);
        assert_eq!(loaded.absent, vec!["brand_new_helper.py"]);
    }

    #[test]
    fn test_latest_backup_orders_by_created_at() {
        let db = Database::open_in_memory().unwrap();
        db.insert_backup(&sample_backup("b1", "2026-01-01T00:00:00+00:00"))
            .unwrap();
        db.insert_backup(&sample_backup("b2", "2026-01-02T00:00:00+00:00"))
            .unwrap();

        let latest = db.latest_backup().unwrap().unwrap();
        assert_eq!(latest.id, "b2");
    }

    #[test]
    fn test_package_state_transitions_persist() {
        let db = Database::open_in_memory().unwrap();
        db.insert_backup(&sample_backup("b1", "2026-01-01T00:00:00+00:00"))
            .unwrap();
        db.insert_package(&sample_package("p1", "b1", PackageState::Staging))
            .unwrap();

        db.update_package_state("p1", PackageState::Ready).unwrap();
        let loaded = db.get_package("p1").unwrap().unwrap();
        assert_eq!(loaded.state, PackageState::Ready);
    }

    #[test]
    fn test_active_package_excludes_terminal_states() {
        let db = Database::open_in_memory().unwrap();
        db.insert_backup(&sample_backup("b1", "2026-01-01T00:00:00+00:00"))
            .unwrap();
        db.insert_package(&sample_package("p1", "b1", PackageState::Discarded))
            .unwrap();
        assert!(db.get_active_package().unwrap().is_none());

        db.insert_package(&sample_package("p2", "b1", PackageState::Blocked))
            .unwrap();
        let active = db.get_active_package().unwrap().unwrap();
        assert_eq!(active.id, "p2");
    }

    #[test]
    fn test_test_report_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.insert_backup(&sample_backup("b1", "2026-01-01T00:00:00+00:00"))
            .unwrap();
        db.insert_package(&sample_package("p1", "b1", PackageState::Testing))
            .unwrap();

        let report = TestReport {
            status: TestStatus::Failed,
            details: vec!["test_spacing: FAILED".to_string()],
        };
        db.set_package_test_report("p1", &report).unwrap();

        let loaded = db.get_package("p1").unwrap().unwrap();
        assert_eq!(loaded.test_report, Some(report));
    }

    #[test]
    fn test_deployment_records_are_append_only_newest_first() {
        let db = Database::open_in_memory().unwrap();
        for (id, ts) in [("d1", "2026-01-01T00:00:00+00:00"), ("d2", "2026-01-02T00:00:00+00:00")] {
            db.insert_deployment(&DeploymentRecord {
                id: id.to_string(),
                package_id: Some("p1".to_string()),
                backup_id: "b1".to_string(),
                outcome: DeploymentOutcome::Applied,
                timestamp: ts.to_string(),
            })
            .unwrap();
        }

        let records = db.get_recent_deployments(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "d2");
        assert_eq!(db.latest_deployment().unwrap().unwrap().id, "d2");
    }

    #[test]
    fn test_audit_entries_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.insert_audit_entry(&AuditEntry {
            id: "a1".to_string(),
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            action: WorkflowAction::BackupCreated,
            package_id: None,
            detail: "snapshot of 2 files".to_string(),
        })
        .unwrap();

        let entries = db.get_recent_audit_entries(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, WorkflowAction::BackupCreated);
    }
}
