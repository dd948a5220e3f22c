//! Workflow Audit Log
//!
//! Append-only ledger of every action the workflow takes: backups, staging,
//! test results, deploys, discards, rollbacks. Provides logging and
//! report generation.

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use crate::types::{AuditEntry, WorkflowAction};

use super::Database;

/// Record a workflow action in the audit log.
///
/// Returns the newly created [`AuditEntry`].
pub fn record(
    db: &Database,
    action: WorkflowAction,
    package_id: Option<&str>,
    detail: &str,
) -> Result<AuditEntry> {
    let entry = AuditEntry {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        action,
        package_id: package_id.map(str::to_string),
        detail: detail.to_string(),
    };

    db.insert_audit_entry(&entry)
        .context("Failed to insert audit log entry")?;

    Ok(entry)
}

/// Generate a human-readable audit report summarising recent activity.
pub fn generate_audit_report(db: &Database) -> String {
    let entries = db.get_recent_audit_entries(50).unwrap_or_default();

    if entries.is_empty() {
        return "No workflow activity recorded.".to_string();
    }

    let mut report = String::from("=== Self-Update Audit Report ===\n\n");
    report.push_str(&format!("Total entries shown: {}\n\n", entries.len()));

    // Counts by action, in stable alphabetical order.
    let mut action_counts: std::collections::BTreeMap<String, u32> =
        std::collections::BTreeMap::new();
    for entry in &entries {
        let action_str = serde_json::to_string(&entry.action)
            .unwrap_or_else(|_| "unknown".to_string());
        let action_str = action_str.trim_matches('"').to_string();
        *action_counts.entry(action_str).or_insert(0) += 1;
    }

    report.push_str("Breakdown by action:\n");
    for (action, count) in &action_counts {
        report.push_str(&format!("  {}: {}\n", action, count));
    }
    report.push('\n');

    // Individual entries (most recent first).
    report.push_str("Recent entries:\n");
    for entry in &entries {
        let action_str = serde_json::to_string(&entry.action)
            .unwrap_or_else(|_| "unknown".to_string());
        let action_str = action_str.trim_matches('"').to_string();
        report.push_str(&format!(
            "  [{}] {} - {}\n",
            entry.timestamp, action_str, entry.detail,
        ));
        if let Some(ref package_id) = entry.package_id {
            report.push_str(&format!("    package: {}\n", package_id));
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_persists_entry() {
        let db = Database::open_in_memory().unwrap();
        let entry = record(
            &db,
            WorkflowAction::PackageStaged,
            Some("p1"),
            "staged 2 files",
        )
        .unwrap();

        assert_eq!(entry.package_id.as_deref(), Some("p1"));
        let entries = db.get_recent_audit_entries(10).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_report_mentions_actions() {
        let db = Database::open_in_memory().unwrap();
        record(&db, WorkflowAction::BackupCreated, None, "snapshot of 1 file").unwrap();
        let report = generate_audit_report(&db);
        assert!(report.contains("backup_created"));
        assert!(report.contains("snapshot of 1 file"));
    }

    #[test]
    fn test_report_breakdown_is_alphabetical() {
        let db = Database::open_in_memory().unwrap();
        record(&db, WorkflowAction::PackageStaged, Some("p1"), "staged").unwrap();
        record(&db, WorkflowAction::BackupCreated, None, "snapshot").unwrap();

        let report = generate_audit_report(&db);
        let backup_at = report.find("  backup_created:").unwrap();
        let staged_at = report.find("  package_staged:").unwrap();
        assert!(backup_at < staged_at);
    }

    #[test]
    fn test_empty_report() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(generate_audit_report(&db), "No workflow activity recorded.");
    }
}
