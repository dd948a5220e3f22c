//! Database Schema
//!
//! Table definitions for the workflow state database. The schema is
//! versioned; migrations are applied in order on open.

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Initial table set.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backups (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    files TEXT NOT NULL,
    absent TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS packages (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    backup_id TEXT NOT NULL REFERENCES backups(id),
    state TEXT NOT NULL,
    source_files TEXT NOT NULL,
    test_report TEXT
);

CREATE TABLE IF NOT EXISTS deployments (
    id TEXT PRIMARY KEY,
    package_id TEXT,
    backup_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    action TEXT NOT NULL,
    package_id TEXT,
    detail TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_packages_state ON packages(state);
CREATE INDEX IF NOT EXISTS idx_deployments_timestamp ON deployments(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
"#;
