//! Workflow State Module
//!
//! SQLite-backed persistent state for the self-update workflow.
//! The database is the durable state machine: packages, backups,
//! deployment records, and the audit trail all survive a restart.

pub mod audit;
mod database;
mod schema;

pub use database::Database;
pub use schema::{CREATE_TABLES, SCHEMA_VERSION};
