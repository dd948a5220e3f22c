//! Workflow Error Taxonomy
//!
//! Every failure mode of the self-update workflow has a named variant so
//! callers can tell a safety refusal from an infrastructure fault. Backup,
//! deploy, and rollback errors are never silently retried; they surface
//! verbatim with the failing stage named.

use thiserror::Error;

use crate::types::TestStatus;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed change request. Practically unreachable for plain text
    /// input; kept so the taxonomy is closed.
    #[error("classification failed: {0}")]
    Classification(String),

    /// A second package was requested while one is still active.
    /// The in-flight package is left untouched.
    #[error("another update is already in flight (package {active})")]
    Concurrency { active: String },

    /// Snapshot of the live files failed. Fatal for the request; the
    /// workflow aborts to idle and no partial backup is retained.
    #[error("backup of live files failed: {0}")]
    Backup(String),

    /// The test runner itself errored, as opposed to tests failing.
    #[error("test execution errored: {0}")]
    TestExecution(String),

    /// Deployment attempted on a package whose tests did not pass.
    /// Enforced at the orchestrator boundary; fails closed.
    #[error("deployment of package {package_id} blocked by safety gate (tests {status:?})")]
    BlockedBySafetyGate {
        package_id: String,
        status: TestStatus,
    },

    /// Non-success response or network failure on a backend call.
    /// The in-progress package stays in its last stable state.
    #[error("backend transport failure: {0}")]
    Transport(String),

    /// Writing staged files over the live paths failed. Triggers an
    /// automatic rollback to the package's backup.
    #[error("deploy failed while writing live files: {0}")]
    Deploy(String),

    /// Restoring a backup failed. Fatal; surfaced for manual
    /// intervention, no further automated recovery is attempted.
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// Persistence-layer failure underneath any workflow stage.
    #[error("state database error: {0}")]
    State(anyhow::Error),
}

impl From<anyhow::Error> for WorkflowError {
    fn from(e: anyhow::Error) -> Self {
        WorkflowError::State(e)
    }
}

impl WorkflowError {
    /// Errors an operator can recover from by re-issuing the request.
    /// Backup/deploy/rollback failures are not in this set.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Classification(_)
                | WorkflowError::Concurrency { .. }
                | WorkflowError::BlockedBySafetyGate { .. }
                | WorkflowError::Transport(_)
        )
    }
}
