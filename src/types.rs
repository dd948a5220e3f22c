//! Custodian - Type Definitions
//!
//! Shared types for the self-update safety workflow: change requests,
//! staged packages, test reports, backups, and deployment records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Configuration ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodianConfig {
    /// Root of the live source tree this instance may update.
    pub live_root: String,
    /// Base URL of the code-generation backend.
    pub backend_url: String,
    /// Directory for backup snapshots.
    pub backups_dir: String,
    /// Directory for staged candidate packages.
    pub staging_dir: String,
    /// Directory for deploy-script artifacts.
    pub packages_dir: String,
    pub db_path: String,
    pub log_level: LogLevel,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Default configuration. The live root and backend URL are overridable;
/// everything else lives under `~/.custodian/`.
pub fn default_config() -> CustodianConfig {
    CustodianConfig {
        live_root: ".".to_string(),
        backend_url: "http://localhost:8000/api".to_string(),
        backups_dir: "~/.custodian/backups".to_string(),
        staging_dir: "~/.custodian/staging".to_string(),
        packages_dir: "~/.custodian/packages".to_string(),
        db_path: "~/.custodian/state.db".to_string(),
        log_level: LogLevel::Info,
        version: "0.1.0".to_string(),
    }
}

// ─── Change Requests ─────────────────────────────────────────────

/// The classified form of one operator message. Immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub raw_text: String,
    pub is_self_update: bool,
    /// Ordered, deduplicated set of live files relevant to the request.
    pub context_files: Vec<String>,
}

// ─── Test Reports ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    /// The runner itself errored; distinct from test failure.
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub status: TestStatus,
    pub details: Vec<String>,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

// ─── Staged Packages ─────────────────────────────────────────────

/// Lifecycle of a staged package. `Staging` and `Testing` are transient;
/// the rest are decision or terminal states.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Staging,
    Testing,
    Ready,
    Blocked,
    Deploying,
    Deployed,
    Discarded,
    Failed,
}

impl PackageState {
    /// States in which the package still occupies the single active slot.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            PackageState::Deployed | PackageState::Discarded | PackageState::Failed
        )
    }
}

/// A candidate set of file changes held outside the live tree pending
/// verification. Owned exclusively by the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedPackage {
    pub id: String,
    /// Live-relative path -> candidate content.
    pub source_files: std::collections::BTreeMap<String, String>,
    pub created_at: String,
    /// Backup captured strictly before this package was created.
    pub backup_id: String,
    pub state: PackageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_report: Option<TestReport>,
}

// ─── Backups ─────────────────────────────────────────────────────

/// An immutable snapshot of live files taken before staging begins.
/// The snapshot payload lives on disk under `backups/<id>/`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRef {
    pub id: String,
    /// Live-relative paths captured in the snapshot.
    pub files: Vec<String>,
    /// Live-relative paths targeted by the change that did not exist at
    /// snapshot time. Restoring the backup deletes them.
    #[serde(default)]
    pub absent: Vec<String>,
    pub created_at: String,
}

// ─── Deployment Records ──────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOutcome {
    Applied,
    Failed,
    RolledBack,
}

/// Durable, append-only outcome of attempting to apply or revert a package.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    /// Absent for rollbacks that were not tied to a package deploy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    pub backup_id: String,
    pub outcome: DeploymentOutcome,
    pub timestamp: String,
}

// ─── Audit Log ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    BackupCreated,
    PackageStaged,
    TestsRecorded,
    PackageReady,
    PackageBlocked,
    PackageDeployed,
    PackageDiscarded,
    DeployFailed,
    RolledBack,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: String,
    pub action: WorkflowAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    pub detail: String,
}

// ─── Backend Contract ────────────────────────────────────────────

/// What the backend returned for one chat exchange.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatOutcome {
    pub response_text: String,
    /// Everything the backend wrote to its sandbox, tests included.
    #[serde(default)]
    pub created_files: Vec<String>,
    /// The non-test subset of `created_files`.
    #[serde(default)]
    pub code_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_report: Option<TestReport>,
    #[serde(default)]
    pub ready_for_implementation: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImplementOutcome {
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelfUpdateAction {
    AnalyzeAndUpdate,
    Rollback,
}

/// The code-generation backend, specified only at its boundary.
/// Each call is a single request/response exchange with no implicit
/// retries; a non-success response fails the call outright.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn chat(
        &self,
        prompt: &str,
        files_to_include: &[String],
    ) -> Result<ChatOutcome, crate::error::WorkflowError>;

    async fn implement(
        &self,
        sandbox_files: &[String],
        test_report: &TestReport,
    ) -> Result<ImplementOutcome, crate::error::WorkflowError>;

    async fn self_update(
        &self,
        action: SelfUpdateAction,
    ) -> Result<String, crate::error::WorkflowError>;

    async fn list_files(&self) -> Result<Vec<String>, crate::error::WorkflowError>;
}
