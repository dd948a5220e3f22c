//! Workflow Orchestrator
//!
//! Drives the backup -> stage -> test -> package -> (deploy | discard)
//! state machine and owns the single in-flight-update invariant. All
//! transitions are persisted, so an interrupted workflow resumes from its
//! last stable state instead of a client-side simulation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WorkspacePaths;
use crate::error::WorkflowError;
use crate::snapshot::backup::{create_backup, extend_backup};
use crate::snapshot::fsops::{read_file, write_file_atomic};
use crate::snapshot::rollback::{self, restore_backup};
use crate::state::{audit, Database};
use crate::types::{
    BackendClient, BackupRef, ChangeRequest, ChatOutcome, DeploymentOutcome, DeploymentRecord,
    ImplementOutcome, PackageState, StagedPackage, TestReport, TestStatus, WorkflowAction,
};

use super::gate::{self, GateDecision};
use super::package_script::write_deploy_script;
use super::staging::{remove_staging, stage_files, staging_dir, target_path};

/// Result of running a self-update request through backup, staging, and
/// testing: the persisted package plus the gate's verdict on it.
#[derive(Debug)]
pub struct UpdateRun {
    pub package: StagedPackage,
    pub gate: GateDecision,
    pub response_text: String,
}

/// Owns the workflow state machine. One orchestrator per live tree;
/// the single-writer discipline lives here, not in the UI.
pub struct Orchestrator {
    paths: WorkspacePaths,
    db: Arc<Mutex<Database>>,
    backend: Arc<dyn BackendClient>,
    /// Serializes BACKING_UP..DEPLOYING transitions. A second request
    /// while one is mid-flight is rejected, never queued.
    run_lock: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        paths: WorkspacePaths,
        db: Arc<Mutex<Database>>,
        backend: Arc<dyn BackendClient>,
    ) -> Self {
        Self {
            paths,
            db,
            backend,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, WorkflowError> {
        self.db
            .lock()
            .map_err(|_| WorkflowError::State(anyhow!("state database lock poisoned")))
    }

    /// The package currently awaiting a deployment decision, if any.
    pub fn active_package(&self) -> Result<Option<StagedPackage>, WorkflowError> {
        Ok(self.db()?.get_active_package()?)
    }

    // ─── Self-Update Path ────────────────────────────────────────

    /// Run a classified self-update request through
    /// `BACKING_UP -> STAGING -> TESTING -> {READY | BLOCKED}`.
    ///
    /// The backup is captured before any write. The live tree is never
    /// touched here; candidate files go to the staging area only. A
    /// transport failure mid-call leaves no package behind.
    pub async fn begin_self_update(
        &self,
        request: &ChangeRequest,
    ) -> Result<UpdateRun, WorkflowError> {
        if !request.is_self_update {
            return Err(WorkflowError::Classification(
                "request does not target self-modification".to_string(),
            ));
        }

        let _guard = self.run_lock.try_lock().map_err(|_| {
            WorkflowError::Concurrency {
                active: "in-flight".to_string(),
            }
        })?;

        if let Some(active) = self.db()?.get_active_package()? {
            return Err(WorkflowError::Concurrency { active: active.id });
        }

        // BACKING_UP: snapshot before any other effect.
        let mut backup = {
            let db = self.db()?;
            create_backup(&db, &self.paths, &request.context_files)?
        };

        // TESTING happens backend-side; the report comes back with the
        // generated candidate.
        let outcome = self
            .backend
            .chat(&request.raw_text, &request.context_files)
            .await?;

        let source_files = self.collect_candidates(&outcome, &request.context_files)?;

        let package_id = Uuid::new_v4().to_string();
        let mut package = StagedPackage {
            id: package_id.clone(),
            source_files,
            created_at: Utc::now().to_rfc3339(),
            backup_id: backup.id.clone(),
            state: PackageState::Staging,
            test_report: None,
        };

        {
            let db = self.db()?;
            // The candidate set may target files the request's context did
            // not name; fold them in so a restore can revert all of them.
            extend_backup(
                &db,
                &self.paths,
                &mut backup,
                package.source_files.keys().cloned(),
            )?;
            db.insert_package(&package)?;
            audit::record(
                &db,
                WorkflowAction::PackageStaged,
                Some(&package_id),
                &format!("staging {} candidate file(s)", package.source_files.len()),
            )?;
        }

        // STAGING: isolated writes only. A failure here leaves the package
        // in a terminal state so it does not block future requests.
        if let Err(e) = stage_files(&self.paths, &package_id, &package.source_files) {
            self.db()?
                .update_package_state(&package_id, PackageState::Failed)?;
            return Err(WorkflowError::State(e));
        }

        let report = outcome.test_report.clone().unwrap_or_else(|| TestReport {
            status: TestStatus::Error,
            details: vec!["test runner produced no report".to_string()],
        });

        {
            let db = self.db()?;
            db.update_package_state(&package_id, PackageState::Testing)?;
            db.set_package_test_report(&package_id, &report)?;
            audit::record(
                &db,
                WorkflowAction::TestsRecorded,
                Some(&package_id),
                &format!("test status {:?}", report.status),
            )?;
        }

        let state = if report.passed() {
            PackageState::Ready
        } else {
            PackageState::Blocked
        };
        package.state = state;
        package.test_report = Some(report.clone());

        {
            let db = self.db()?;
            db.update_package_state(&package_id, state)?;

            if state == PackageState::Ready {
                let script = write_deploy_script(&self.paths, &package)?;
                audit::record(
                    &db,
                    WorkflowAction::PackageReady,
                    Some(&package_id),
                    &format!("deploy script {}", script.display()),
                )?;
                info!(package_id = %package_id, "package ready for deployment");
            } else {
                audit::record(
                    &db,
                    WorkflowAction::PackageBlocked,
                    Some(&package_id),
                    "tests did not pass; deployment blocked",
                )?;
                warn!(package_id = %package_id, status = ?report.status, "package blocked by tests");
            }
        }

        Ok(UpdateRun {
            gate: gate::evaluate_self_update(package.test_report.as_ref()),
            response_text: outcome.response_text,
            package,
        })
    }

    /// Read the generated candidate files from the backend's sandbox and
    /// map each onto the live-relative path it targets.
    fn collect_candidates(
        &self,
        outcome: &ChatOutcome,
        context_files: &[String],
    ) -> Result<BTreeMap<String, String>, WorkflowError> {
        let candidates: Vec<&String> = if !outcome.code_files.is_empty() {
            outcome.code_files.iter().collect()
        } else {
            outcome
                .created_files
                .iter()
                .filter(|f| {
                    !std::path::Path::new(f)
                        .file_name()
                        .map(|n| n.to_string_lossy().starts_with("test_"))
                        .unwrap_or(false)
                })
                .collect()
        };

        let mut source_files = BTreeMap::new();
        for sandbox_path in candidates {
            let content = read_file(std::path::Path::new(sandbox_path))
                .map_err(WorkflowError::State)?;
            source_files.insert(target_path(sandbox_path, context_files), content);
        }

        if source_files.is_empty() {
            return Err(WorkflowError::TestExecution(
                "backend produced no candidate files".to_string(),
            ));
        }

        Ok(source_files)
    }

    // ─── Deploy / Discard ────────────────────────────────────────

    /// `READY -> DEPLOYING -> DEPLOYED`, or automatic rollback on a
    /// mid-deploy failure. The safety gate is enforced here: a deploy
    /// call on a non-passed package always fails closed.
    pub async fn deploy(&self, package_id: &str) -> Result<DeploymentRecord, WorkflowError> {
        let _guard = self.run_lock.try_lock().map_err(|_| {
            WorkflowError::Concurrency {
                active: "in-flight".to_string(),
            }
        })?;

        let package = self
            .db()?
            .get_package(package_id)?
            .ok_or_else(|| WorkflowError::Deploy(format!("unknown package {package_id}")))?;

        gate::check_deploy(&package)?;

        match package.state {
            PackageState::Ready => {}
            PackageState::Deployed => {
                return Err(WorkflowError::Deploy(format!(
                    "package {package_id} is already deployed"
                )))
            }
            other => {
                return Err(WorkflowError::Deploy(format!(
                    "package {package_id} is not awaiting deployment (state {other:?})"
                )))
            }
        }

        let backup = self
            .db()?
            .get_backup(&package.backup_id)?
            .ok_or_else(|| {
                WorkflowError::Deploy(format!(
                    "backup {} for package {package_id} is missing; refusing to deploy",
                    package.backup_id
                ))
            })?;

        // Every deployment references a backup captured strictly before
        // the package existed.
        if !predates(&backup.created_at, &package.created_at) {
            return Err(WorkflowError::Deploy(format!(
                "backup {} does not predate package {package_id}",
                backup.id
            )));
        }

        self.db()?.update_package_state(package_id, PackageState::Deploying)?;
        info!(package_id = %package_id, "deploying staged files to live tree");

        if let Err(deploy_err) = self.copy_staged_to_live(&package) {
            return self.handle_deploy_failure(&package, &backup, deploy_err);
        }

        let record = DeploymentRecord {
            id: Uuid::new_v4().to_string(),
            package_id: Some(package_id.to_string()),
            backup_id: backup.id.clone(),
            outcome: DeploymentOutcome::Applied,
            timestamp: Utc::now().to_rfc3339(),
        };

        {
            let db = self.db()?;
            db.update_package_state(package_id, PackageState::Deployed)?;
            db.insert_deployment(&record)?;
            audit::record(
                &db,
                WorkflowAction::PackageDeployed,
                Some(package_id),
                &format!("{} file(s) applied to live tree", package.source_files.len()),
            )?;
        }

        info!(package_id = %package_id, "deployment applied");
        Ok(record)
    }

    /// Copy every staged file over its live path, transactionally per file.
    fn copy_staged_to_live(&self, package: &StagedPackage) -> Result<(), WorkflowError> {
        let staging = staging_dir(&self.paths, &package.id);
        for rel in package.source_files.keys() {
            let content = read_file(&staging.join(rel))
                .map_err(|e| WorkflowError::Deploy(format!("{e:#}")))?;
            write_file_atomic(&self.paths.live_root.join(rel), &content)
                .map_err(|e| WorkflowError::Deploy(format!("{e:#}")))?;
        }
        Ok(())
    }

    /// Automatic rollback after a mid-deploy failure, then record the
    /// failed outcome. A rollback failure here is fatal and surfaced as
    /// such; no further automated recovery is attempted.
    fn handle_deploy_failure(
        &self,
        package: &StagedPackage,
        backup: &BackupRef,
        deploy_err: WorkflowError,
    ) -> Result<DeploymentRecord, WorkflowError> {
        error!(package_id = %package.id, error = %deploy_err, "deploy failed, rolling back");

        restore_backup(&self.paths, backup)?;

        let record = DeploymentRecord {
            id: Uuid::new_v4().to_string(),
            package_id: Some(package.id.clone()),
            backup_id: backup.id.clone(),
            outcome: DeploymentOutcome::Failed,
            timestamp: Utc::now().to_rfc3339(),
        };

        {
            let db = self.db()?;
            db.update_package_state(&package.id, PackageState::Failed)?;
            db.insert_deployment(&record)?;
            audit::record(
                &db,
                WorkflowAction::DeployFailed,
                Some(&package.id),
                &format!("{deploy_err}; live tree rolled back to backup {}", backup.id),
            )?;
        }

        Err(deploy_err)
    }

    /// Operator declined: staged files are deleted, the backup is
    /// retained for audit, and the active slot clears. No rollback runs.
    pub fn discard(&self, package_id: &str) -> Result<(), WorkflowError> {
        let package = self
            .db()?
            .get_package(package_id)?
            .ok_or_else(|| WorkflowError::State(anyhow!("unknown package {package_id}")))?;

        match package.state {
            PackageState::Deployed => {
                return Err(WorkflowError::State(anyhow!(
                    "package {package_id} is deployed; use rollback instead of discard"
                )))
            }
            PackageState::Discarded => return Ok(()),
            _ => {}
        }

        remove_staging(&self.paths, package_id).map_err(WorkflowError::State)?;

        let db = self.db()?;
        db.update_package_state(package_id, PackageState::Discarded)?;
        audit::record(
            &db,
            WorkflowAction::PackageDiscarded,
            Some(package_id),
            "operator declined; staged files deleted, backup retained",
        )?;
        info!(package_id = %package_id, "package discarded");
        Ok(())
    }

    // ─── Rollback ────────────────────────────────────────────────

    /// Restore the most recent backup on operator demand. Takes the same
    /// run lock as deploy so a restore never interleaves with live writes.
    pub fn rollback(&self, target: Option<&str>) -> Result<DeploymentRecord, WorkflowError> {
        let _guard = self.run_lock.try_lock().map_err(|_| {
            WorkflowError::Concurrency {
                active: "in-flight".to_string(),
            }
        })?;
        let db = self.db()?;
        rollback::rollback(&db, &self.paths, target)
    }

    // ─── Non-Self-Update Path ────────────────────────────────────

    /// Plain chat: no backup, no staging, no live writes. Returns the
    /// backend's outcome plus the simpler two-action gate for any
    /// artifact it produced.
    pub async fn chat(
        &self,
        request: &ChangeRequest,
    ) -> Result<(ChatOutcome, GateDecision), WorkflowError> {
        let outcome = self
            .backend
            .chat(&request.raw_text, &request.context_files)
            .await?;
        let decision = gate::evaluate_artifact(outcome.ready_for_implementation);
        Ok((outcome, decision))
    }

    /// Forward a ready artifact to the backend's implement path. The
    /// non-self-update flow has no test gate beyond the readiness flag;
    /// permissive by design.
    pub async fn implement(
        &self,
        outcome: &ChatOutcome,
    ) -> Result<ImplementOutcome, WorkflowError> {
        let report = outcome.test_report.clone().unwrap_or_else(|| TestReport {
            status: TestStatus::Error,
            details: vec!["no test report produced".to_string()],
        });
        self.backend.implement(&outcome.code_files, &report).await
    }
}

/// True when `earlier` is a strictly earlier RFC 3339 timestamp than
/// `later`. Unparseable input is never "earlier".
fn predates(earlier: &str, later: &str) -> bool {
    match (
        DateTime::parse_from_rfc3339(earlier),
        DateTime::parse_from_rfc3339(later),
    ) {
        (Ok(a), Ok(b)) => a < b,
        _ => false,
    }
}
