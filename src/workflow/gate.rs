//! Safety Gate
//!
//! Pure decisions over test reports and package state. The gate decides
//! which actions to offer the operator and whether a deployment call is
//! permitted at all. Deployment of a non-passed package fails closed at
//! the orchestrator boundary, not just in the presentation layer.

use crate::error::WorkflowError;
use crate::types::{StagedPackage, TestReport, TestStatus};

/// Actions the gate can offer the operator for a given artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateAction {
    Deploy,
    Implement,
    Review,
}

/// The gate's verdict: which actions to present, and whether an actual
/// deployment/implementation call would be allowed through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateDecision {
    pub actions: Vec<GateAction>,
    pub permitted: bool,
}

/// Gate for a self-update package. Only a `passed` report opens the
/// deploy action; a failed or errored run (or no report at all) leaves
/// review as the sole option.
pub fn evaluate_self_update(report: Option<&TestReport>) -> GateDecision {
    match report {
        Some(r) if r.passed() => GateDecision {
            actions: vec![GateAction::Deploy, GateAction::Review],
            permitted: true,
        },
        _ => GateDecision {
            actions: vec![GateAction::Review],
            permitted: false,
        },
    }
}

/// Gate for a non-self-update code artifact: a simpler two-action gate
/// keyed only on the backend's readiness flag.
pub fn evaluate_artifact(ready_for_implementation: bool) -> GateDecision {
    if ready_for_implementation {
        GateDecision {
            actions: vec![GateAction::Implement, GateAction::Review],
            permitted: true,
        }
    } else {
        GateDecision {
            actions: vec![GateAction::Review],
            permitted: false,
        }
    }
}

/// Enforcement point for deploy calls. Rejects any package whose test
/// report is not `passed`, regardless of operator intent.
pub fn check_deploy(package: &StagedPackage) -> Result<(), WorkflowError> {
    let status = package
        .test_report
        .as_ref()
        .map(|r| r.status)
        .unwrap_or(TestStatus::Error);

    if status != TestStatus::Passed {
        return Err(WorkflowError::BlockedBySafetyGate {
            package_id: package.id.clone(),
            status,
        });
    }

    Ok(())
}
