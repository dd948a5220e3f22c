//! Workflow Module
//!
//! The self-update state machine: orchestrator, safety gate, staging
//! area, and deploy-script packaging. Unverified code never reaches the
//! live tree; everything routes through the gate and the backup.

pub mod gate;
mod orchestrator;
pub mod package_script;
pub mod staging;

pub use orchestrator::{Orchestrator, UpdateRun};
