//! Custodian -- Self-Update Safety Workflow
//!
//! An operator-facing assistant runtime that can propose changes to its
//! own source and deploy them to itself without risking a broken running
//! instance. Unverified code never reaches the live tree: every change is
//! backed up, staged in isolation, tested, and gated before deployment,
//! and every deployment has a rollback path.

pub mod types;
pub mod error;
pub mod config;
pub mod classifier;
pub mod state;
pub mod snapshot;
pub mod backend;
pub mod workflow;
