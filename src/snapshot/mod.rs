//! Snapshot Module
//!
//! Backup capture and rollback restore for the live source tree. All live
//! writes go through the transactional file helpers so a failure leaves
//! either the pre-operation or the fully-applied state, never a mix.

pub mod backup;
pub mod fsops;
pub mod rollback;
