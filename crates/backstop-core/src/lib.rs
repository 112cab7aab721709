//! backstop-core: backup retention and disaster-recovery orchestration
//!
//! Keeps timestamped backups of three independently backed-up subsystems
//! (a time-series metrics store, a dashboard store and an application store
//! with a vector index), prunes them under a tiered retention policy, and
//! drives point-in-time recovery against explicit RTO and RPO targets.
//!
//! # Architecture
//!
//! ```text
//! Scheduler → Backup runner → Adapter (snapshot/package/upload)
//!                   ↓
//!          Catalog ← Retention engine
//!             ↓
//!  Selector → Recovery orchestrator → Adapter restore → Verification → Report
//! ```
//!
//! # Modules
//!
//! - `adapter`: per-component snapshot, package, upload, restore and verify
//! - `archive`: tar.gz packaging, checksums and sidecar files
//! - `artifact`: artifact identity, naming and retention tiers
//! - `catalog`: append-only per-component artifact log with snapshots
//! - `retention`: tiered keep/promote/delete planning with pinning
//! - `selector`: point-in-time artifact selection
//! - `orchestrator`: the recovery state machine
//! - `session`: recovery session records
//! - `verification`: post-restore checks
//! - `report`: drill and incident reports
//! - `backup` / `scheduler`: backup cycles and their periodic tasks
//! - `remote`: secondary object store boundary
//! - `retry`: exponential backoff for remote calls
//! - `config` / `logging` / `error`: ambient configuration, tracing and errors
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod archive;
pub mod artifact;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod remote;
pub mod report;
pub mod retention;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod verification;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
