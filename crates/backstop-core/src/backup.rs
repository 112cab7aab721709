//! One backup cycle for one component.
//!
//! Snapshot, package, register, upload, then apply retention. Only the
//! local half is fatal: an upload or retention failure is logged and carried
//! in the outcome while the artifact stays registered and restorable.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapter::ArtifactAdapter;
use crate::artifact::{BackupArtifact, RetentionTier};
use crate::catalog::Catalog;
use crate::retention::{ArtifactRemover, RetentionEngine, RetentionExecution, RetentionPolicy};
use crate::Result;

/// Result of a backup cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOutcome {
    pub artifact: BackupArtifact,
    /// Remote key when the secondary copy was written.
    pub uploaded_to: Option<String>,
    pub upload_error: Option<String>,
    pub retention: RetentionExecution,
}

impl BackupOutcome {
    /// Whether the artifact reached both storage locations.
    #[must_use]
    pub fn is_replicated(&self) -> bool {
        self.uploaded_to.is_some()
    }
}

/// Everything one cycle needs, borrowed from the caller.
pub struct BackupContext<'a> {
    pub adapter: &'a dyn ArtifactAdapter,
    pub catalog: &'a Catalog,
    pub retention: &'a RetentionEngine,
    pub policy: &'a RetentionPolicy,
    pub remover: &'a dyn ArtifactRemover,
}

/// Take and store one backup at `cadence`, then prune.
pub async fn run_backup(ctx: &BackupContext<'_>, cadence: RetentionTier) -> Result<BackupOutcome> {
    let component = ctx.adapter.component();
    let started = Instant::now();

    let snapshot = ctx.adapter.snapshot().await?;
    let mut artifact = ctx.adapter.package(snapshot, cadence).await?;
    ctx.catalog.register(artifact.clone())?;
    info!(
        component = %component,
        artifact_id = %artifact.id,
        size_bytes = artifact.size_bytes,
        tier = %cadence,
        "Backup packaged"
    );

    let (uploaded_to, upload_error) = match ctx.adapter.upload(&artifact).await {
        Ok(key) => {
            if let Err(e) = ctx.catalog.record_upload(&artifact.id, key.clone()) {
                warn!(artifact_id = %artifact.id, error = %e, "Failed to record upload");
            }
            artifact.location_secondary = Some(key.clone());
            (Some(key), None)
        }
        Err(e) => {
            warn!(
                component = %component,
                artifact_id = %artifact.id,
                error = %e,
                "Upload failed; artifact kept locally"
            );
            (None, Some(e.to_string()))
        }
    };

    let plan = ctx.retention.prune(ctx.policy, &ctx.catalog.snapshot());
    let retention = if plan.is_noop() {
        RetentionExecution::default()
    } else {
        ctx.retention.execute(&plan, ctx.catalog, ctx.remover)
    };
    for failure in &retention.failures {
        warn!(
            component = %component,
            artifact_id = %failure.id,
            reason = %failure.reason,
            "Retention step failed"
        );
    }

    info!(
        component = %component,
        artifact_id = %artifact.id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        deleted = retention.deleted.len(),
        promoted = retention.promoted.len(),
        "Backup complete"
    );
    Ok(BackupOutcome {
        artifact,
        uploaded_to,
        upload_error,
        retention,
    })
}
