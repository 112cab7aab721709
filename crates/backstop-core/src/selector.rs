//! Point-in-time artifact selection.
//!
//! For each component the selector picks the non-corrupt artifact whose
//! `created_at` is closest to the target instant. An exact tie goes to the
//! artifact at or before the target. With no target, the newest non-corrupt
//! artifact wins. Selection runs over catalog snapshots, so a backup landing
//! mid-session never changes what a session restores.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{BackupArtifact, Component};
use crate::catalog::CatalogSnapshot;
use crate::error::{NoArtifactReason, SelectionError};

/// What to do when some component has nothing to restore.
///
/// Always an explicit caller choice, recorded on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingArtifactDecision {
    #[default]
    Abort,
    #[serde(rename = "degraded", alias = "proceed_degraded")]
    ProceedDegraded,
}

/// Per-component choice for one recovery point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Requested recovery point; `None` means latest.
    pub target: Option<DateTime<Utc>>,
    pub chosen: BTreeMap<Component, BackupArtifact>,
    pub missing: BTreeMap<Component, NoArtifactReason>,
}

impl Selection {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    #[must_use]
    pub fn get(&self, component: Component) -> Option<&BackupArtifact> {
        self.chosen.get(&component)
    }

    /// Apply the caller's decision about missing components.
    pub fn decide(self, decision: MissingArtifactDecision) -> Result<Self, SelectionError> {
        if self.is_complete() || decision == MissingArtifactDecision::ProceedDegraded {
            return Ok(self);
        }
        Err(SelectionError::Incomplete {
            missing: self.missing.keys().copied().collect(),
        })
    }
}

/// Pick the artifact for one component.
pub fn select_component(
    target: Option<DateTime<Utc>>,
    snapshot: &CatalogSnapshot,
) -> Result<BackupArtifact, SelectionError> {
    let component = snapshot.component();
    let no_artifact = |reason| SelectionError::NoArtifactAvailable { component, reason };
    if snapshot.is_empty() {
        return Err(no_artifact(NoArtifactReason::EmptyCatalog));
    }

    let best = match target {
        None => snapshot.latest(),
        Some(target) => snapshot.restorable().min_by(|a, b| {
            let (da, db) = (a.distance_from(target), b.distance_from(target));
            // Equal distance: the one not after the target sorts first
            da.cmp(&db)
                .then_with(|| (a.created_at > target).cmp(&(b.created_at > target)))
        }),
    };
    best.cloned()
        .ok_or_else(|| no_artifact(NoArtifactReason::AllCorrupt))
}

/// Pick an artifact for every component with a catalog snapshot.
#[must_use]
pub fn select(
    target: Option<DateTime<Utc>>,
    catalogs: &BTreeMap<Component, Arc<CatalogSnapshot>>,
) -> Selection {
    let mut selection = Selection {
        target,
        chosen: BTreeMap::new(),
        missing: BTreeMap::new(),
    };
    for (component, snapshot) in catalogs {
        match select_component(target, snapshot) {
            Ok(artifact) => {
                selection.chosen.insert(*component, artifact);
            }
            Err(SelectionError::NoArtifactAvailable { reason, .. }) => {
                tracing::warn!(component = %component, ?reason, "No restorable artifact");
                selection.missing.insert(*component, reason);
            }
            Err(SelectionError::Incomplete { .. }) => {}
        }
    }
    selection
}
