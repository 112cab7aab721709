//! Tiered retention with boundary promotion.
//!
//! Artifacts live in one of five tiers (hourly, daily, weekly, monthly,
//! yearly). Each tier keeps its newest `policy[tier]` members; the rest are
//! excess. Before excess is deleted, the member closest to each boundary of
//! the next coarser tier (midnight, Monday 00:00, the first of the month,
//! 1 January, all UTC) may be promoted into that tier instead.
//!
//! # Pruning order
//!
//! 1. Corrupt artifacts are set aside: never counted, never deleted here.
//! 2. Tiers are processed finest first, so promoted artifacts count toward
//!    the coarser tier's cap when it is processed.
//! 3. A boundary representative is promoted only while the coarser tier is
//!    below its cap and holds nothing within one coarser cadence of the
//!    boundary instant.
//! 4. Pinned excess is held, not deleted.
//!
//! [`RetentionEngine::prune`] only plans. [`RetentionEngine::execute`] applies
//! the plan through the catalog and an [`ArtifactRemover`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactId, BackupArtifact, Component, RetentionTier};
use crate::catalog::{Catalog, CatalogSnapshot};
use crate::error::ConfigError;

/// Maximum artifacts kept per tier. Missing tiers default to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub hourly: usize,
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
    pub yearly: usize,
}

impl RetentionPolicy {
    /// 24 hourly, 7 daily, 4 weekly, 12 monthly, 3 yearly.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            hourly: 24,
            daily: 7,
            weekly: 4,
            monthly: 12,
            yearly: 3,
        }
    }

    #[must_use]
    pub const fn max_for(&self, tier: RetentionTier) -> usize {
        match tier {
            RetentionTier::Hourly => self.hourly,
            RetentionTier::Daily => self.daily,
            RetentionTier::Weekly => self.weekly,
            RetentionTier::Monthly => self.monthly,
            RetentionTier::Yearly => self.yearly,
        }
    }

    /// A policy that keeps nothing would delete every artifact on the next run.
    pub fn validate(&self, component: Component) -> Result<(), ConfigError> {
        if RetentionTier::ALL.iter().all(|t| self.max_for(*t) == 0) {
            return Err(ConfigError::ValidationError(format!(
                "retention.{component}: at least one tier must keep artifacts"
            )));
        }
        Ok(())
    }
}

/// One planned promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: ArtifactId,
    pub from: RetentionTier,
    pub to: RetentionTier,
    /// Coarser-tier boundary the artifact now represents.
    pub boundary: DateTime<Utc>,
}

/// Advisory pruning plan for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPlan {
    pub component: Component,
    pub delete: Vec<ArtifactId>,
    pub promote: Vec<Promotion>,
    /// Excess artifacts spared because they are pinned.
    pub held: Vec<ArtifactId>,
    /// Corrupt artifacts, reported for operator attention.
    pub corrupt: Vec<ArtifactId>,
    pub kept: Vec<ArtifactId>,
}

impl RetentionPlan {
    fn new(component: Component) -> Self {
        Self {
            component,
            delete: Vec::new(),
            promote: Vec::new(),
            held: Vec::new(),
            corrupt: Vec::new(),
            kept: Vec::new(),
        }
    }

    /// Whether executing the plan would change anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.delete.is_empty() && self.promote.is_empty()
    }
}

/// A deletion or promotion that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionFailure {
    pub id: ArtifactId,
    pub reason: String,
}

/// Result of applying a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionExecution {
    pub promoted: Vec<ArtifactId>,
    pub deleted: Vec<ArtifactId>,
    pub held: Vec<ArtifactId>,
    pub failures: Vec<RetentionFailure>,
}

/// Deletes an artifact's stored copies.
pub trait ArtifactRemover: Send + Sync {
    fn remove(&self, artifact: &BackupArtifact) -> Result<(), String>;
}

impl<F> ArtifactRemover for F
where
    F: Fn(&BackupArtifact) -> Result<(), String> + Send + Sync,
{
    fn remove(&self, artifact: &BackupArtifact) -> Result<(), String> {
        self(artifact)
    }
}

/// Retention planner and executor holding the pin table.
#[derive(Debug, Default)]
pub struct RetentionEngine {
    pins: Mutex<HashMap<ArtifactId, usize>>,
}

/// Pin released on drop.
#[derive(Debug)]
pub struct PinGuard {
    engine: Arc<RetentionEngine>,
    id: ArtifactId,
}

impl PinGuard {
    #[must_use]
    pub fn id(&self) -> &ArtifactId {
        &self.id
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.engine.unpin(&self.id);
    }
}

impl RetentionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pins(&self) -> MutexGuard<'_, HashMap<ArtifactId, usize>> {
        match self.pins.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Protect `id` from deletion. Pins are reference-counted.
    pub fn pin(&self, id: &ArtifactId) {
        *self.pins().entry(id.clone()).or_insert(0) += 1;
    }

    /// Release one pin on `id`. Unpinning an unpinned id is a no-op.
    pub fn unpin(&self, id: &ArtifactId) {
        let mut pins = self.pins();
        if let Some(count) = pins.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                pins.remove(id);
            }
        }
    }

    #[must_use]
    pub fn is_pinned(&self, id: &ArtifactId) -> bool {
        self.pins().contains_key(id)
    }

    /// Pin `id` until the returned guard drops.
    #[must_use]
    pub fn pin_guard(self: &Arc<Self>, id: &ArtifactId) -> PinGuard {
        self.pin(id);
        PinGuard {
            engine: Arc::clone(self),
            id: id.clone(),
        }
    }

    /// Plan deletions and promotions for one component's catalog snapshot.
    #[must_use]
    pub fn prune(&self, policy: &RetentionPolicy, snapshot: &CatalogSnapshot) -> RetentionPlan {
        let mut plan = RetentionPlan::new(snapshot.component());
        let mut tiers: BTreeMap<RetentionTier, Vec<BackupArtifact>> = BTreeMap::new();
        for entry in snapshot.entries() {
            if entry.is_corrupt() {
                plan.corrupt.push(entry.artifact.id.clone());
                continue;
            }
            tiers
                .entry(entry.artifact.retention_tier)
                .or_default()
                .push(entry.artifact.clone());
        }

        for tier in RetentionTier::ALL {
            let mut members = tiers.remove(&tier).unwrap_or_default();
            members.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.cmp(&a.id))
            });
            let cap = policy.max_for(tier).min(members.len());
            let excess = members.split_off(cap);
            plan.kept.extend(members.iter().map(|a| a.id.clone()));

            let mut promoted = BTreeSet::new();
            if let Some(coarser) = tier.coarser() {
                let coarser_cap = policy.max_for(coarser);
                let coarser_members = tiers.entry(coarser).or_default();
                let excess_ids: BTreeSet<&ArtifactId> = excess.iter().map(|a| &a.id).collect();

                for (boundary, rep) in boundary_representatives(coarser, members.iter().chain(&excess))
                    .into_iter()
                    .rev()
                {
                    if coarser_members.len() >= coarser_cap {
                        break;
                    }
                    if !excess_ids.contains(&rep.id) {
                        continue;
                    }
                    let occupied = coarser_members
                        .iter()
                        .any(|c| (c.created_at - boundary).abs() < coarser.cadence());
                    if occupied {
                        continue;
                    }
                    let mut moved = rep.clone();
                    moved.retention_tier = coarser;
                    coarser_members.push(moved);
                    promoted.insert(rep.id.clone());
                    plan.promote.push(Promotion {
                        id: rep.id.clone(),
                        from: tier,
                        to: coarser,
                        boundary,
                    });
                }
            }

            for artifact in excess {
                if promoted.contains(&artifact.id) {
                    continue;
                }
                if self.is_pinned(&artifact.id) {
                    plan.held.push(artifact.id);
                } else {
                    plan.delete.push(artifact.id);
                }
            }
        }

        debug!(
            component = %plan.component,
            delete = plan.delete.len(),
            promote = plan.promote.len(),
            held = plan.held.len(),
            corrupt = plan.corrupt.len(),
            "Retention plan computed"
        );
        plan
    }

    /// Apply `plan`: promotions first, then deletions.
    ///
    /// Pins are checked again per deletion, since a recovery may have started
    /// since the plan was made. Failures are collected, never raised.
    pub fn execute(
        &self,
        plan: &RetentionPlan,
        catalog: &Catalog,
        remover: &dyn ArtifactRemover,
    ) -> RetentionExecution {
        let mut result = RetentionExecution::default();

        for promotion in &plan.promote {
            match catalog.promote(&promotion.id, promotion.to) {
                Ok(_) => result.promoted.push(promotion.id.clone()),
                Err(e) => result.failures.push(RetentionFailure {
                    id: promotion.id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        result.held.extend(plan.held.iter().cloned());
        let snapshot = catalog.snapshot();
        for id in &plan.delete {
            if self.is_pinned(id) {
                result.held.push(id.clone());
                continue;
            }
            let Some(entry) = snapshot.get(id) else {
                continue;
            };
            let outcome = remover
                .remove(&entry.artifact)
                .and_then(|()| catalog.remove(id).map(|_| ()).map_err(|e| e.to_string()));
            match outcome {
                Ok(()) => result.deleted.push(id.clone()),
                Err(reason) => {
                    warn!(artifact_id = %id, reason = %reason, "Retention deletion failed");
                    result.failures.push(RetentionFailure {
                        id: id.clone(),
                        reason,
                    });
                }
            }
        }

        if !result.deleted.is_empty() || !result.promoted.is_empty() {
            info!(
                component = %plan.component,
                deleted = result.deleted.len(),
                promoted = result.promoted.len(),
                held = result.held.len(),
                failures = result.failures.len(),
                "Retention applied"
            );
        }
        result
    }
}

/// For each boundary of `tier`, the artifact closest to it. Ties go to the earlier artifact.
fn boundary_representatives<'a>(
    tier: RetentionTier,
    artifacts: impl IntoIterator<Item = &'a BackupArtifact>,
) -> BTreeMap<DateTime<Utc>, &'a BackupArtifact> {
    let mut reps: BTreeMap<DateTime<Utc>, &BackupArtifact> = BTreeMap::new();
    for artifact in artifacts {
        let boundary = tier.nearest_boundary(artifact.created_at);
        let distance = (artifact.created_at - boundary).abs();
        let replace = reps.get(&boundary).is_none_or(|current| {
            let current_distance = (current.created_at - boundary).abs();
            distance < current_distance
                || (distance == current_distance && artifact.created_at < current.created_at)
        });
        if replace {
            reps.insert(boundary, artifact);
        }
    }
    reps
}
