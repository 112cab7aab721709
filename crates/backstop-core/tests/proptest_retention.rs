//! Property-based tests for the retention planner.
//!
//! - A single tier with cap K over N artifacts deletes exactly N - K, oldest first
//! - Pinned artifacts are never planned for deletion
//! - Every artifact lands in exactly one of kept, delete, held or corrupt
//! - Promoted artifacts are always kept in their new tier
//! - Planning is deterministic for the same snapshot

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;

use backstop_core::artifact::{ArtifactId, BackupArtifact, Component, RetentionTier};
use backstop_core::catalog::Catalog;
use backstop_core::retention::{RetentionEngine, RetentionPolicy};

mod common;
use common::{artifact, hours};

fn catalog_of(offsets: &BTreeSet<i64>, corrupt_every: Option<usize>) -> (Catalog, Vec<BackupArtifact>) {
    let catalog = Catalog::in_memory(Component::Metrics);
    let artifacts: Vec<_> = offsets
        .iter()
        .map(|h| artifact(Component::Metrics, hours(-*h), RetentionTier::Hourly))
        .collect();
    for (i, a) in artifacts.iter().enumerate() {
        catalog.register(a.clone()).unwrap();
        if corrupt_every.is_some_and(|n| i % n == 0) {
            catalog.flag_corrupt(&a.id, "bad").unwrap();
        }
    }
    (catalog, artifacts)
}

fn arb_offsets() -> impl Strategy<Value = BTreeSet<i64>> {
    prop::collection::btree_set(0i64..2_000, 1..40)
}

fn arb_policy() -> impl Strategy<Value = RetentionPolicy> {
    (0usize..6, 0usize..6, 0usize..4, 0usize..3, 0usize..2).prop_map(
        |(hourly, daily, weekly, monthly, yearly)| RetentionPolicy {
            hourly,
            daily,
            weekly,
            monthly,
            yearly,
        },
    )
}

fn hourly_only(hourly: usize) -> RetentionPolicy {
    RetentionPolicy {
        hourly,
        daily: 0,
        weekly: 0,
        monthly: 0,
        yearly: 0,
    }
}

proptest! {
    #[test]
    fn single_tier_deletes_exactly_the_excess(offsets in arb_offsets(), cap in 0usize..50) {
        let (catalog, _) = catalog_of(&offsets, None);
        let plan = RetentionEngine::new().prune(&hourly_only(cap), &catalog.snapshot());

        prop_assert_eq!(plan.delete.len(), offsets.len().saturating_sub(cap));
        prop_assert!(plan.promote.is_empty());

        // Everything kept is newer than everything deleted.
        let snapshot = catalog.snapshot();
        let created = |id: &ArtifactId| snapshot.get(id).unwrap().artifact.created_at;
        let oldest_kept = plan.kept.iter().map(created).min();
        let newest_deleted = plan.delete.iter().map(created).max();
        if let (Some(kept), Some(deleted)) = (oldest_kept, newest_deleted) {
            prop_assert!(deleted < kept);
        }
    }

    #[test]
    fn pinned_artifacts_are_never_deleted(
        offsets in arb_offsets(),
        policy in arb_policy(),
        pin_every in 1usize..5,
    ) {
        let (catalog, artifacts) = catalog_of(&offsets, None);
        let engine = RetentionEngine::new();
        let pinned: HashSet<ArtifactId> = artifacts
            .iter()
            .step_by(pin_every)
            .map(|a| a.id.clone())
            .collect();
        for id in &pinned {
            engine.pin(id);
        }

        let plan = engine.prune(&policy, &catalog.snapshot());
        for id in &plan.delete {
            prop_assert!(!pinned.contains(id), "pinned {} planned for deletion", id);
        }
        for id in &plan.held {
            prop_assert!(pinned.contains(id));
        }
    }

    #[test]
    fn every_artifact_has_exactly_one_fate(
        offsets in arb_offsets(),
        policy in arb_policy(),
        corrupt_every in prop::option::of(2usize..6),
    ) {
        let (catalog, artifacts) = catalog_of(&offsets, corrupt_every);
        let plan = RetentionEngine::new().prune(&policy, &catalog.snapshot());

        for a in &artifacts {
            let fates = [&plan.kept, &plan.delete, &plan.held, &plan.corrupt]
                .iter()
                .filter(|list| list.contains(&a.id))
                .count();
            prop_assert_eq!(fates, 1, "{} has {} fates", a.id, fates);
        }
        for promotion in &plan.promote {
            prop_assert!(plan.kept.contains(&promotion.id));
            prop_assert!(promotion.to > promotion.from);
        }
    }

    #[test]
    fn planning_is_deterministic(offsets in arb_offsets(), policy in arb_policy()) {
        let (catalog, _) = catalog_of(&offsets, None);
        let snapshot = catalog.snapshot();
        let engine = RetentionEngine::new();
        prop_assert_eq!(engine.prune(&policy, &snapshot), engine.prune(&policy, &snapshot));
    }
}
