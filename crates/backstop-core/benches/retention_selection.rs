//! Criterion benchmarks for retention planning and point-in-time selection.
//!
//! Performance budgets:
//! - `retention_prune`: plan a year of hourly artifacts **< 5ms**
//! - `select_component`: closest artifact over a year of hourlies **< 500us**

use std::collections::BTreeMap;
use std::hint::black_box;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use backstop_core::artifact::{ArtifactId, BackupArtifact, Component, RetentionTier, artifact_name};
use backstop_core::catalog::CatalogSnapshot;
use backstop_core::retention::{RetentionEngine, RetentionPolicy};
use backstop_core::selector::{select, select_component};

fn hourly_snapshot(component: Component, count: i64) -> CatalogSnapshot {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let artifacts = (0..count).map(|h| {
        let at = start + Duration::hours(h);
        BackupArtifact {
            id: ArtifactId::new(artifact_name(component, at)),
            component,
            created_at: at,
            location_primary: None,
            location_secondary: None,
            size_bytes: 4096,
            checksum: format!("{:064x}", at.timestamp()),
            retention_tier: RetentionTier::Hourly,
            facts: BTreeMap::new(),
        }
    });
    CatalogSnapshot::from_artifacts(component, artifacts)
}

fn bench_prune(c: &mut Criterion) {
    let mut group = c.benchmark_group("retention_prune");
    let policy = RetentionPolicy::standard();
    let engine = RetentionEngine::new();
    for count in [24i64, 24 * 30, 24 * 365] {
        let snapshot = hourly_snapshot(Component::Metrics, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &snapshot, |b, snapshot| {
            b.iter(|| black_box(engine.prune(&policy, snapshot)));
        });
    }
    group.finish();
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_component");
    let snapshot = hourly_snapshot(Component::Application, 24 * 365);
    let target = Utc.with_ymd_and_hms(2026, 7, 2, 13, 20, 0).unwrap();
    group.bench_function("point_in_time", |b| {
        b.iter(|| black_box(select_component(Some(target), &snapshot)));
    });
    group.bench_function("latest", |b| {
        b.iter(|| black_box(select_component(None, &snapshot)));
    });

    let catalogs: BTreeMap<_, _> = Component::ALL
        .into_iter()
        .map(|c| (c, Arc::new(hourly_snapshot(c, 24 * 365))))
        .collect();
    group.bench_function("all_components", |b| {
        b.iter(|| black_box(select(Some(target), &catalogs)));
    });
    group.finish();
}

criterion_group!(benches, bench_prune, bench_select);
criterion_main!(benches);
