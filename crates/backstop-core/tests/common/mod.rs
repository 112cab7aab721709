//! Shared fixtures for backstop-core integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use backstop_core::adapter::application::{VECTOR_MANIFEST, VectorIndexManifest};
use backstop_core::adapter::{ArtifactAdapter, SimulatedAdapter};
use backstop_core::artifact::{ArtifactId, BackupArtifact, Component, RetentionTier, artifact_name};
use backstop_core::catalog::CatalogSnapshot;
use backstop_core::orchestrator::{OrchestratorSettings, RecoveryOrchestrator, RecoveryRequest};
use backstop_core::retention::RetentionEngine;
use backstop_core::selector::MissingArtifactDecision;
use backstop_core::session::RecoveryMode;

/// Fixed reference instant: 2026-05-01 12:00:00 UTC (a Friday).
pub fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

pub fn hours(h: i64) -> DateTime<Utc> {
    base() + chrono::Duration::hours(h)
}

pub fn artifact(component: Component, at: DateTime<Utc>, tier: RetentionTier) -> BackupArtifact {
    BackupArtifact {
        id: ArtifactId::new(artifact_name(component, at)),
        component,
        created_at: at,
        location_primary: None,
        location_secondary: None,
        size_bytes: 1024,
        checksum: format!("{:064x}", at.timestamp()),
        retention_tier: tier,
        facts: BTreeMap::new(),
    }
}

// =============================================================================
// Orchestrator fixtures
// =============================================================================

pub const TIME_SCALE: f64 = 0.001;

/// Simulated adapter; the orchestrator's `time_scale` compresses its restore.
pub fn simulated(component: Component, simulated_secs: u64) -> SimulatedAdapter {
    SimulatedAdapter::new(component, Duration::from_secs(simulated_secs))
}

pub fn adapter_map(
    adapters: impl IntoIterator<Item = Arc<SimulatedAdapter>>,
) -> BTreeMap<Component, Arc<dyn ArtifactAdapter>> {
    adapters
        .into_iter()
        .map(|a| (a.component(), a as Arc<dyn ArtifactAdapter>))
        .collect()
}

/// One artifact per component at `at`, with the given facts.
pub fn catalogs_at(at: DateTime<Utc>) -> BTreeMap<Component, Arc<CatalogSnapshot>> {
    Component::ALL
        .into_iter()
        .map(|c| {
            let mut a = artifact(c, at, RetentionTier::Hourly);
            a.facts.insert("records".to_string(), 100);
            (c, Arc::new(CatalogSnapshot::from_artifacts(c, [a])))
        })
        .collect()
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        time_scale: TIME_SCALE,
        ..OrchestratorSettings::default()
    }
}

pub fn orchestrator(
    adapters: impl IntoIterator<Item = Arc<SimulatedAdapter>>,
    settings: OrchestratorSettings,
) -> RecoveryOrchestrator {
    RecoveryOrchestrator::new(adapter_map(adapters), Arc::new(RetentionEngine::new()), settings)
}

pub fn drill(catalogs: BTreeMap<Component, Arc<CatalogSnapshot>>) -> RecoveryRequest {
    RecoveryRequest {
        target: None,
        mode: RecoveryMode::Simulation,
        missing_artifacts: MissingArtifactDecision::Abort,
        catalogs,
    }
}

// =============================================================================
// Live state fixtures
// =============================================================================

/// A time-series block directory with a readable meta.json.
pub fn write_metrics_block(data_dir: &Path, ulid: &str, series: u64) {
    let block = data_dir.join(ulid);
    fs::create_dir_all(block.join("chunks")).unwrap();
    fs::write(block.join("chunks").join("000001"), vec![3u8; 128]).unwrap();
    fs::write(block.join("index"), b"index").unwrap();
    fs::write(
        block.join("meta.json"),
        format!(r#"{{"ulid":"{ulid}","stats":{{"numSeries":{series}}},"version":1}}"#),
    )
    .unwrap();
}

/// Application store: `app.db` with `journal_entries` plus a vector index.
pub fn seed_application(root: &Path, records: usize, documents: u64) {
    fs::create_dir_all(root).unwrap();
    let conn = Connection::open(root.join("app.db")).unwrap();
    conn.execute_batch("CREATE TABLE IF NOT EXISTS journal_entries (id INTEGER PRIMARY KEY, body TEXT);")
        .unwrap();
    for i in 0..records {
        conn.execute(
            "INSERT INTO journal_entries (body) VALUES (?1)",
            [format!("entry {i}")],
        )
        .unwrap();
    }
    let vectors = root.join("vectors");
    fs::create_dir_all(&vectors).unwrap();
    for i in 0..documents {
        fs::write(vectors.join(format!("doc-{i}.vec")), [1u8; 16]).unwrap();
    }
    let manifest = VectorIndexManifest {
        dimension: 8,
        document_count: documents,
    };
    fs::write(vectors.join(VECTOR_MANIFEST), serde_json::to_vec(&manifest).unwrap()).unwrap();
}

pub fn count_records(root: &Path) -> i64 {
    let conn = Connection::open(root.join("app.db")).unwrap();
    conn.query_row("SELECT COUNT(*) FROM journal_entries", [], |row| row.get(0))
        .unwrap()
}
