//! Filesystem adapters end to end: snapshot, package, upload, list,
//! restore and verify against real directories and a filesystem remote.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use backstop_core::adapter::application::{ApplicationSource, FACT_RECORDS, FACT_VECTOR_DOCUMENTS};
use backstop_core::adapter::metrics::{FACT_BLOCKS, FACT_SERIES, MetricsSource};
use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use backstop_core::adapter::{
    ArtifactAdapter, ComponentSource, HealthStatus, LiveStateExists, ReadinessProbe, StoreAdapter,
    StoreLayout,
};
use backstop_core::artifact::{BackupArtifact, Component, RetentionTier};
use backstop_core::error::AdapterError;
use backstop_core::remote::FsRemoteStore;

use common::{count_records, seed_application, write_metrics_block};

// One restore per component runs at a time in the process; tests that
// restore take turns.
static RESTORES: Mutex<()> = Mutex::const_new(());

/// Holds the restore in its readiness wait until released.
#[derive(Default)]
struct HeldReadiness {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ReadinessProbe for HeldReadiness {
    async fn is_ready(&self, _component: Component, _live_root: &Path) -> bool {
        self.entered.notify_one();
        self.release.notified().await;
        true
    }
}

fn adapter<S: ComponentSource>(source: S, tmp: &Path) -> StoreAdapter<S> {
    let layout = StoreLayout::for_component(&tmp.join("artifacts"), &tmp.join("quarantine"), S::COMPONENT);
    StoreAdapter::new(source, layout)
        .with_remote(Arc::new(FsRemoteStore::new(tmp.join("remote"))))
        .with_readiness(
            Arc::new(LiveStateExists),
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
}

async fn backed_up<S: ComponentSource>(adapter: &StoreAdapter<S>) -> BackupArtifact {
    let snapshot = adapter.snapshot().await.unwrap();
    let artifact = adapter.package(snapshot, RetentionTier::Hourly).await.unwrap();
    adapter.upload(&artifact).await.unwrap();
    let listed = adapter.list(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    listed.into_iter().next().unwrap()
}

#[tokio::test]
async fn metrics_round_trip_restores_and_quarantines() {
    let _serial = RESTORES.lock().await;
    let tmp = tempfile::tempdir().unwrap();
    let live = tmp.path().join("live").join("metrics");
    write_metrics_block(&live, "01HBLOCKA", 120);
    write_metrics_block(&live, "01HBLOCKB", 80);
    let adapter = adapter(MetricsSource::new(&live), tmp.path());

    let artifact = backed_up(&adapter).await;
    assert_eq!(artifact.component, Component::Metrics);
    assert!(artifact.location_primary.is_some());
    assert_eq!(artifact.location_secondary.as_deref().map(|k| k.starts_with("metrics/")), Some(true));
    assert_eq!(artifact.fact(FACT_SERIES), Some(200));

    let verification = adapter.verify(&artifact).await.unwrap();
    assert!(verification.checksum_ok());
    assert_eq!(verification.health.status, HealthStatus::Healthy);

    // Live state drifts after the backup.
    write_metrics_block(&live, "01HBLOCKC", 1000);

    let report = adapter.restore(&artifact).await.unwrap();
    assert_eq!(report.facts.get(FACT_SERIES), Some(&200));
    assert_eq!(report.facts.get(FACT_BLOCKS), Some(&2));
    assert!(!live.join("01HBLOCKC").exists());
    assert!(live.join("01HBLOCKA").join("meta.json").exists());

    let quarantine = report.quarantine.expect("previous state quarantined");
    assert!(quarantine.starts_with(tmp.path().join("quarantine").join("metrics")));
    assert!(quarantine.join("01HBLOCKC").exists());
}

#[tokio::test]
async fn missing_primary_is_fetched_from_remote() {
    let _serial = RESTORES.lock().await;
    let tmp = tempfile::tempdir().unwrap();
    let live = tmp.path().join("live").join("metrics");
    write_metrics_block(&live, "01HBLOCKA", 64);
    let adapter = adapter(MetricsSource::new(&live), tmp.path());

    let artifact = backed_up(&adapter).await;
    fs::remove_file(artifact.location_primary.as_deref().unwrap()).unwrap();
    fs::remove_dir_all(&live).unwrap();

    let report = adapter.restore(&artifact).await.unwrap();
    assert!(report.quarantine.is_none());
    assert_eq!(report.facts.get(FACT_SERIES), Some(&64));
    assert!(live.join("01HBLOCKA").exists());
}

#[tokio::test]
async fn tampered_archive_leaves_live_state_alone() {
    let _serial = RESTORES.lock().await;
    let tmp = tempfile::tempdir().unwrap();
    let live = tmp.path().join("live").join("metrics");
    write_metrics_block(&live, "01HBLOCKA", 64);
    let adapter = adapter(MetricsSource::new(&live), tmp.path());

    let artifact = backed_up(&adapter).await;
    fs::write(artifact.location_primary.as_deref().unwrap(), b"not an archive").unwrap();
    write_metrics_block(&live, "01HBLOCKB", 32);

    let err = adapter.restore(&artifact).await.unwrap_err();
    assert!(matches!(err, AdapterError::ChecksumMismatch { .. }), "{err}");
    assert!(live.join("01HBLOCKB").exists());
    assert!(!tmp.path().join("quarantine").join("metrics").exists());

    let verification = adapter.verify(&artifact).await.unwrap();
    assert!(!verification.checksum_ok());
}

#[tokio::test]
async fn unreachable_artifact_is_reported() {
    let _serial = RESTORES.lock().await;
    let tmp = tempfile::tempdir().unwrap();
    let live = tmp.path().join("live").join("metrics");
    write_metrics_block(&live, "01HBLOCKA", 64);
    let adapter = adapter(MetricsSource::new(&live), tmp.path());

    let mut artifact = backed_up(&adapter).await;
    fs::remove_file(artifact.location_primary.as_deref().unwrap()).unwrap();
    artifact.location_secondary = None;

    let err = adapter.restore(&artifact).await.unwrap_err();
    assert!(matches!(err, AdapterError::ArtifactUnavailable { .. }), "{err}");
    assert!(live.join("01HBLOCKA").exists());
}

#[tokio::test]
async fn application_round_trip_restores_records() {
    let _serial = RESTORES.lock().await;
    let tmp = tempfile::tempdir().unwrap();
    let live = tmp.path().join("live").join("journal");
    seed_application(&live, 50, 40);
    let source = ApplicationSource::new(&live, "app.db", "journal_entries", "vectors");
    let adapter = adapter(source, tmp.path());

    let artifact = backed_up(&adapter).await;
    assert_eq!(artifact.fact(FACT_RECORDS), Some(50));
    assert_eq!(artifact.fact(FACT_VECTOR_DOCUMENTS), Some(40));

    let conn = rusqlite::Connection::open(live.join("app.db")).unwrap();
    conn.execute("DELETE FROM journal_entries", []).unwrap();
    drop(conn);
    assert_eq!(count_records(&live), 0);

    let report = adapter.restore(&artifact).await.unwrap();
    assert_eq!(report.facts.get(FACT_RECORDS), Some(&50));
    assert_eq!(count_records(&live), 50);
    assert!(report.quarantine.is_some());
}

#[tokio::test]
async fn wrong_component_is_rejected() {
    let _serial = RESTORES.lock().await;
    let tmp = tempfile::tempdir().unwrap();
    let live = tmp.path().join("live").join("metrics");
    write_metrics_block(&live, "01HBLOCKA", 64);
    let adapter = adapter(MetricsSource::new(&live), tmp.path());

    let mut artifact = backed_up(&adapter).await;
    artifact.component = Component::Dashboards;
    let err = adapter.restore(&artifact).await.unwrap_err();
    assert!(matches!(err, AdapterError::WrongComponent { .. }), "{err}");
}

#[tokio::test]
async fn overlapping_restore_of_a_component_fails_fast() {
    let _serial = RESTORES.lock().await;
    let tmp = tempfile::tempdir().unwrap();
    let live = tmp.path().join("live").join("metrics");
    write_metrics_block(&live, "01HBLOCKA", 64);
    let held = Arc::new(HeldReadiness::default());
    let adapter = adapter(MetricsSource::new(&live), tmp.path()).with_readiness(
        Arc::clone(&held) as Arc<dyn ReadinessProbe>,
        Duration::from_secs(5),
        Duration::from_millis(10),
    );
    let artifact = backed_up(&adapter).await;

    // A second adapter over a different live root still shares the component.
    let other_live = tmp.path().join("other").join("metrics");
    write_metrics_block(&other_live, "01HBLOCKB", 8);
    let other = self::adapter(MetricsSource::new(&other_live), &tmp.path().join("other"));

    let first = adapter.restore(&artifact);
    tokio::pin!(first);
    tokio::select! {
        result = &mut first => panic!("restore finished before readiness: {result:?}"),
        () = held.entered.notified() => {}
    }

    let err = adapter.restore(&artifact).await.unwrap_err();
    assert!(matches!(err, AdapterError::RestoreInProgress(Component::Metrics)), "{err}");
    let err = other.restore(&artifact).await.unwrap_err();
    assert!(matches!(err, AdapterError::RestoreInProgress(Component::Metrics)), "{err}");
    assert!(other_live.join("01HBLOCKB").exists());

    held.release.notify_one();
    let report = first.await.unwrap();
    assert_eq!(report.facts.get(FACT_SERIES), Some(&64));

    // The claim is released with the finished restore.
    held.release.notify_one();
    adapter.restore(&artifact).await.unwrap();
}
