//! In-memory adapter for drills and tests.
//!
//! Restores sleep instead of touching live data. Driven by an orchestrator in
//! simulation mode the sleep is `duration * time_scale`, with the scale taken
//! from the orchestrator's settings, so a full recovery drill runs in
//! compressed time with the same session shape as a real one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use tokio::sync::Notify;

use super::{AdapterVerification, ArtifactAdapter, ComponentHealth, RawSnapshot, RestoreReport};
use crate::archive::sha256_bytes;
use crate::artifact::{
    ArtifactFacts, ArtifactId, BackupArtifact, Component, RetentionTier, unique_artifact_name,
};
use crate::error::AdapterError;

/// What the simulated restore does once its compressed duration elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedOutcome {
    Succeed,
    Fail(AdapterError),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Adapter that simulates a component without live state.
#[derive(Debug)]
pub struct SimulatedAdapter {
    component: Component,
    duration: Duration,
    skip_waits: bool,
    outcome: SimulatedOutcome,
    live_facts: Option<ArtifactFacts>,
    snapshot_facts: ArtifactFacts,
    corrupt_on_verify: bool,
    gate: Option<Arc<Notify>>,
    restore_started: Arc<Notify>,
    restores: AtomicUsize,
    artifacts: Mutex<Vec<BackupArtifact>>,
}

impl SimulatedAdapter {
    /// Adapter whose restore takes `duration` of simulated time.
    #[must_use]
    pub fn new(component: Component, duration: Duration) -> Self {
        Self {
            component,
            duration,
            skip_waits: false,
            outcome: SimulatedOutcome::Succeed,
            live_facts: None,
            snapshot_facts: ArtifactFacts::new(),
            corrupt_on_verify: false,
            gate: None,
            restore_started: Arc::new(Notify::new()),
            restores: AtomicUsize::new(0),
            artifacts: Mutex::new(Vec::new()),
        }
    }

    /// Return from restore immediately, whatever the time scale.
    #[must_use]
    pub fn without_waiting(mut self) -> Self {
        self.skip_waits = true;
        self
    }

    #[must_use]
    pub fn failing(mut self, error: AdapterError) -> Self {
        self.outcome = SimulatedOutcome::Fail(error);
        self
    }

    /// Facts reported by the live probe after restore. Defaults to the artifact's.
    #[must_use]
    pub fn with_live_facts(mut self, facts: ArtifactFacts) -> Self {
        self.live_facts = Some(facts);
        self
    }

    /// Facts recorded into artifacts packaged by this adapter.
    #[must_use]
    pub fn with_snapshot_facts(mut self, facts: ArtifactFacts) -> Self {
        self.snapshot_facts = facts;
        self
    }

    /// Report a checksum mismatch from `verify`.
    #[must_use]
    pub fn corrupt_on_verify(mut self) -> Self {
        self.corrupt_on_verify = true;
        self
    }

    /// Hold every restore until [`release`](Self::release) is called.
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    /// Let one held restore proceed.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Notified (with a stored permit) each time a restore begins.
    #[must_use]
    pub fn restore_started(&self) -> Arc<Notify> {
        Arc::clone(&self.restore_started)
    }

    #[must_use]
    pub fn restore_count(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    /// Wall-clock sleep for one restore at `time_scale`.
    #[must_use]
    pub fn compressed_duration(&self, time_scale: f64) -> Duration {
        if self.skip_waits || time_scale <= 0.0 {
            return Duration::ZERO;
        }
        self.duration.mul_f64(time_scale)
    }

    /// Register a pre-made artifact as if this adapter had packaged it.
    pub fn seed(&self, artifact: BackupArtifact) {
        lock(&self.artifacts).push(artifact);
    }

    async fn sleep_restore(
        &self,
        artifact: &BackupArtifact,
        time_scale: f64,
    ) -> Result<RestoreReport, AdapterError> {
        if artifact.component != self.component {
            return Err(AdapterError::WrongComponent {
                artifact: artifact.id.clone(),
                expected: self.component,
                actual: artifact.component,
            });
        }
        self.restores.fetch_add(1, Ordering::SeqCst);
        self.restore_started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let compressed = self.compressed_duration(time_scale);
        tokio::time::sleep(compressed).await;

        match &self.outcome {
            SimulatedOutcome::Succeed => Ok(RestoreReport {
                artifact_id: artifact.id.clone(),
                quarantine: None,
                facts: self.live_facts_for(artifact),
                elapsed: compressed,
            }),
            SimulatedOutcome::Fail(error) => Err(error.clone()),
        }
    }

    fn live_facts_for(&self, artifact: &BackupArtifact) -> ArtifactFacts {
        self.live_facts
            .clone()
            .unwrap_or_else(|| artifact.facts.clone())
    }
}

/// Synthetic artifact for a simulated component.
#[must_use]
pub fn simulated_artifact(
    component: Component,
    created_at: DateTime<Utc>,
    tier: RetentionTier,
    facts: ArtifactFacts,
) -> BackupArtifact {
    let id = ArtifactId::new(crate::artifact::artifact_name(component, created_at));
    let checksum = sha256_bytes(format!("{id}:{facts:?}").as_bytes());
    BackupArtifact {
        id,
        component,
        created_at,
        location_primary: None,
        location_secondary: None,
        size_bytes: 0,
        checksum,
        retention_tier: tier,
        facts,
    }
}

#[async_trait]
impl ArtifactAdapter for SimulatedAdapter {
    fn component(&self) -> Component {
        self.component
    }

    fn simulated_duration(&self) -> Option<Duration> {
        Some(self.duration)
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn snapshot(&self) -> Result<RawSnapshot, AdapterError> {
        let started_at = Utc::now().with_nanosecond(0).unwrap_or_else(Utc::now);
        Ok(RawSnapshot::synthetic(
            self.component,
            started_at,
            self.snapshot_facts.clone(),
        ))
    }

    async fn package(
        &self,
        snapshot: RawSnapshot,
        cadence: RetentionTier,
    ) -> Result<BackupArtifact, AdapterError> {
        let mut artifacts = lock(&self.artifacts);
        let name = unique_artifact_name(self.component, snapshot.started_at(), |candidate| {
            artifacts.iter().any(|a| a.id.as_str() == candidate)
        });
        let mut artifact = simulated_artifact(
            self.component,
            snapshot.started_at(),
            cadence,
            snapshot.facts().clone(),
        );
        artifact.id = ArtifactId::new(name);
        artifacts.push(artifact.clone());
        Ok(artifact)
    }

    async fn upload(&self, artifact: &BackupArtifact) -> Result<String, AdapterError> {
        Ok(format!("simulated/{}/{}", self.component, artifact.archive_file_name()))
    }

    async fn list(&self, since: Option<DateTime<Utc>>) -> Result<Vec<BackupArtifact>, AdapterError> {
        let mut found: Vec<BackupArtifact> = lock(&self.artifacts)
            .iter()
            .filter(|a| since.is_none_or(|s| a.created_at >= s))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        Ok(found)
    }

    /// Outside a drill the full simulated duration is slept.
    async fn restore(&self, artifact: &BackupArtifact) -> Result<RestoreReport, AdapterError> {
        self.sleep_restore(artifact, 1.0).await
    }

    async fn restore_simulated(
        &self,
        artifact: &BackupArtifact,
        time_scale: f64,
    ) -> Result<RestoreReport, AdapterError> {
        self.sleep_restore(artifact, time_scale).await
    }

    async fn verify(&self, artifact: &BackupArtifact) -> Result<AdapterVerification, AdapterError> {
        let actual_checksum = if self.corrupt_on_verify {
            "0".repeat(64)
        } else {
            artifact.checksum.clone()
        };
        Ok(AdapterVerification {
            artifact_id: artifact.id.clone(),
            expected_checksum: artifact.checksum.clone(),
            actual_checksum,
            health: ComponentHealth::healthy(self.component, self.live_facts_for(artifact)),
        })
    }

    async fn health(&self) -> ComponentHealth {
        let facts = self.live_facts.clone().unwrap_or_default();
        ComponentHealth::healthy(self.component, facts)
    }
}

/// Facts map from `(key, value)` pairs.
#[must_use]
pub fn facts<const N: usize>(pairs: [(&str, u64); N]) -> ArtifactFacts {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect::<BTreeMap<_, _>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn restore_sleeps_compressed_time() {
        let adapter = SimulatedAdapter::new(Component::Metrics, Duration::from_secs(600));
        let artifact = simulated_artifact(
            Component::Metrics,
            Utc::now(),
            RetentionTier::Hourly,
            facts([("series", 100)]),
        );
        let start = tokio::time::Instant::now();
        let report = adapter.restore_simulated(&artifact, 0.01).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(report.facts["series"], 100);
        assert_eq!(adapter.restore_count(), 1);

        let start = tokio::time::Instant::now();
        adapter.restore(&artifact).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn without_waiting_ignores_time_scale() {
        let adapter =
            SimulatedAdapter::new(Component::Dashboards, Duration::from_secs(600)).without_waiting();
        let artifact = simulated_artifact(
            Component::Dashboards,
            Utc::now(),
            RetentionTier::Hourly,
            ArtifactFacts::new(),
        );
        let start = tokio::time::Instant::now();
        adapter.restore_simulated(&artifact, 0.5).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn failing_adapter_returns_configured_error() {
        let err = AdapterError::SourceUnavailable {
            component: Component::Dashboards,
            reason: "down".to_string(),
        };
        let adapter = SimulatedAdapter::new(Component::Dashboards, Duration::ZERO).failing(err.clone());
        let artifact = simulated_artifact(
            Component::Dashboards,
            Utc::now(),
            RetentionTier::Daily,
            ArtifactFacts::new(),
        );
        assert_eq!(adapter.restore(&artifact).await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn package_assigns_unique_names() {
        let adapter = SimulatedAdapter::new(Component::Application, Duration::ZERO);
        let snap_a = adapter.snapshot().await.unwrap();
        let at = snap_a.started_at();
        let a = adapter.package(snap_a, RetentionTier::Hourly).await.unwrap();
        let b = adapter
            .package(
                RawSnapshot::synthetic(Component::Application, at, ArtifactFacts::new()),
                RetentionTier::Hourly,
            )
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(adapter.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn corrupt_verify_reports_mismatch() {
        let adapter = SimulatedAdapter::new(Component::Metrics, Duration::ZERO).corrupt_on_verify();
        let artifact = simulated_artifact(
            Component::Metrics,
            Utc::now(),
            RetentionTier::Hourly,
            ArtifactFacts::new(),
        );
        assert!(!adapter.verify(&artifact).await.unwrap().checksum_ok());
    }
}
