//! Artifact store adapters.
//!
//! Every backed-up subsystem is reached through [`ArtifactAdapter`]. The
//! filesystem-backed [`StoreAdapter`] owns packaging, remote copies, restore
//! and verification; the subsystem-specific parts (how to take a consistent
//! snapshot, what a structurally sound restore looks like) live behind
//! [`ComponentSource`].

pub mod application;
pub mod dashboards;
pub mod metrics;
pub mod simulated;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{self, ArtifactFiles};
use crate::artifact::{
    ArtifactFacts, ArtifactId, ArtifactMetadata, BackupArtifact, Component, RetentionTier,
    archive_file_name, unique_artifact_name,
};
use crate::error::AdapterError;
use crate::remote::{RemoteStore, object_key};
use crate::retention::ArtifactRemover;
use crate::retry::{RetryPolicy, poll_until, with_retry};

pub use application::ApplicationSource;
pub use dashboards::DashboardsSource;
pub use metrics::MetricsSource;
pub use simulated::{SimulatedAdapter, SimulatedOutcome};

/// A consistent snapshot of a live store, staged privately until packaged.
///
/// Dropping an unpackaged snapshot removes its staging directory.
#[derive(Debug)]
pub struct RawSnapshot {
    component: Component,
    started_at: DateTime<Utc>,
    staging_dir: Option<PathBuf>,
    facts: ArtifactFacts,
    paths: BTreeMap<String, String>,
}

impl RawSnapshot {
    #[must_use]
    pub fn staged(
        component: Component,
        started_at: DateTime<Utc>,
        staging_dir: PathBuf,
        facts: ArtifactFacts,
        paths: BTreeMap<String, String>,
    ) -> Self {
        Self {
            component,
            started_at,
            staging_dir: Some(staging_dir),
            facts,
            paths,
        }
    }

    /// Snapshot with no on-disk payload, used by simulated adapters.
    #[must_use]
    pub fn synthetic(component: Component, started_at: DateTime<Utc>, facts: ArtifactFacts) -> Self {
        Self {
            component,
            started_at,
            staging_dir: None,
            facts,
            paths: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn component(&self) -> Component {
        self.component
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn staging_dir(&self) -> Option<&Path> {
        self.staging_dir.as_deref()
    }

    #[must_use]
    pub fn facts(&self) -> &ArtifactFacts {
        &self.facts
    }

    #[must_use]
    pub fn paths(&self) -> &BTreeMap<String, String> {
        &self.paths
    }
}

impl Drop for RawSnapshot {
    fn drop(&mut self) {
        if let Some(dir) = self.staging_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %e, "Failed to remove snapshot staging dir");
                }
            }
        }
    }
}

/// Coarse health of a live component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unreachable,
}

/// Result of a read-only live probe. Never persisted beyond its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: Component,
    pub status: HealthStatus,
    #[serde(default)]
    pub facts: ArtifactFacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    #[must_use]
    pub fn healthy(component: Component, facts: ArtifactFacts) -> Self {
        Self {
            component,
            status: HealthStatus::Healthy,
            facts,
            detail: None,
        }
    }

    #[must_use]
    pub fn degraded(component: Component, facts: ArtifactFacts, detail: impl Into<String>) -> Self {
        Self {
            component,
            status: HealthStatus::Degraded,
            facts,
            detail: Some(detail.into()),
        }
    }

    #[must_use]
    pub fn unreachable(component: Component, detail: impl Into<String>) -> Self {
        Self {
            component,
            status: HealthStatus::Unreachable,
            facts: ArtifactFacts::new(),
            detail: Some(detail.into()),
        }
    }
}

/// Outcome of [`ArtifactAdapter::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterVerification {
    pub artifact_id: ArtifactId,
    pub expected_checksum: String,
    pub actual_checksum: String,
    pub health: ComponentHealth,
}

impl AdapterVerification {
    #[must_use]
    pub fn checksum_ok(&self) -> bool {
        self.expected_checksum.eq_ignore_ascii_case(&self.actual_checksum)
    }
}

/// Outcome of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub artifact_id: ArtifactId,
    /// Where the previous live state was moved, if there was one.
    pub quarantine: Option<PathBuf>,
    /// Facts observed by the post-restore structural check.
    pub facts: ArtifactFacts,
    pub elapsed: Duration,
}

/// Per-component backup and restore capabilities.
#[async_trait]
pub trait ArtifactAdapter: Send + Sync {
    fn component(&self) -> Component;

    /// Compressed-time override reported in phase results; simulated adapters only.
    fn simulated_duration(&self) -> Option<Duration> {
        None
    }

    /// Whether the adapter is safe to drive in simulation mode.
    fn is_simulated(&self) -> bool {
        false
    }

    async fn snapshot(&self) -> Result<RawSnapshot, AdapterError>;

    /// Compress, checksum and record a snapshot. `cadence` becomes the initial tier.
    async fn package(
        &self,
        snapshot: RawSnapshot,
        cadence: RetentionTier,
    ) -> Result<BackupArtifact, AdapterError>;

    /// Copy an artifact to the secondary location. Returns its remote key.
    async fn upload(&self, artifact: &BackupArtifact) -> Result<String, AdapterError>;

    /// Artifacts known at either location, ascending by `created_at`.
    async fn list(&self, since: Option<DateTime<Utc>>) -> Result<Vec<BackupArtifact>, AdapterError>;

    /// Replace live state with `artifact`, quarantining what was there.
    async fn restore(&self, artifact: &BackupArtifact) -> Result<RestoreReport, AdapterError>;

    /// Restore during a drill, with simulated work compressed by the caller's
    /// `time_scale`. Adapters that do no simulated work restore normally.
    async fn restore_simulated(
        &self,
        artifact: &BackupArtifact,
        _time_scale: f64,
    ) -> Result<RestoreReport, AdapterError> {
        self.restore(artifact).await
    }

    /// Read-only checksum recomputation plus live probe.
    async fn verify(&self, artifact: &BackupArtifact) -> Result<AdapterVerification, AdapterError>;

    async fn health(&self) -> ComponentHealth;
}

/// Subsystem-specific snapshot and integrity logic for [`StoreAdapter`].
///
/// Methods are blocking; the adapter runs them on the blocking pool.
pub trait ComponentSource: Send + Sync + 'static {
    const COMPONENT: Component;

    /// Directory holding the component's complete live state.
    fn live_root(&self) -> &Path;

    /// Source paths recorded in the metadata sidecar.
    fn paths(&self) -> BTreeMap<String, String>;

    /// Write a consistent copy of live state into `staging`.
    fn capture(&self, staging: &Path) -> Result<ArtifactFacts, String>;

    /// Structural check of a state tree rooted at `root`.
    fn check_integrity(&self, root: &Path) -> Result<ArtifactFacts, String>;

    /// Read-only probe of live state.
    fn probe(&self) -> ComponentHealth;
}

/// Decides when a restored component is ready to serve.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self, component: Component, live_root: &Path) -> bool;
}

/// Ready as soon as the live state directory exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveStateExists;

#[async_trait]
impl ReadinessProbe for LiveStateExists {
    async fn is_ready(&self, _component: Component, live_root: &Path) -> bool {
        tokio::fs::try_exists(live_root).await.unwrap_or(false)
    }
}

static RESTORES_IN_FLIGHT: OnceLock<Mutex<HashSet<Component>>> = OnceLock::new();

/// Exclusive claim on a component for the length of a restore.
///
/// At most one restore per component is in flight in the process, whichever
/// adapter instance or live root it targets.
#[derive(Debug)]
pub struct RestoreGuard {
    component: Component,
}

impl RestoreGuard {
    /// Fails fast with `RestoreInProgress` if the component is already claimed.
    pub fn acquire(component: Component) -> Result<Self, AdapterError> {
        let registry = RESTORES_IN_FLIGHT.get_or_init(|| Mutex::new(HashSet::new()));
        let mut in_flight = match registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !in_flight.insert(component) {
            return Err(AdapterError::RestoreInProgress(component));
        }
        Ok(Self { component })
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if let Some(registry) = RESTORES_IN_FLIGHT.get() {
            let mut in_flight = match registry.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            in_flight.remove(&self.component);
        }
    }
}

/// Directories an adapter works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    /// Primary artifact location.
    pub artifact_dir: PathBuf,
    /// Where previous live state is moved before a restore. Never cleaned here.
    pub quarantine_dir: PathBuf,
    /// Private scratch space for snapshots and fetched archives.
    pub staging_dir: PathBuf,
}

impl StoreLayout {
    /// Conventional layout under a storage root: `{root}/{component}`,
    /// `{quarantine}/{component}` and `{root}/.staging`.
    #[must_use]
    pub fn for_component(root: &Path, quarantine: &Path, component: Component) -> Self {
        Self {
            artifact_dir: root.join(component.as_str()),
            quarantine_dir: quarantine.join(component.as_str()),
            staging_dir: root.join(".staging"),
        }
    }
}

/// Archive path resolved for reading; fetched copies are removed on drop.
struct LocatedArchive {
    path: PathBuf,
    temporary: bool,
}

impl Drop for LocatedArchive {
    fn drop(&mut self) {
        if self.temporary {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn io_error(component: Component, err: impl std::fmt::Display) -> AdapterError {
    AdapterError::Io {
        component,
        reason: err.to_string(),
    }
}

/// Filesystem-backed adapter for one [`ComponentSource`].
pub struct StoreAdapter<S: ComponentSource> {
    source: Arc<S>,
    layout: StoreLayout,
    remote: Option<Arc<dyn RemoteStore>>,
    readiness: Arc<dyn ReadinessProbe>,
    readiness_timeout: Duration,
    readiness_poll: Duration,
    upload_retry: RetryPolicy,
    fetch_retry: RetryPolicy,
}

impl<S: ComponentSource> std::fmt::Debug for StoreAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("component", &S::COMPONENT)
            .field("layout", &self.layout)
            .field("remote", &self.remote.is_some())
            .field("readiness_timeout", &self.readiness_timeout)
            .finish_non_exhaustive()
    }
}

impl<S: ComponentSource> StoreAdapter<S> {
    pub fn new(source: S, layout: StoreLayout) -> Self {
        Self {
            source: Arc::new(source),
            layout,
            remote: None,
            readiness: Arc::new(LiveStateExists),
            readiness_timeout: Duration::from_secs(120),
            readiness_poll: Duration::from_millis(500),
            upload_retry: RetryPolicy::remote_upload(),
            fetch_retry: RetryPolicy::remote_fetch(),
        }
    }

    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn with_readiness(
        mut self,
        probe: Arc<dyn ReadinessProbe>,
        timeout: Duration,
        poll: Duration,
    ) -> Self {
        self.readiness = probe;
        self.readiness_timeout = timeout;
        self.readiness_poll = poll;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, upload: RetryPolicy, fetch: RetryPolicy) -> Self {
        self.upload_retry = upload;
        self.fetch_retry = fetch;
        self
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn files(&self, id: &ArtifactId) -> ArtifactFiles {
        ArtifactFiles::in_dir(&self.layout.artifact_dir, id)
    }

    async fn locate_archive(&self, artifact: &BackupArtifact) -> Result<LocatedArchive, AdapterError> {
        if let Some(primary) = &artifact.location_primary {
            let path = PathBuf::from(primary);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(LocatedArchive {
                    path,
                    temporary: false,
                });
            }
            debug!(artifact_id = %artifact.id, path = %primary, "Primary copy missing");
        }

        if let (Some(key), Some(remote)) = (&artifact.location_secondary, &self.remote) {
            tokio::fs::create_dir_all(&self.layout.staging_dir)
                .await
                .map_err(|e| io_error(S::COMPONENT, e))?;
            let dest = self.layout.staging_dir.join(format!(
                "fetch-{}-{}",
                uuid::Uuid::new_v4().simple(),
                archive_file_name(&artifact.id)
            ));
            let located = LocatedArchive {
                path: dest,
                temporary: true,
            };
            match with_retry(&self.fetch_retry, || remote.get_object(key, &located.path)).await {
                Ok(()) => {
                    info!(
                        component = %S::COMPONENT,
                        artifact_id = %artifact.id,
                        key = %key,
                        "Fetched archive from secondary location"
                    );
                    return Ok(located);
                }
                Err(e) => {
                    warn!(artifact_id = %artifact.id, error = %e, "Secondary copy unavailable");
                }
            }
        }

        Err(AdapterError::ArtifactUnavailable {
            artifact: artifact.id.clone(),
        })
    }

    async fn checksum_of(&self, artifact: &BackupArtifact, path: &Path) -> Result<String, AdapterError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || archive::sha256_file(&path))
            .await
            .map_err(|e| io_error(S::COMPONENT, e))?
            .map_err(|e| AdapterError::CorruptArtifact {
                artifact: artifact.id.clone(),
                reason: format!("unreadable archive: {e}"),
            })
    }

    fn local_artifacts(&self) -> Vec<BackupArtifact> {
        let Ok(entries) = std::fs::read_dir(&self.layout.artifact_dir) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let is_metadata = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".metadata.json"));
            if !is_metadata {
                continue;
            }
            let artifact = archive::read_metadata(&path).map_err(|e| e.to_string()).and_then(|meta| {
                let archive_path = self
                    .layout
                    .artifact_dir
                    .join(format!("{}.{}", meta.backup_name, crate::artifact::ARCHIVE_EXTENSION));
                if !archive_path.exists() {
                    return Err("archive missing next to metadata".to_string());
                }
                meta.into_artifact(Some(archive_path.to_string_lossy().into_owned()), None)
                    .map_err(|e| e.to_string())
            });
            match artifact {
                Ok(artifact) if artifact.component == S::COMPONENT => found.push(artifact),
                Ok(_) => {}
                Err(reason) => {
                    warn!(path = %path.display(), reason = %reason, "Skipping unreadable artifact sidecar");
                }
            }
        }
        found
    }

    async fn remote_artifacts(&self, remote: &Arc<dyn RemoteStore>) -> Vec<BackupArtifact> {
        let prefix = format!("{}/", S::COMPONENT);
        let keys = match with_retry(&self.fetch_retry, || remote.list_objects(&prefix)).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(component = %S::COMPONENT, error = %e, "Remote listing failed; using primary only");
                return Vec::new();
            }
        };
        if tokio::fs::create_dir_all(&self.layout.staging_dir).await.is_err() {
            return Vec::new();
        }

        let mut found = Vec::new();
        for key in keys.iter().filter(|k| k.ends_with(".metadata.json")) {
            let scratch = LocatedArchive {
                path: self
                    .layout
                    .staging_dir
                    .join(format!("list-{}.json", uuid::Uuid::new_v4().simple())),
                temporary: true,
            };
            if let Err(e) = with_retry(&self.fetch_retry, || remote.get_object(key, &scratch.path)).await {
                warn!(key = %key, error = %e, "Skipping unreadable remote sidecar");
                continue;
            }
            let parsed = archive::read_metadata(&scratch.path)
                .map_err(|e| e.to_string())
                .and_then(|meta| {
                    let archive_key = object_key(
                        S::COMPONENT,
                        &format!("{}.{}", meta.backup_name, crate::artifact::ARCHIVE_EXTENSION),
                    );
                    if !keys.contains(&archive_key) {
                        return Err("archive object missing".to_string());
                    }
                    meta.into_artifact(None, Some(archive_key)).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(artifact) if artifact.component == S::COMPONENT => found.push(artifact),
                Ok(_) => {}
                Err(reason) => warn!(key = %key, reason = %reason, "Skipping remote artifact"),
            }
        }
        found
    }
}

#[async_trait]
impl<S: ComponentSource> ArtifactAdapter for StoreAdapter<S> {
    fn component(&self) -> Component {
        S::COMPONENT
    }

    async fn snapshot(&self) -> Result<RawSnapshot, AdapterError> {
        let started_at = Utc::now().with_nanosecond(0).unwrap_or_else(Utc::now);
        let staging = self.layout.staging_dir.join(format!(
            "{}-{}",
            S::COMPONENT,
            uuid::Uuid::new_v4().simple()
        ));
        let source = Arc::clone(&self.source);
        let staging_for_task = staging.clone();
        let captured = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&staging_for_task).map_err(|e| e.to_string())?;
            source.capture(&staging_for_task)
        })
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r);

        match captured {
            Ok(facts) => {
                debug!(component = %S::COMPONENT, ?facts, "Snapshot staged");
                Ok(RawSnapshot::staged(
                    S::COMPONENT,
                    started_at,
                    staging,
                    facts,
                    self.source.paths(),
                ))
            }
            Err(reason) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                warn!(component = %S::COMPONENT, reason = %reason, "Snapshot failed");
                Err(AdapterError::SourceUnavailable {
                    component: S::COMPONENT,
                    reason,
                })
            }
        }
    }

    async fn package(
        &self,
        snapshot: RawSnapshot,
        cadence: RetentionTier,
    ) -> Result<BackupArtifact, AdapterError> {
        if snapshot.component() != S::COMPONENT {
            return Err(io_error(
                S::COMPONENT,
                format!("snapshot belongs to {}", snapshot.component()),
            ));
        }
        let Some(staging) = snapshot.staging_dir().map(Path::to_path_buf) else {
            return Err(io_error(S::COMPONENT, "snapshot has no staged data"));
        };
        let start = Instant::now();
        let dir = self.layout.artifact_dir.clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(S::COMPONENT, e))?;

        let name = unique_artifact_name(S::COMPONENT, snapshot.started_at(), |candidate| {
            ArtifactFiles::in_dir(&dir, &ArtifactId::new(candidate))
                .archive
                .exists()
        });
        let id = ArtifactId::new(name);
        let files = self.files(&id);

        let archive_path = files.archive.clone();
        let (size_bytes, checksum) = tokio::task::spawn_blocking(move || {
            let size = archive::pack_directory(&staging, &archive_path)?;
            let checksum = archive::sha256_file(&archive_path)?;
            Ok::<_, std::io::Error>((size, checksum))
        })
        .await
        .map_err(|e| io_error(S::COMPONENT, e))?
        .map_err(|e| io_error(S::COMPONENT, e))?;

        let artifact = BackupArtifact {
            id,
            component: S::COMPONENT,
            created_at: snapshot.started_at(),
            location_primary: Some(files.archive.to_string_lossy().into_owned()),
            location_secondary: None,
            size_bytes,
            checksum,
            retention_tier: cadence,
            facts: snapshot.facts().clone(),
        };
        let metadata = ArtifactMetadata::from_artifact(&artifact, snapshot.paths().clone());
        if let Err(e) = archive::write_sidecars(&files, &metadata) {
            let _ = files.remove();
            return Err(io_error(S::COMPONENT, e));
        }
        drop(snapshot);

        info!(
            component = %S::COMPONENT,
            artifact_id = %artifact.id,
            size_bytes = artifact.size_bytes,
            tier = %cadence,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Artifact packaged"
        );
        Ok(artifact)
    }

    async fn upload(&self, artifact: &BackupArtifact) -> Result<String, AdapterError> {
        let upload_failed = |reason: String| AdapterError::UploadFailed {
            artifact: artifact.id.clone(),
            reason,
        };
        let Some(remote) = &self.remote else {
            return Err(upload_failed("no secondary location configured".to_string()));
        };
        let files = self.files(&artifact.id);
        if !files.archive.exists() {
            return Err(upload_failed("primary copy missing".to_string()));
        }

        // Metadata goes last so a listed sidecar implies a complete object set
        let archive_key = object_key(S::COMPONENT, &artifact.archive_file_name());
        let uploads = [
            (archive_key.clone(), files.archive.clone()),
            (
                object_key(S::COMPONENT, &artifact.checksum_file_name()),
                files.checksum.clone(),
            ),
            (
                object_key(S::COMPONENT, &artifact.metadata_file_name()),
                files.metadata.clone(),
            ),
        ];
        for (key, path) in &uploads {
            with_retry(&self.upload_retry, || remote.put_object(key, path))
                .await
                .map_err(|e| upload_failed(e.to_string()))?;
        }
        info!(
            component = %S::COMPONENT,
            artifact_id = %artifact.id,
            key = %archive_key,
            "Artifact uploaded"
        );
        Ok(archive_key)
    }

    async fn list(&self, since: Option<DateTime<Utc>>) -> Result<Vec<BackupArtifact>, AdapterError> {
        let mut merged: BTreeMap<String, BackupArtifact> = BTreeMap::new();
        for artifact in self.local_artifacts() {
            merged.insert(artifact.checksum.clone(), artifact);
        }
        if let Some(remote) = &self.remote {
            for artifact in self.remote_artifacts(remote).await {
                match merged.get_mut(&artifact.checksum) {
                    Some(existing) => existing.location_secondary = artifact.location_secondary,
                    None => {
                        merged.insert(artifact.checksum.clone(), artifact);
                    }
                }
            }
        }
        let mut artifacts: Vec<BackupArtifact> = merged
            .into_values()
            .filter(|a| since.is_none_or(|s| a.created_at >= s))
            .collect();
        artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(artifacts)
    }

    async fn restore(&self, artifact: &BackupArtifact) -> Result<RestoreReport, AdapterError> {
        let component = S::COMPONENT;
        if artifact.component != component {
            return Err(AdapterError::WrongComponent {
                artifact: artifact.id.clone(),
                expected: component,
                actual: artifact.component,
            });
        }
        let _guard = RestoreGuard::acquire(component)?;
        let live_root = self.source.live_root().to_path_buf();
        let start = Instant::now();

        let located = self.locate_archive(artifact).await?;
        let actual = self.checksum_of(artifact, &located.path).await?;
        if !actual.eq_ignore_ascii_case(&artifact.checksum) {
            warn!(
                component = %component,
                artifact_id = %artifact.id,
                expected = %artifact.checksum,
                actual = %actual,
                "Checksum mismatch; live data untouched"
            );
            return Err(AdapterError::ChecksumMismatch {
                artifact: artifact.id.clone(),
                expected: artifact.checksum.clone(),
                actual,
            });
        }

        let file_name = live_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| component.to_string());
        let incoming = live_root.with_file_name(format!(
            ".{file_name}.restore-{}",
            uuid::Uuid::new_v4().simple()
        ));
        let archive_path = located.path.clone();
        let incoming_for_task = incoming.clone();
        let unpacked = tokio::task::spawn_blocking(move || {
            archive::unpack_archive(&archive_path, &incoming_for_task)
        })
        .await
        .map_err(|e| io_error(component, e))?;
        drop(located);
        if let Err(e) = unpacked {
            let _ = tokio::fs::remove_dir_all(&incoming).await;
            return Err(AdapterError::CorruptArtifact {
                artifact: artifact.id.clone(),
                reason: format!("extraction failed: {e}"),
            });
        }

        let quarantine = if tokio::fs::try_exists(&live_root).await.unwrap_or(false) {
            let target = self.layout.quarantine_dir.join(format!(
                "{component}_{}_{}",
                Utc::now().format(crate::artifact::NAME_TIMESTAMP_FORMAT),
                uuid::Uuid::new_v4().simple()
            ));
            let (from, to) = (live_root.clone(), target.clone());
            let moved = tokio::task::spawn_blocking(move || archive::move_dir(&from, &to))
                .await
                .map_err(|e| io_error(component, e))?;
            if let Err(e) = moved {
                let _ = tokio::fs::remove_dir_all(&incoming).await;
                return Err(io_error(component, format!("quarantine failed: {e}")));
            }
            info!(
                component = %component,
                quarantine = %target.display(),
                "Previous live state quarantined"
            );
            Some(target)
        } else {
            None
        };

        if let Err(e) = tokio::fs::rename(&incoming, &live_root).await {
            return Err(io_error(
                component,
                format!(
                    "could not move restored state into place: {e}; previous state at {}",
                    quarantine
                        .as_ref()
                        .map_or_else(|| "<none>".to_string(), |q| q.display().to_string())
                ),
            ));
        }

        let source = Arc::clone(&self.source);
        let root = live_root.clone();
        let facts = tokio::task::spawn_blocking(move || source.check_integrity(&root))
            .await
            .map_err(|e| io_error(component, e))?
            .map_err(|reason| AdapterError::IntegrityCheckFailed {
                component,
                reason,
                quarantine: quarantine.clone(),
            })?;

        let probe = Arc::clone(&self.readiness);
        let ready = poll_until(self.readiness_timeout, self.readiness_poll, || {
            let probe = Arc::clone(&probe);
            let root = live_root.clone();
            async move { probe.is_ready(component, &root).await }
        })
        .await;
        if !ready {
            return Err(AdapterError::Timeout {
                component,
                waited_secs: self.readiness_timeout.as_secs(),
                quarantine,
            });
        }

        let elapsed = start.elapsed();
        info!(
            component = %component,
            artifact_id = %artifact.id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Restore completed"
        );
        Ok(RestoreReport {
            artifact_id: artifact.id.clone(),
            quarantine,
            facts,
            elapsed,
        })
    }

    async fn verify(&self, artifact: &BackupArtifact) -> Result<AdapterVerification, AdapterError> {
        let located = self.locate_archive(artifact).await?;
        let actual_checksum = self.checksum_of(artifact, &located.path).await?;
        drop(located);
        let health = self.health().await;
        Ok(AdapterVerification {
            artifact_id: artifact.id.clone(),
            expected_checksum: artifact.checksum.clone(),
            actual_checksum,
            health,
        })
    }

    async fn health(&self) -> ComponentHealth {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.probe())
            .await
            .unwrap_or_else(|e| ComponentHealth::unreachable(S::COMPONENT, format!("probe task failed: {e}")))
    }
}

impl<S: ComponentSource> ArtifactRemover for StoreAdapter<S> {
    fn remove(&self, artifact: &BackupArtifact) -> Result<(), String> {
        self.files(&artifact.id).remove().map_err(|e| e.to_string())
    }
}

/// Live adapters for all components plus matching removers.
pub struct AdapterSet {
    pub adapters: BTreeMap<Component, Arc<dyn ArtifactAdapter>>,
    pub removers: BTreeMap<Component, Arc<dyn ArtifactRemover>>,
}

impl AdapterSet {
    /// Build the filesystem-backed adapters described by `config`.
    #[must_use]
    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        let storage = &config.storage;
        let root = storage.resolved_root();
        let quarantine = storage.resolved_quarantine();
        let remote: Option<Arc<dyn RemoteStore>> = storage
            .resolved_remote()
            .map(|dir| Arc::new(crate::remote::FsRemoteStore::new(dir)) as Arc<dyn RemoteStore>);
        let timeout = Duration::from_secs(config.recovery.readiness_timeout_secs);
        let poll = Duration::from_millis(config.recovery.readiness_poll_ms);

        let mut set = Self {
            adapters: BTreeMap::new(),
            removers: BTreeMap::new(),
        };
        set.insert(
            StoreAdapter::new(
                MetricsSource::new(&config.sources.metrics.data_dir),
                StoreLayout::for_component(&root, &quarantine, Component::Metrics),
            ),
            remote.clone(),
            timeout,
            poll,
        );
        set.insert(
            StoreAdapter::new(
                DashboardsSource::from_config(&config.sources.dashboards),
                StoreLayout::for_component(&root, &quarantine, Component::Dashboards),
            ),
            remote.clone(),
            timeout,
            poll,
        );
        set.insert(
            StoreAdapter::new(
                ApplicationSource::from_config(&config.sources.application),
                StoreLayout::for_component(&root, &quarantine, Component::Application),
            ),
            remote,
            timeout,
            poll,
        );
        set
    }

    fn insert<S: ComponentSource>(
        &mut self,
        adapter: StoreAdapter<S>,
        remote: Option<Arc<dyn RemoteStore>>,
        timeout: Duration,
        poll: Duration,
    ) {
        let mut adapter = adapter.with_readiness(Arc::new(LiveStateExists), timeout, poll);
        if let Some(remote) = remote {
            adapter = adapter.with_remote(remote);
        }
        let adapter = Arc::new(adapter);
        self.adapters
            .insert(S::COMPONENT, Arc::clone(&adapter) as Arc<dyn ArtifactAdapter>);
        self.removers
            .insert(S::COMPONENT, adapter as Arc<dyn ArtifactRemover>);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_guard_is_exclusive_per_component() {
        // Dashboards is claimed nowhere else in this test binary.
        let first = RestoreGuard::acquire(Component::Dashboards).unwrap();
        assert!(matches!(
            RestoreGuard::acquire(Component::Dashboards),
            Err(AdapterError::RestoreInProgress(Component::Dashboards))
        ));
        drop(first);
        assert!(RestoreGuard::acquire(Component::Dashboards).is_ok());
    }

    #[test]
    fn dropping_snapshot_removes_staging() {
        let tmp = tempfile::TempDir::new().unwrap();
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("f"), b"x").unwrap();
        let snap = RawSnapshot::staged(
            Component::Metrics,
            Utc::now(),
            staging.clone(),
            ArtifactFacts::new(),
            BTreeMap::new(),
        );
        drop(snap);
        assert!(!staging.exists());
    }

    #[test]
    fn layout_for_component() {
        let layout = StoreLayout::for_component(
            Path::new("/srv/backstop"),
            Path::new("/srv/quarantine"),
            Component::Dashboards,
        );
        assert_eq!(layout.artifact_dir, PathBuf::from("/srv/backstop/dashboards"));
        assert_eq!(layout.quarantine_dir, PathBuf::from("/srv/quarantine/dashboards"));
    }

    #[tokio::test]
    async fn live_state_probe_checks_existence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let probe = LiveStateExists;
        assert!(probe.is_ready(Component::Metrics, tmp.path()).await);
        assert!(!probe.is_ready(Component::Metrics, &tmp.path().join("nope")).await);
    }
}
