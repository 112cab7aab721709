//! Per-component artifact catalog.
//!
//! The catalog is an append-only JSON-lines log of lifecycle events. Replaying
//! the log yields a [`CatalogSnapshot`], published behind an `Arc` so readers
//! (a recovery session, the selector) keep a consistent view while backups
//! keep appending. [`Catalog::compact`] rewrites the log to one record per
//! live artifact plus deletion tombstones.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactId, BackupArtifact, Component, RetentionTier};
use crate::error::CatalogError;

/// One lifecycle event in the catalog log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CatalogEvent {
    Registered {
        artifact: BackupArtifact,
    },
    Uploaded {
        id: ArtifactId,
        location_secondary: String,
    },
    Promoted {
        id: ArtifactId,
        tier: RetentionTier,
    },
    CorruptFlagged {
        id: ArtifactId,
        reason: String,
    },
    Deleted {
        id: ArtifactId,
    },
}

impl CatalogEvent {
    fn id(&self) -> &ArtifactId {
        match self {
            Self::Registered { artifact } => &artifact.id,
            Self::Uploaded { id, .. }
            | Self::Promoted { id, .. }
            | Self::CorruptFlagged { id, .. }
            | Self::Deleted { id } => id,
        }
    }
}

/// Log line: event plus the instant it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogRecord {
    recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    event: CatalogEvent,
}

/// A catalogued artifact and its corruption status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub artifact: BackupArtifact,
    pub corrupt: Option<String>,
}

impl CatalogEntry {
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        self.corrupt.is_some()
    }
}

/// Immutable view of a component's catalog.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    component: Component,
    /// Sorted ascending by `created_at`, then id.
    entries: Vec<CatalogEntry>,
    deleted: BTreeSet<ArtifactId>,
    sequence: u64,
}

impl CatalogSnapshot {
    #[must_use]
    pub fn empty(component: Component) -> Self {
        Self {
            component,
            entries: Vec::new(),
            deleted: BTreeSet::new(),
            sequence: 0,
        }
    }

    /// Build a snapshot directly from artifacts, skipping other components.
    #[must_use]
    pub fn from_artifacts(
        component: Component,
        artifacts: impl IntoIterator<Item = BackupArtifact>,
    ) -> Self {
        let mut state = CatalogState::new(component);
        for artifact in artifacts {
            if artifact.component == component {
                state.entries.insert(
                    artifact.id.clone(),
                    CatalogEntry {
                        artifact,
                        corrupt: None,
                    },
                );
            }
        }
        state.snapshot()
    }

    #[must_use]
    pub fn component(&self) -> Component {
        self.component
    }

    /// Events applied to produce this snapshot.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &ArtifactId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| &e.artifact.id == id)
    }

    #[must_use]
    pub fn was_deleted(&self, id: &ArtifactId) -> bool {
        self.deleted.contains(id)
    }

    /// Artifacts that may be selected for restore, ascending.
    pub fn restorable(&self) -> impl Iterator<Item = &BackupArtifact> {
        self.entries
            .iter()
            .filter(|e| !e.is_corrupt())
            .map(|e| &e.artifact)
    }

    /// Most recent non-corrupt artifact.
    #[must_use]
    pub fn latest(&self) -> Option<&BackupArtifact> {
        self.restorable().max_by_key(|a| a.created_at)
    }

    #[must_use]
    pub fn tier_count(&self, tier: RetentionTier) -> usize {
        self.entries
            .iter()
            .filter(|e| e.artifact.retention_tier == tier)
            .count()
    }
}

#[derive(Debug, Clone)]
struct CatalogState {
    component: Component,
    entries: BTreeMap<ArtifactId, CatalogEntry>,
    deleted: BTreeSet<ArtifactId>,
    sequence: u64,
}

impl CatalogState {
    fn new(component: Component) -> Self {
        Self {
            component,
            entries: BTreeMap::new(),
            deleted: BTreeSet::new(),
            sequence: 0,
        }
    }

    fn check(&self, event: &CatalogEvent) -> Result<(), CatalogError> {
        match event {
            CatalogEvent::Registered { artifact } => {
                if artifact.component != self.component {
                    return Err(CatalogError::ComponentMismatch {
                        expected: self.component,
                        actual: artifact.component,
                    });
                }
                if self.entries.contains_key(&artifact.id) {
                    return Err(CatalogError::Duplicate(artifact.id.clone()));
                }
                Ok(())
            }
            other => {
                if self.entries.contains_key(other.id()) {
                    Ok(())
                } else {
                    Err(CatalogError::Unknown(other.id().clone()))
                }
            }
        }
    }

    fn apply(&mut self, event: CatalogEvent) {
        self.sequence += 1;
        match event {
            CatalogEvent::Registered { artifact } => {
                self.deleted.remove(&artifact.id);
                self.entries.insert(
                    artifact.id.clone(),
                    CatalogEntry {
                        artifact,
                        corrupt: None,
                    },
                );
            }
            CatalogEvent::Uploaded {
                id,
                location_secondary,
            } => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.artifact.location_secondary = Some(location_secondary);
                }
            }
            CatalogEvent::Promoted { id, tier } => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.artifact.retention_tier = tier;
                }
            }
            CatalogEvent::CorruptFlagged { id, reason } => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.corrupt = Some(reason);
                }
            }
            CatalogEvent::Deleted { id } => {
                self.entries.remove(&id);
                self.deleted.insert(id);
            }
        }
    }

    fn snapshot(&self) -> CatalogSnapshot {
        let mut entries: Vec<CatalogEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.artifact
                .created_at
                .cmp(&b.artifact.created_at)
                .then_with(|| a.artifact.id.cmp(&b.artifact.id))
        });
        CatalogSnapshot {
            component: self.component,
            entries,
            deleted: self.deleted.clone(),
            sequence: self.sequence,
        }
    }

    /// Events that reproduce this state.
    fn compacted_events(&self) -> Vec<CatalogEvent> {
        let mut events = Vec::new();
        for entry in self.entries.values() {
            events.push(CatalogEvent::Registered {
                artifact: entry.artifact.clone(),
            });
            if let Some(reason) = &entry.corrupt {
                events.push(CatalogEvent::CorruptFlagged {
                    id: entry.artifact.id.clone(),
                    reason: reason.clone(),
                });
            }
        }
        for id in &self.deleted {
            // Tombstones keep reconcile from resurrecting deleted artifacts
            events.push(CatalogEvent::Deleted { id: id.clone() });
        }
        events
    }
}

/// Result of a compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    pub records_before: usize,
    pub records_after: usize,
}

/// Append-only catalog for one component.
#[derive(Debug)]
pub struct Catalog {
    component: Component,
    log_path: Option<PathBuf>,
    state: Mutex<CatalogState>,
    published: RwLock<Arc<CatalogSnapshot>>,
}

impl Catalog {
    /// Catalog with no backing log; used by simulations and tests.
    #[must_use]
    pub fn in_memory(component: Component) -> Self {
        Self {
            component,
            log_path: None,
            state: Mutex::new(CatalogState::new(component)),
            published: RwLock::new(Arc::new(CatalogSnapshot::empty(component))),
        }
    }

    /// Open (or create) the log at `log_path` and replay it.
    ///
    /// Malformed lines are skipped with a warning so one torn write never
    /// hides the rest of the catalog.
    pub fn open(component: Component, log_path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut state = CatalogState::new(component);
        let mut skipped = 0usize;
        if log_path.exists() {
            let file = File::open(&log_path)?;
            file.lock_shared()?;
            for (line_no, line) in BufReader::new(&file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogRecord>(&line) {
                    Ok(record) => {
                        if let CatalogEvent::Deleted { id } = &record.event {
                            if !state.entries.contains_key(id) {
                                state.sequence += 1;
                                state.deleted.insert(id.clone());
                                continue;
                            }
                        }
                        if state.check(&record.event).is_ok() {
                            state.apply(record.event);
                        } else {
                            skipped += 1;
                        }
                    }
                    Err(e) => {
                        skipped += 1;
                        warn!(
                            component = %component,
                            line = line_no + 1,
                            error = %e,
                            "Skipping malformed catalog record"
                        );
                    }
                }
            }
            let _ = FileExt::unlock(&file);
        }
        info!(
            component = %component,
            artifacts = state.entries.len(),
            skipped,
            path = %log_path.display(),
            "Catalog loaded"
        );
        let snapshot = Arc::new(state.snapshot());
        Ok(Self {
            component,
            log_path: Some(log_path),
            state: Mutex::new(state),
            published: RwLock::new(snapshot),
        })
    }

    #[must_use]
    pub fn component(&self) -> Component {
        self.component
    }

    #[must_use]
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Current immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        match self.published.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Validate, persist and publish one event.
    pub fn append(&self, event: CatalogEvent) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.check(&event)?;
        if let Some(path) = &self.log_path {
            let record = LogRecord {
                recorded_at: Utc::now(),
                event: event.clone(),
            };
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.lock_exclusive()?;
            let written = file.write_all(line.as_bytes()).and_then(|()| file.sync_data());
            let _ = FileExt::unlock(&file);
            written?;
        }
        debug!(component = %self.component, artifact_id = %event.id(), ?event, "Catalog event appended");
        state.apply(event);
        let snapshot = Arc::new(state.snapshot());
        self.publish(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn register(&self, artifact: BackupArtifact) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        self.append(CatalogEvent::Registered { artifact })
    }

    pub fn record_upload(
        &self,
        id: &ArtifactId,
        location_secondary: impl Into<String>,
    ) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        self.append(CatalogEvent::Uploaded {
            id: id.clone(),
            location_secondary: location_secondary.into(),
        })
    }

    pub fn promote(
        &self,
        id: &ArtifactId,
        tier: RetentionTier,
    ) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        self.append(CatalogEvent::Promoted {
            id: id.clone(),
            tier,
        })
    }

    pub fn flag_corrupt(
        &self,
        id: &ArtifactId,
        reason: impl Into<String>,
    ) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        self.append(CatalogEvent::CorruptFlagged {
            id: id.clone(),
            reason: reason.into(),
        })
    }

    pub fn remove(&self, id: &ArtifactId) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        self.append(CatalogEvent::Deleted { id: id.clone() })
    }

    /// Register artifacts discovered by an adapter listing that the catalog
    /// does not know yet. Deleted artifacts are not resurrected; known ones
    /// gain a secondary location if they lacked one. Returns how many were added.
    pub fn reconcile(&self, discovered: &[BackupArtifact]) -> Result<usize, CatalogError> {
        let mut added = 0;
        for artifact in discovered {
            if artifact.component != self.component {
                continue;
            }
            let snapshot = self.snapshot();
            if snapshot.was_deleted(&artifact.id) {
                continue;
            }
            match snapshot.get(&artifact.id) {
                None => {
                    self.register(artifact.clone())?;
                    added += 1;
                }
                Some(entry) => {
                    if entry.artifact.location_secondary.is_none() {
                        if let Some(key) = &artifact.location_secondary {
                            self.record_upload(&artifact.id, key.clone())?;
                        }
                    }
                }
            }
        }
        if added > 0 {
            info!(component = %self.component, added, "Catalog reconciled with artifact store");
        }
        Ok(added)
    }

    /// Rewrite the log to the minimal event set, atomically.
    pub fn compact(&self) -> Result<CompactionStats, CatalogError> {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let events = state.compacted_events();
        let Some(path) = &self.log_path else {
            return Ok(CompactionStats {
                records_before: usize::try_from(state.sequence).unwrap_or(usize::MAX),
                records_after: events.len(),
            });
        };

        let lock_file = OpenOptions::new().create(true).append(true).open(path)?;
        lock_file.lock_exclusive()?;
        let result: Result<CompactionStats, CatalogError> = (|| {
            let records_before = BufReader::new(File::open(path)?)
                .lines()
                .filter(|l| l.as_ref().is_ok_and(|l| !l.trim().is_empty()))
                .count();

            let now = Utc::now();
            let mut body = String::new();
            for event in &events {
                let record = LogRecord {
                    recorded_at: now,
                    event: event.clone(),
                };
                body.push_str(&serde_json::to_string(&record)?);
                body.push('\n');
            }
            crate::archive::write_atomic(path, body.as_bytes())?;
            Ok(CompactionStats {
                records_before,
                records_after: events.len(),
            })
        })();
        let _ = FileExt::unlock(&lock_file);
        let stats = result?;
        info!(
            component = %self.component,
            before = stats.records_before,
            after = stats.records_after,
            "Catalog compacted"
        );
        Ok(stats)
    }

    fn publish(&self, snapshot: Arc<CatalogSnapshot>) {
        match self.published.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}
