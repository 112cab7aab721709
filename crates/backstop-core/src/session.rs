//! Recovery session record.
//!
//! A session is created when a recovery is invoked, mutated only by the
//! orchestrator that owns it, and finalized at a terminal status. Once
//! finalized it is immutable and persisted as `{sessions_dir}/{id}.json`,
//! which doubles as the drill or incident record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::write_atomic;
use crate::artifact::{BackupArtifact, Component};
use crate::error::{AdapterError, NoArtifactReason};
use crate::orchestrator::FailurePolicy;
use crate::selector::MissingArtifactDecision;
use crate::verification::VerificationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Simulated adapters, compressed time. Never touches live data.
    Simulation,
    Real,
}

/// Position in the recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    InfrastructureReady,
    /// Restoring the given wave (1-based).
    ComponentRestoring(usize),
    Verifying,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Succeeded,
    Failed,
    PartiallyRecovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RtoExceeded,
    Cancelled,
    InfrastructureUnavailable,
    NoArtifactAvailable,
    ComponentFailed,
    VerificationFailed,
    /// Some components had nothing to restore and the caller accepted that.
    DegradedSelection,
}

/// Terminal outcome with every reason that contributed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminal {
    pub status: TerminalStatus,
    pub reasons: Vec<FailureReason>,
    pub failed_components: Vec<Component>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Infrastructure,
    Restore,
    Verification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Why a phase never ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "component", rename_all = "snake_case")]
pub enum SkipReason {
    /// A hard dependency did not restore.
    HardDependencyFailed(Component),
    /// `all_or_nothing` stopped new phases after a failure.
    PolicyStopped,
    RtoExceeded,
    Cancelled,
    NoArtifact,
}

/// Error detail captured into a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine: Option<PathBuf>,
}

impl PhaseError {
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            quarantine: None,
        }
    }
}

impl From<&AdapterError> for PhaseError {
    fn from(err: &AdapterError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            quarantine: err.quarantine().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub kind: PhaseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Component>,
    /// 0 is infrastructure; restores use 1..=k; verification is k + 1.
    pub wave: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: PhaseStatus,
    /// Simulated (uncompressed) duration for drill phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated_duration_override_ms: Option<u64>,
    /// Share of the RTO budget this phase may use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allotted_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PhaseError>,
}

impl PhaseResult {
    #[must_use]
    pub fn pending(
        name: impl Into<String>,
        kind: PhaseKind,
        component: Option<Component>,
        wave: usize,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            component,
            wave,
            started_at: None,
            ended_at: None,
            status: PhaseStatus::Pending,
            simulated_duration_override_ms: None,
            allotted_ms: None,
            skip_reason: None,
            error: None,
        }
    }

    #[must_use]
    pub fn simulated_duration_override(&self) -> Option<Duration> {
        self.simulated_duration_override_ms.map(Duration::from_millis)
    }

    /// Wall-clock duration, if the phase ran.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.ended_at?);
        (end - start).to_std().ok()
    }

    /// Duration to compare against objectives: the simulated override when
    /// present, otherwise wall time.
    #[must_use]
    pub fn effective_duration(&self) -> Option<Duration> {
        self.simulated_duration_override().or_else(|| self.elapsed())
    }

    #[must_use]
    pub fn ran(&self) -> bool {
        matches!(self.status, PhaseStatus::Succeeded | PhaseStatus::Failed)
    }
}

/// RTO/RPO targets for one component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveTargets {
    pub rto_seconds: Option<u64>,
    pub rpo_seconds: Option<u64>,
}

/// Overall and per-component recovery objectives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Objectives {
    pub overall_rto_seconds: u64,
    pub overall_rpo_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ObjectiveTargets>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboards: Option<ObjectiveTargets>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ObjectiveTargets>,
}

impl Default for Objectives {
    fn default() -> Self {
        Self {
            overall_rto_seconds: 3600,
            overall_rpo_seconds: 3600,
            metrics: None,
            dashboards: None,
            application: None,
        }
    }
}

impl Objectives {
    #[must_use]
    pub fn for_component(&self, component: Component) -> Option<&ObjectiveTargets> {
        match component {
            Component::Metrics => self.metrics.as_ref(),
            Component::Dashboards => self.dashboards.as_ref(),
            Component::Application => self.application.as_ref(),
        }
    }

    #[must_use]
    pub fn rto_for(&self, component: Component) -> Option<Duration> {
        self.for_component(component)
            .and_then(|t| t.rto_seconds)
            .map(Duration::from_secs)
    }

    /// Component RPO target, falling back to the overall target.
    #[must_use]
    pub fn rpo_for(&self, component: Component) -> Duration {
        Duration::from_secs(
            self.for_component(component)
                .and_then(|t| t.rpo_seconds)
                .unwrap_or(self.overall_rpo_seconds),
        )
    }

    #[must_use]
    pub fn overall_rto(&self) -> Duration {
        Duration::from_secs(self.overall_rto_seconds)
    }
}

/// One orchestrator execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySession {
    pub(crate) id: String,
    pub(crate) target_timestamp: Option<DateTime<Utc>>,
    pub(crate) mode: RecoveryMode,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    /// Monotonic wall time from start to finalization.
    pub(crate) wall_elapsed_ms: Option<u64>,
    pub(crate) state: SessionState,
    pub(crate) phases: Vec<PhaseResult>,
    pub(crate) selected_artifacts: BTreeMap<Component, BackupArtifact>,
    pub(crate) objectives: Objectives,
    pub(crate) failure_policy: FailurePolicy,
    pub(crate) missing_decision: MissingArtifactDecision,
    pub(crate) degraded: bool,
    pub(crate) missing_components: BTreeMap<Component, NoArtifactReason>,
    pub(crate) cancel_requested: bool,
    pub(crate) verification: Option<VerificationReport>,
    pub(crate) terminal: Option<Terminal>,
    pub(crate) time_scale: f64,
    pub(crate) tolerance: f64,
}

impl RecoverySession {
    pub(crate) fn new(
        target_timestamp: Option<DateTime<Utc>>,
        mode: RecoveryMode,
        objectives: Objectives,
        failure_policy: FailurePolicy,
        missing_decision: MissingArtifactDecision,
        time_scale: f64,
        tolerance: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_timestamp,
            mode,
            started_at: Utc::now(),
            finished_at: None,
            wall_elapsed_ms: None,
            state: SessionState::Created,
            phases: Vec::new(),
            selected_artifacts: BTreeMap::new(),
            objectives,
            failure_policy,
            missing_decision,
            degraded: false,
            missing_components: BTreeMap::new(),
            cancel_requested: false,
            verification: None,
            terminal: None,
            time_scale,
            tolerance,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn target_timestamp(&self) -> Option<DateTime<Utc>> {
        self.target_timestamp
    }

    #[must_use]
    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    #[must_use]
    pub fn wall_elapsed(&self) -> Option<Duration> {
        self.wall_elapsed_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn phases(&self) -> &[PhaseResult] {
        &self.phases
    }

    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// The restore phase for `component`, if one was planned.
    #[must_use]
    pub fn restore_phase(&self, component: Component) -> Option<&PhaseResult> {
        self.phases
            .iter()
            .find(|p| p.kind == PhaseKind::Restore && p.component == Some(component))
    }

    #[must_use]
    pub fn selected_artifacts(&self) -> &BTreeMap<Component, BackupArtifact> {
        &self.selected_artifacts
    }

    #[must_use]
    pub fn objectives(&self) -> &Objectives {
        &self.objectives
    }

    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    #[must_use]
    pub fn missing_decision(&self) -> MissingArtifactDecision {
        self.missing_decision
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    #[must_use]
    pub fn missing_components(&self) -> &BTreeMap<Component, NoArtifactReason> {
        &self.missing_components
    }

    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    #[must_use]
    pub fn verification(&self) -> Option<&VerificationReport> {
        self.verification.as_ref()
    }

    #[must_use]
    pub fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    #[must_use]
    pub fn terminal_status(&self) -> Option<TerminalStatus> {
        self.terminal.as_ref().map(|t| t.status)
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.terminal.is_some()
    }

    #[must_use]
    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Components whose restore phase succeeded.
    #[must_use]
    pub fn restored_components(&self) -> Vec<Component> {
        self.phases
            .iter()
            .filter(|p| p.kind == PhaseKind::Restore && p.status == PhaseStatus::Succeeded)
            .filter_map(|p| p.component)
            .collect()
    }

    #[must_use]
    pub fn has_reason(&self, reason: FailureReason) -> bool {
        self.terminal
            .as_ref()
            .is_some_and(|t| t.reasons.contains(&reason))
    }

    /// Process exit code: 0 success, 1 failure, 2 partial or degraded.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.terminal_status() {
            Some(TerminalStatus::Succeeded) if !self.degraded => 0,
            Some(TerminalStatus::Succeeded | TerminalStatus::PartiallyRecovered) => 2,
            Some(TerminalStatus::Failed) | None => 1,
        }
    }

    pub(crate) fn phase_mut(&mut self, name: &str) -> Option<&mut PhaseResult> {
        self.phases.iter_mut().find(|p| p.name == name)
    }

    /// Path of the persisted record for `id` under `dir`.
    #[must_use]
    pub fn record_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    /// Write the session as `{dir}/{id}.json`, atomically.
    pub fn persist(&self, dir: &Path) -> crate::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::record_path(dir, &self.id);
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &json)?;
        tracing::info!(session_id = %self.id, path = %path.display(), "Session persisted");
        Ok(path)
    }

    /// Load a persisted session by id.
    pub fn load(dir: &Path, id: &str) -> crate::Result<Self> {
        if uuid::Uuid::parse_str(id).is_err() {
            return Err(crate::Error::Runtime(format!("invalid session id: {id}")));
        }
        let data = std::fs::read(Self::record_path(dir, id))?;
        Ok(serde_json::from_slice(&data)?)
    }
}
