//! Recovery orchestration.
//!
//! # State machine
//!
//! `Created → InfrastructureReady → ComponentRestoring(i)* → Verifying →
//! {Succeeded | Failed | PartiallyRecovered}`
//!
//! Components restore in waves derived from the dependency graph: a component
//! runs one wave after the latest wave of anything it depends on, and every
//! component of a wave restores concurrently. Between waves the orchestrator
//! re-evaluates failure policy, the RTO budget and cancellation; none of them
//! interrupts a restore already in flight.
//!
//! [`RecoveryOrchestrator::recover`] never returns an error. Every outcome,
//! including refusal to start, is recorded on the finalized session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::adapter::ArtifactAdapter;
use crate::artifact::Component;
use crate::catalog::CatalogSnapshot;
use crate::error::{AdapterError, ConfigError};
use crate::retention::RetentionEngine;
use crate::retry::poll_until;
use crate::selector::{MissingArtifactDecision, select};
use crate::session::{
    FailureReason, Objectives, PhaseError, PhaseKind, PhaseResult, PhaseStatus, RecoveryMode,
    RecoverySession, SessionState, SkipReason, Terminal, TerminalStatus,
};
use crate::verification::VerificationEngine;

pub const INFRASTRUCTURE_PHASE: &str = "infrastructure";
pub const VERIFICATION_PHASE: &str = "verification";

/// Name of the restore phase for a component.
#[must_use]
pub fn restore_phase_name(component: Component) -> String {
    format!("restore:{component}")
}

/// How a component failure affects the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep going; skip only hard dependents of what failed.
    #[default]
    Continue,
    /// Start nothing new after the first failure.
    AllOrNothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// The dependent cannot restore without it.
    Hard,
    /// Ordering only; the dependent still restores if it failed.
    Soft,
}

/// `component` restores after `on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub component: Component,
    pub on: Component,
    pub kind: DependencyKind,
}

/// Validated restore order and dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    order: Vec<Component>,
    dependencies: Vec<Dependency>,
}

impl Default for RecoveryPlan {
    /// Metrics, dashboards, application; dashboards soft-depend on metrics.
    fn default() -> Self {
        Self {
            order: Component::ALL.to_vec(),
            dependencies: vec![Dependency {
                component: Component::Dashboards,
                on: Component::Metrics,
                kind: DependencyKind::Soft,
            }],
        }
    }
}

impl RecoveryPlan {
    /// Build a plan. Every dependency must point at a component declared
    /// earlier in `order`, which also rules out cycles.
    pub fn new(order: Vec<Component>, dependencies: Vec<Dependency>) -> Result<Self, ConfigError> {
        let mut seen = BTreeSet::new();
        for component in &order {
            if !seen.insert(*component) {
                return Err(ConfigError::ValidationError(format!(
                    "recovery.order lists {component} more than once"
                )));
            }
        }
        let position = |c: Component| order.iter().position(|o| *o == c);
        for dep in &dependencies {
            let (Some(dependent), Some(prerequisite)) = (position(dep.component), position(dep.on))
            else {
                return Err(ConfigError::ValidationError(format!(
                    "dependency {} -> {} names a component outside recovery.order",
                    dep.component, dep.on
                )));
            };
            if prerequisite >= dependent {
                return Err(ConfigError::ValidationError(format!(
                    "dependency {} -> {} points against the declared order",
                    dep.component, dep.on
                )));
            }
        }
        Ok(Self { order, dependencies })
    }

    #[must_use]
    pub fn order(&self) -> &[Component] {
        &self.order
    }

    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Components grouped into waves, each in declared order.
    #[must_use]
    pub fn waves(&self) -> Vec<Vec<Component>> {
        let mut level: BTreeMap<Component, usize> = BTreeMap::new();
        for component in &self.order {
            let wave = self
                .dependencies
                .iter()
                .filter(|d| d.component == *component)
                .filter_map(|d| level.get(&d.on))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(*component, wave);
        }
        let depth = level.values().max().map_or(0, |m| m + 1);
        let mut waves = vec![Vec::new(); depth];
        for component in &self.order {
            waves[level[component]].push(*component);
        }
        waves
    }

    /// Prerequisites `component` cannot restore without.
    pub fn hard_dependencies(&self, component: Component) -> impl Iterator<Item = Component> + '_ {
        self.dependencies
            .iter()
            .filter(move |d| d.component == component && d.kind == DependencyKind::Hard)
            .map(|d| d.on)
    }
}

/// External readiness check for shared infrastructure (network, volumes,
/// database servers) that must be up before any component restores.
#[async_trait]
pub trait InfrastructureProbe: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

/// Probe that always reports ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

#[async_trait]
impl InfrastructureProbe for AlwaysReady {
    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Orchestrator-wide settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub plan: RecoveryPlan,
    pub failure_policy: FailurePolicy,
    pub objectives: Objectives,
    pub infrastructure_timeout: Duration,
    pub infrastructure_poll: Duration,
    /// Wall time per unit of simulated time in simulation mode.
    pub time_scale: f64,
    /// Allowed shortfall of wall time against the compressed minimum.
    pub tolerance: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            plan: RecoveryPlan::default(),
            failure_policy: FailurePolicy::Continue,
            objectives: Objectives::default(),
            infrastructure_timeout: Duration::from_secs(300),
            infrastructure_poll: Duration::from_secs(2),
            time_scale: 0.001,
            tolerance: 0.25,
        }
    }
}

/// Inputs for one recovery.
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    /// Recovery point; `None` restores the latest artifacts.
    pub target: Option<DateTime<Utc>>,
    pub mode: RecoveryMode,
    pub missing_artifacts: MissingArtifactDecision,
    /// Catalog snapshots taken when the request was made.
    pub catalogs: BTreeMap<Component, Arc<CatalogSnapshot>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Policy,
    Rto,
    Cancelled,
}

impl Halt {
    const fn skip_reason(self) -> SkipReason {
        match self {
            Self::Policy => SkipReason::PolicyStopped,
            Self::Rto => SkipReason::RtoExceeded,
            Self::Cancelled => SkipReason::Cancelled,
        }
    }
}

/// Drives a recovery session through its state machine.
pub struct RecoveryOrchestrator {
    adapters: BTreeMap<Component, Arc<dyn ArtifactAdapter>>,
    infrastructure: Arc<dyn InfrastructureProbe>,
    retention: Arc<RetentionEngine>,
    verifier: VerificationEngine,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("components", &self.adapters.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RecoveryOrchestrator {
    pub fn new(
        adapters: BTreeMap<Component, Arc<dyn ArtifactAdapter>>,
        retention: Arc<RetentionEngine>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            adapters,
            infrastructure: Arc::new(AlwaysReady),
            retention,
            verifier: VerificationEngine,
            settings,
        }
    }

    #[must_use]
    pub fn with_infrastructure(mut self, probe: Arc<dyn InfrastructureProbe>) -> Self {
        self.infrastructure = probe;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run a recovery to a terminal status.
    pub async fn recover(
        &self,
        request: RecoveryRequest,
        cancel: CancellationToken,
    ) -> RecoverySession {
        let session = RecoverySession::new(
            request.target,
            request.mode,
            self.settings.objectives.clone(),
            self.settings.failure_policy,
            request.missing_artifacts,
            self.settings.time_scale,
            self.settings.tolerance,
        );
        let span = crate::recovery_span!(
            "recovery",
            session_id = %session.id(),
            mode = ?request.mode,
            target = ?request.target
        );
        self.run(session, request, cancel).instrument(span).await
    }

    /// Budget time elapsed: wall time, scaled back up in simulation mode.
    fn budget_elapsed(&self, mode: RecoveryMode, wall: Duration) -> Duration {
        match mode {
            RecoveryMode::Real => wall,
            RecoveryMode::Simulation if self.settings.time_scale > 0.0 => {
                wall.div_f64(self.settings.time_scale)
            }
            RecoveryMode::Simulation => wall,
        }
    }

    fn register_phases(&self, session: &mut RecoverySession, waves: &[Vec<Component>]) {
        let phase_count = waves.iter().map(Vec::len).sum::<usize>() + 2;
        let even_share = self.settings.objectives.overall_rto() / phase_count as u32;
        let allot = |component: Option<Component>| {
            component
                .and_then(|c| self.settings.objectives.rto_for(c))
                .unwrap_or(even_share)
        };

        let mut infra = PhaseResult::pending(INFRASTRUCTURE_PHASE, PhaseKind::Infrastructure, None, 0);
        infra.allotted_ms = Some(allot(None).as_millis() as u64);
        session.phases.push(infra);
        for (index, wave) in waves.iter().enumerate() {
            for component in wave {
                let mut phase = PhaseResult::pending(
                    restore_phase_name(*component),
                    PhaseKind::Restore,
                    Some(*component),
                    index + 1,
                );
                phase.allotted_ms = Some(allot(Some(*component)).as_millis() as u64);
                if session.mode == RecoveryMode::Simulation {
                    phase.simulated_duration_override_ms = self
                        .adapters
                        .get(component)
                        .and_then(|a| a.simulated_duration())
                        .map(|d| d.as_millis() as u64);
                }
                session.phases.push(phase);
            }
        }
        let mut verification = PhaseResult::pending(
            VERIFICATION_PHASE,
            PhaseKind::Verification,
            None,
            waves.len() + 1,
        );
        verification.allotted_ms = Some(allot(None).as_millis() as u64);
        session.phases.push(verification);
    }

    async fn run(
        &self,
        mut session: RecoverySession,
        request: RecoveryRequest,
        cancel: CancellationToken,
    ) -> RecoverySession {
        let clock = tokio::time::Instant::now();
        let waves = self.settings.plan.waves();
        self.register_phases(&mut session, &waves);
        info!(
            session_id = %session.id(),
            waves = waves.len(),
            policy = ?self.settings.failure_policy,
            "Recovery started"
        );

        // Refuse before touching anything if a component cannot be driven.
        for component in self.settings.plan.order() {
            let refusal = match self.adapters.get(component) {
                None => Some(PhaseError::new(
                    "no_adapter",
                    format!("no adapter registered for {component}"),
                )),
                Some(adapter) if session.mode == RecoveryMode::Simulation && !adapter.is_simulated() => {
                    Some(PhaseError::from(&AdapterError::LiveAdapterInSimulation(*component)))
                }
                Some(_) => None,
            };
            if let Some(error) = refusal {
                warn!(session_id = %session.id(), component = %component, error = %error.message, "Recovery refused");
                fail_phase(&mut session, &restore_phase_name(*component), error);
                skip_pending(&mut session, SkipReason::PolicyStopped);
                return self.finalize(session, clock, TerminalInputs {
                    failed: BTreeSet::from([*component]),
                    ..TerminalInputs::default()
                });
            }
        }

        // Selection over the snapshots captured with the request.
        let catalogs: BTreeMap<Component, Arc<CatalogSnapshot>> = self
            .settings
            .plan
            .order()
            .iter()
            .map(|c| {
                let snapshot = request
                    .catalogs
                    .get(c)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(CatalogSnapshot::empty(*c)));
                (*c, snapshot)
            })
            .collect();
        let selection = select(request.target, &catalogs);
        session.missing_components = selection.missing.clone();
        let selection = match selection.decide(request.missing_artifacts) {
            Ok(selection) => selection,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Recovery aborted: incomplete selection");
                for component in session.missing_components.keys().copied().collect::<Vec<_>>() {
                    skip_phase(&mut session, &restore_phase_name(component), SkipReason::NoArtifact);
                }
                skip_pending(&mut session, SkipReason::PolicyStopped);
                return self.finalize(session, clock, TerminalInputs {
                    no_artifact: true,
                    ..TerminalInputs::default()
                });
            }
        };
        session.degraded = !selection.missing.is_empty();
        for component in selection.missing.keys() {
            skip_phase(&mut session, &restore_phase_name(*component), SkipReason::NoArtifact);
        }
        session.selected_artifacts = selection.chosen;

        // Selected artifacts must outlive any concurrent retention pass.
        let _pins: Vec<_> = session
            .selected_artifacts
            .values()
            .map(|a| self.retention.pin_guard(&a.id))
            .collect();

        let mut inputs = TerminalInputs {
            degraded: session.degraded,
            ..TerminalInputs::default()
        };

        // Infrastructure.
        if cancel.is_cancelled() {
            session.cancel_requested = true;
            skip_pending(&mut session, SkipReason::Cancelled);
            inputs.cancelled = true;
            return self.finalize(session, clock, inputs);
        }
        start_phase(&mut session, INFRASTRUCTURE_PHASE);
        let probe = Arc::clone(&self.infrastructure);
        let ready = tokio::select! {
            ready = poll_until(
                self.settings.infrastructure_timeout,
                self.settings.infrastructure_poll,
                || {
                    let probe = Arc::clone(&probe);
                    async move { probe.check().await.is_ok() }
                },
            ) => Some(ready),
            () = cancel.cancelled() => None,
        };
        match ready {
            Some(true) => {
                succeed_phase(&mut session, INFRASTRUCTURE_PHASE);
                session.state = SessionState::InfrastructureReady;
                debug!(session_id = %session.id(), "Infrastructure ready");
            }
            Some(false) => {
                let error = match self.infrastructure.check().await {
                    Err(reason) => reason,
                    Ok(()) => "became ready only after the wait window".to_string(),
                };
                fail_phase(
                    &mut session,
                    INFRASTRUCTURE_PHASE,
                    PhaseError::new(
                        "infrastructure_unavailable",
                        format!(
                            "not ready within {}s: {error}",
                            self.settings.infrastructure_timeout.as_secs()
                        ),
                    ),
                );
                skip_pending(&mut session, SkipReason::PolicyStopped);
                inputs.infrastructure_down = true;
                return self.finalize(session, clock, inputs);
            }
            None => {
                session.cancel_requested = true;
                fail_phase(
                    &mut session,
                    INFRASTRUCTURE_PHASE,
                    PhaseError::new("cancelled", "cancelled while waiting for infrastructure"),
                );
                skip_pending(&mut session, SkipReason::Cancelled);
                inputs.cancelled = true;
                return self.finalize(session, clock, inputs);
            }
        }

        // Restore waves.
        let mut halt: Option<Halt> = None;
        for (index, wave) in waves.iter().enumerate() {
            session.state = SessionState::ComponentRestoring(index + 1);
            let mut runnable = Vec::new();
            for component in wave {
                let name = restore_phase_name(*component);
                if session.phase(&name).is_some_and(|p| p.status != PhaseStatus::Pending) {
                    continue;
                }
                if halt.is_none() && cancel.is_cancelled() {
                    info!(session_id = %session.id(), "Cancellation honored before next restore");
                    session.cancel_requested = true;
                    halt = Some(Halt::Cancelled);
                }
                if halt.is_none() {
                    let wall = clock.elapsed();
                    if self.budget_elapsed(session.mode, wall) >= self.settings.objectives.overall_rto() {
                        warn!(session_id = %session.id(), "Overall RTO exhausted; no new phases");
                        halt = Some(Halt::Rto);
                    }
                }
                if let Some(halt) = halt {
                    skip_phase(&mut session, &name, halt.skip_reason());
                    continue;
                }
                let unmet = self
                    .settings
                    .plan
                    .hard_dependencies(*component)
                    .find(|dep| !session.restored_components().contains(dep));
                if let Some(dep) = unmet {
                    info!(
                        session_id = %session.id(),
                        component = %component,
                        dependency = %dep,
                        "Skipping restore: hard dependency not restored"
                    );
                    skip_phase(&mut session, &name, SkipReason::HardDependencyFailed(dep));
                    inputs.dependency_skipped = true;
                    continue;
                }
                runnable.push(*component);
            }

            for component in &runnable {
                start_phase(&mut session, &restore_phase_name(*component));
            }
            let mode = session.mode;
            let time_scale = self.settings.time_scale;
            let restores = runnable.iter().filter_map(|component| {
                let adapter = self.adapters.get(component)?;
                let artifact = session.selected_artifacts.get(component)?.clone();
                let session_id = session.id().to_string();
                Some(async move {
                    info!(
                        session_id = %session_id,
                        component = %component,
                        artifact_id = %artifact.id,
                        "Restore starting"
                    );
                    let result = match mode {
                        RecoveryMode::Real => adapter.restore(&artifact).await,
                        RecoveryMode::Simulation => {
                            adapter.restore_simulated(&artifact, time_scale).await
                        }
                    };
                    (*component, result)
                })
            });
            // Cancellation is deliberately not raced here: a restore that has
            // begun runs to completion.
            let results = join_all(restores).await;

            for (component, result) in results {
                let name = restore_phase_name(component);
                match result {
                    Ok(report) => {
                        succeed_phase(&mut session, &name);
                        info!(
                            session_id = %session.id(),
                            component = %component,
                            phase = %name,
                            elapsed_ms = report.elapsed.as_millis() as u64,
                            "Restore succeeded"
                        );
                    }
                    Err(e) => {
                        warn!(
                            session_id = %session.id(),
                            component = %component,
                            phase = %name,
                            error = %e,
                            "Restore failed"
                        );
                        fail_phase(&mut session, &name, PhaseError::from(&e));
                        inputs.failed.insert(component);
                    }
                }
            }

            if halt.is_none()
                && !inputs.failed.is_empty()
                && self.settings.failure_policy == FailurePolicy::AllOrNothing
            {
                halt = Some(Halt::Policy);
            }
            if self.rto_breached(&session, clock.elapsed()) {
                inputs.rto_exceeded = true;
                if halt.is_none() {
                    warn!(session_id = %session.id(), "RTO exceeded; no new phases");
                    halt = Some(Halt::Rto);
                }
            }
        }
        if cancel.is_cancelled() && halt.is_none() {
            session.cancel_requested = true;
            halt = Some(Halt::Cancelled);
        }
        match halt {
            Some(Halt::Cancelled) => inputs.cancelled = true,
            Some(Halt::Rto) => inputs.rto_exceeded = true,
            _ => {}
        }

        // Verification.
        let restored = session.restored_components();
        if let Some(halt) = halt {
            skip_phase(&mut session, VERIFICATION_PHASE, halt.skip_reason());
        } else if restored.is_empty() {
            skip_phase(&mut session, VERIFICATION_PHASE, SkipReason::PolicyStopped);
        } else {
            session.state = SessionState::Verifying;
            start_phase(&mut session, VERIFICATION_PHASE);
            let report = self.verifier.verify(&session, &self.adapters).await;
            if report.all_passed() {
                succeed_phase(&mut session, VERIFICATION_PHASE);
            } else {
                let failing: Vec<String> = report
                    .failures()
                    .map(|c| format!("{}:{}", c.component, c.check))
                    .collect();
                fail_phase(
                    &mut session,
                    VERIFICATION_PHASE,
                    PhaseError::new("verification_failed", failing.join(", ")),
                );
                inputs.verification_failed = report.failed_components();
            }
            session.verification = Some(report);
            if self.rto_breached(&session, clock.elapsed()) {
                inputs.rto_exceeded = true;
            }
        }

        self.finalize(session, clock, inputs)
    }

    /// Overall budget spent, or any finished phase over its allotment.
    fn rto_breached(&self, session: &RecoverySession, wall: Duration) -> bool {
        if self.budget_elapsed(session.mode, wall) > self.settings.objectives.overall_rto() {
            return true;
        }
        session.phases().iter().filter(|p| p.ran()).any(|p| {
            let spent = match session.mode {
                RecoveryMode::Simulation => p.effective_duration(),
                RecoveryMode::Real => p.elapsed(),
            };
            match (spent, p.allotted_ms) {
                (Some(spent), Some(allotted)) => spent > Duration::from_millis(allotted),
                _ => false,
            }
        })
    }

    fn finalize(
        &self,
        mut session: RecoverySession,
        clock: tokio::time::Instant,
        inputs: TerminalInputs,
    ) -> RecoverySession {
        let restored = session.restored_components();
        let mut reasons = Vec::new();
        if inputs.rto_exceeded {
            reasons.push(FailureReason::RtoExceeded);
        }
        if inputs.cancelled {
            reasons.push(FailureReason::Cancelled);
        }
        if inputs.infrastructure_down {
            reasons.push(FailureReason::InfrastructureUnavailable);
        }
        if inputs.no_artifact {
            reasons.push(FailureReason::NoArtifactAvailable);
        }
        let component_failed = !inputs.failed.is_empty() || inputs.dependency_skipped;
        if component_failed {
            reasons.push(FailureReason::ComponentFailed);
        }
        if !inputs.verification_failed.is_empty() {
            reasons.push(FailureReason::VerificationFailed);
        }
        if inputs.degraded {
            reasons.push(FailureReason::DegradedSelection);
        }

        let all_or_nothing = self.settings.failure_policy == FailurePolicy::AllOrNothing;
        let status = if reasons.is_empty() {
            TerminalStatus::Succeeded
        } else if inputs.rto_exceeded
            || inputs.infrastructure_down
            || inputs.no_artifact
            || restored.is_empty()
            || (all_or_nothing && (component_failed || !inputs.verification_failed.is_empty()))
        {
            TerminalStatus::Failed
        } else {
            TerminalStatus::PartiallyRecovered
        };

        let mut failed_components: BTreeSet<Component> = inputs.failed;
        failed_components.extend(inputs.verification_failed);
        session.terminal = Some(Terminal {
            status,
            reasons,
            failed_components: failed_components.into_iter().collect(),
        });
        session.state = SessionState::Terminal;
        session.finished_at = Some(Utc::now());
        session.wall_elapsed_ms = Some(clock.elapsed().as_millis() as u64);

        info!(
            session_id = %session.id(),
            status = ?status,
            restored = ?restored,
            elapsed_ms = session.wall_elapsed_ms.unwrap_or(0),
            "Recovery finished"
        );
        session
    }
}

/// Everything that decides the terminal status.
#[derive(Debug, Default)]
struct TerminalInputs {
    failed: BTreeSet<Component>,
    dependency_skipped: bool,
    verification_failed: Vec<Component>,
    rto_exceeded: bool,
    cancelled: bool,
    infrastructure_down: bool,
    no_artifact: bool,
    degraded: bool,
}

fn start_phase(session: &mut RecoverySession, name: &str) {
    if let Some(phase) = session.phase_mut(name) {
        phase.status = PhaseStatus::Running;
        phase.started_at = Some(Utc::now());
    }
}

fn succeed_phase(session: &mut RecoverySession, name: &str) {
    if let Some(phase) = session.phase_mut(name) {
        phase.status = PhaseStatus::Succeeded;
        phase.ended_at = Some(Utc::now());
    }
}

fn fail_phase(session: &mut RecoverySession, name: &str, error: PhaseError) {
    if let Some(phase) = session.phase_mut(name) {
        phase.status = PhaseStatus::Failed;
        let now = Utc::now();
        phase.started_at.get_or_insert(now);
        phase.ended_at = Some(now);
        phase.error = Some(error);
    }
}

fn skip_phase(session: &mut RecoverySession, name: &str, reason: SkipReason) {
    if let Some(phase) = session.phase_mut(name) {
        if phase.status == PhaseStatus::Pending {
            phase.status = PhaseStatus::Skipped;
            phase.skip_reason = Some(reason);
        }
    }
}

fn skip_pending(session: &mut RecoverySession, reason: SkipReason) {
    for phase in &mut session.phases {
        if phase.status == PhaseStatus::Pending {
            phase.status = PhaseStatus::Skipped;
            phase.skip_reason = Some(reason);
        }
    }
}
