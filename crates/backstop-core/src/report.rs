//! Drill and incident reports.
//!
//! A report is a pure function of a finalized session: elapsed time against
//! RTO per phase and overall, the artifacts used and their RPO, and the
//! verification outcome. Simulation reports are judged in simulated time.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactId, Component, RetentionTier};
use crate::error::{NoArtifactReason, ReportValidationError};
use crate::session::{
    FailureReason, PhaseKind, PhaseResult, PhaseStatus, RecoveryMode, RecoverySession, SkipReason,
    TerminalStatus,
};
use crate::verification::CheckResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub kind: PhaseKind,
    pub component: Option<Component>,
    pub wave: usize,
    pub status: PhaseStatus,
    pub wall_ms: Option<u64>,
    pub simulated_ms: Option<u64>,
    pub allotted_ms: Option<u64>,
    /// `None` when the phase did not run.
    pub within_allotment: Option<bool>,
    pub skip_reason: Option<SkipReason>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactUsage {
    pub component: Component,
    pub artifact_id: ArtifactId,
    pub created_at: DateTime<Utc>,
    pub tier: RetentionTier,
    pub rpo_actual_seconds: u64,
    pub rpo_target_seconds: u64,
    pub rpo_met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub session_id: String,
    pub mode: RecoveryMode,
    pub status: TerminalStatus,
    pub reasons: Vec<FailureReason>,
    pub exit_code: i32,
    pub target_timestamp: Option<DateTime<Utc>>,
    /// The target, or the session start for "latest".
    pub intended_recovery_point: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub wall_elapsed_ms: u64,
    /// Elapsed time judged against RTO: simulated in drills, wall otherwise.
    pub effective_elapsed_ms: u64,
    pub rto_target_seconds: u64,
    pub rto_met: bool,
    pub rpo_met: bool,
    pub degraded: bool,
    pub missing_components: BTreeMap<Component, NoArtifactReason>,
    pub cancel_requested: bool,
    pub phases: Vec<PhaseReport>,
    pub artifacts: Vec<ArtifactUsage>,
    pub verification_passed: Option<bool>,
    pub failed_checks: Vec<CheckResult>,
    pub time_scale: f64,
    pub tolerance: f64,
}

fn to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Sum over waves of the longest phase in each wave.
fn critical_path<F>(phases: &[PhaseResult], duration: F) -> Duration
where
    F: Fn(&PhaseResult) -> Option<Duration>,
{
    let mut per_wave: BTreeMap<usize, Duration> = BTreeMap::new();
    for phase in phases.iter().filter(|p| p.ran()) {
        if let Some(d) = duration(phase) {
            let longest = per_wave.entry(phase.wave).or_default();
            *longest = (*longest).max(d);
        }
    }
    per_wave.values().sum()
}

impl RecoveryReport {
    /// Build the report for a finalized session.
    pub fn from_session(session: &RecoverySession) -> Result<Self, ReportValidationError> {
        let Some(terminal) = session.terminal() else {
            return Err(ReportValidationError::NotFinalized(session.id().to_string()));
        };
        let objectives = session.objectives();
        let wall_elapsed_ms = session.wall_elapsed().map_or(0, to_ms);
        let effective_elapsed_ms = match session.mode() {
            RecoveryMode::Simulation => to_ms(critical_path(session.phases(), PhaseResult::effective_duration)),
            RecoveryMode::Real => wall_elapsed_ms,
        };

        let phases: Vec<PhaseReport> = session
            .phases()
            .iter()
            .map(|p| {
                let spent = match session.mode() {
                    RecoveryMode::Simulation => p.effective_duration(),
                    RecoveryMode::Real => p.elapsed(),
                };
                PhaseReport {
                    name: p.name.clone(),
                    kind: p.kind,
                    component: p.component,
                    wave: p.wave,
                    status: p.status,
                    wall_ms: p.elapsed().map(to_ms),
                    simulated_ms: p.simulated_duration_override_ms,
                    allotted_ms: p.allotted_ms,
                    within_allotment: if p.ran() {
                        spent.zip(p.allotted_ms).map(|(s, a)| to_ms(s) <= a)
                    } else {
                        None
                    },
                    skip_reason: p.skip_reason,
                    error: p.error.as_ref().map(|e| e.message.clone()),
                }
            })
            .collect();

        let intended = session.target_timestamp().unwrap_or_else(|| session.started_at());
        let artifacts: Vec<ArtifactUsage> = session
            .selected_artifacts()
            .values()
            .map(|a| {
                let actual = u64::try_from(a.distance_from(intended).num_seconds()).unwrap_or(0);
                let target = objectives.rpo_for(a.component).as_secs();
                ArtifactUsage {
                    component: a.component,
                    artifact_id: a.id.clone(),
                    created_at: a.created_at,
                    tier: a.retention_tier,
                    rpo_actual_seconds: actual,
                    rpo_target_seconds: target,
                    rpo_met: actual <= target,
                }
            })
            .collect();

        let rto_target_seconds = objectives.overall_rto_seconds;
        let rto_met = !terminal.reasons.contains(&FailureReason::RtoExceeded)
            && effective_elapsed_ms <= rto_target_seconds.saturating_mul(1000);
        let rpo_met = session.missing_components().is_empty() && artifacts.iter().all(|a| a.rpo_met);

        let verification = session.verification();
        Ok(Self {
            session_id: session.id().to_string(),
            mode: session.mode(),
            status: terminal.status,
            reasons: terminal.reasons.clone(),
            exit_code: session.exit_code(),
            target_timestamp: session.target_timestamp(),
            intended_recovery_point: intended,
            started_at: session.started_at(),
            finished_at: session.finished_at(),
            wall_elapsed_ms,
            effective_elapsed_ms,
            rto_target_seconds,
            rto_met,
            rpo_met,
            degraded: session.is_degraded(),
            missing_components: session.missing_components().clone(),
            cancel_requested: session.cancel_requested(),
            phases,
            artifacts,
            verification_passed: verification.map(crate::verification::VerificationReport::all_passed),
            failed_checks: verification
                .map(|v| v.failures().cloned().collect())
                .unwrap_or_default(),
            time_scale: session.time_scale(),
            tolerance: session.tolerance(),
        })
    }

    /// Minimum wall time a simulation must have taken: the simulated
    /// critical path compressed by `time_scale`.
    #[must_use]
    pub fn compressed_minimum(&self) -> Duration {
        let mut per_wave: BTreeMap<usize, u64> = BTreeMap::new();
        for phase in self
            .phases
            .iter()
            .filter(|p| matches!(p.status, PhaseStatus::Succeeded | PhaseStatus::Failed))
        {
            if let Some(ms) = phase.simulated_ms {
                let longest = per_wave.entry(phase.wave).or_default();
                *longest = (*longest).max(ms);
            }
        }
        let simulated: u64 = per_wave.values().sum();
        Duration::from_millis(simulated).mul_f64(self.time_scale)
    }

    /// Reject simulation reports whose wall time is materially shorter than
    /// the compressed sum of simulated durations.
    pub fn validate(&self) -> Result<(), ReportValidationError> {
        if self.mode != RecoveryMode::Simulation {
            return Ok(());
        }
        if let Some(phase) = self.phases.iter().find(|p| {
            p.kind == PhaseKind::Restore
                && matches!(p.status, PhaseStatus::Succeeded | PhaseStatus::Failed)
                && p.simulated_ms.is_none()
        }) {
            return Err(ReportValidationError::MissingSimulatedDuration {
                phase: phase.name.clone(),
            });
        }
        let expected_ms = to_ms(self.compressed_minimum());
        let floor = (expected_ms as f64) * (1.0 - self.tolerance);
        if (self.wall_elapsed_ms as f64) < floor {
            return Err(ReportValidationError::CompressedTimeTooShort {
                wall_ms: self.wall_elapsed_ms,
                expected_ms,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable summary.
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        let yes_no = |b: bool| if b { "met" } else { "NOT met" };
        let _ = writeln!(out, "Recovery session {} ({:?})", self.session_id, self.mode);
        let _ = writeln!(out, "Status: {:?} (exit {})", self.status, self.exit_code);
        if !self.reasons.is_empty() {
            let _ = writeln!(out, "Reasons: {:?}", self.reasons);
        }
        let _ = writeln!(
            out,
            "Recovery point: {}{}",
            self.intended_recovery_point.to_rfc3339(),
            if self.target_timestamp.is_none() { " (latest)" } else { "" }
        );
        let _ = writeln!(
            out,
            "RTO: {} ms of {} s, {}",
            self.effective_elapsed_ms,
            self.rto_target_seconds,
            yes_no(self.rto_met)
        );
        let _ = writeln!(out, "RPO: {}", yes_no(self.rpo_met));
        if self.degraded {
            let missing: Vec<String> = self.missing_components.keys().map(ToString::to_string).collect();
            let _ = writeln!(out, "Degraded: no artifact for {}", missing.join(", "));
        }

        let _ = writeln!(out, "\nPhases:");
        for phase in &self.phases {
            let timing = match (phase.simulated_ms, phase.wall_ms) {
                (Some(sim), Some(wall)) => format!("{sim} ms simulated, {wall} ms wall"),
                (None, Some(wall)) => format!("{wall} ms"),
                _ => "-".to_string(),
            };
            let budget = phase
                .allotted_ms
                .map_or_else(String::new, |a| format!(" / {a} ms allotted"));
            let _ = write!(
                out,
                "  [wave {}] {:<22} {:?} {timing}{budget}",
                phase.wave, phase.name, phase.status
            );
            if let Some(reason) = &phase.skip_reason {
                let _ = write!(out, " ({reason:?})");
            }
            if let Some(error) = &phase.error {
                let _ = write!(out, " error: {error}");
            }
            out.push('\n');
        }

        if !self.artifacts.is_empty() {
            let _ = writeln!(out, "\nArtifacts:");
            for a in &self.artifacts {
                let _ = writeln!(
                    out,
                    "  {:<12} {} [{}] RPO {} s of {} s, {}",
                    a.component.as_str(),
                    a.artifact_id,
                    a.tier,
                    a.rpo_actual_seconds,
                    a.rpo_target_seconds,
                    yes_no(a.rpo_met)
                );
            }
        }

        match self.verification_passed {
            Some(true) => out.push_str("\nVerification: all checks passed\n"),
            Some(false) => {
                out.push_str("\nVerification: FAILED\n");
                for check in &self.failed_checks {
                    let _ = writeln!(out, "  {} {}: {}", check.component, check.check, check.detail);
                }
            }
            None => out.push_str("\nVerification: not run\n"),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FailurePolicy;
    use crate::selector::MissingArtifactDecision;
    use crate::session::{Objectives, SessionState, Terminal};

    fn simulated_session(overrides: &[(usize, u64)], wall_ms: u64) -> RecoverySession {
        let mut session = RecoverySession::new(
            None,
            RecoveryMode::Simulation,
            Objectives::default(),
            FailurePolicy::Continue,
            MissingArtifactDecision::Abort,
            0.01,
            0.25,
        );
        for (i, (wave, ms)) in overrides.iter().enumerate() {
            let component = Component::ALL[i];
            let mut phase = PhaseResult::pending(
                format!("restore:{component}"),
                PhaseKind::Restore,
                Some(component),
                *wave,
            );
            phase.status = PhaseStatus::Succeeded;
            phase.simulated_duration_override_ms = Some(*ms);
            session.phases.push(phase);
        }
        session.state = SessionState::Terminal;
        session.wall_elapsed_ms = Some(wall_ms);
        session.terminal = Some(Terminal {
            status: TerminalStatus::Succeeded,
            reasons: Vec::new(),
            failed_components: Vec::new(),
        });
        session
    }

    #[test]
    fn compressed_minimum_uses_longest_per_wave() {
        // Wave 1: 600s and 300s in parallel; wave 2: 100s. 700s * 0.01 = 7s.
        let session = simulated_session(&[(1, 600_000), (1, 300_000), (2, 100_000)], 7_000);
        let report = RecoveryReport::from_session(&session).unwrap();
        assert_eq!(report.compressed_minimum(), Duration::from_secs(7));
        assert_eq!(report.effective_elapsed_ms, 700_000);
        assert!(report.validate().is_ok());
    }

    #[test]
    fn too_fast_simulation_is_rejected() {
        let session = simulated_session(&[(1, 600_000)], 1_000);
        let report = RecoveryReport::from_session(&session).unwrap();
        assert_eq!(
            report.validate(),
            Err(ReportValidationError::CompressedTimeTooShort {
                wall_ms: 1_000,
                expected_ms: 6_000,
            })
        );
    }

    #[test]
    fn tolerance_allows_small_shortfall() {
        // 6s expected, 25% tolerance: 4.5s is the floor.
        let session = simulated_session(&[(1, 600_000)], 4_600);
        let report = RecoveryReport::from_session(&session).unwrap();
        assert!(report.validate().is_ok());
    }

    #[test]
    fn restore_without_override_is_rejected() {
        let mut session = simulated_session(&[(1, 600_000)], 6_000);
        session.phases[0].simulated_duration_override_ms = None;
        let report = RecoveryReport::from_session(&session).unwrap();
        assert!(matches!(
            report.validate(),
            Err(ReportValidationError::MissingSimulatedDuration { .. })
        ));
    }

    #[test]
    fn unfinalized_session_has_no_report() {
        let mut session = simulated_session(&[], 0);
        session.terminal = None;
        assert!(matches!(
            RecoveryReport::from_session(&session),
            Err(ReportValidationError::NotFinalized(_))
        ));
    }

    #[test]
    fn rto_overrun_is_reported() {
        // Default overall RTO is 3600s; 4000s simulated overruns it.
        let session = simulated_session(&[(1, 4_000_000)], 40_000);
        let report = RecoveryReport::from_session(&session).unwrap();
        assert!(!report.rto_met);
        assert!(report.render_plain().contains("RTO: 4000000 ms of 3600 s, NOT met"));
    }

    #[test]
    fn plain_and_json_renderings() {
        let session = simulated_session(&[(1, 1_000)], 10);
        let report = RecoveryReport::from_session(&session).unwrap();
        let text = report.render_plain();
        assert!(text.contains("Status: Succeeded (exit 0)"));
        assert!(text.contains("(latest)"));
        assert!(text.contains("Verification: not run"));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["mode"], "simulation");
    }
}
