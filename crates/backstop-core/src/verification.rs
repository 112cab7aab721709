//! Post-restore verification.
//!
//! Runs after the restore waves. For every restored component it re-invokes
//! the adapter's read-only `verify`, then compares the live facts against the
//! pre-incident facts recorded in the artifact: each must be within one order
//! of magnitude. The application store must also hold a non-zero record count
//! whose vector index is of comparable size. Nothing here mutates state.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapter::application::{FACT_RECORDS, FACT_VECTOR_DOCUMENTS};
use crate::adapter::{ArtifactAdapter, HealthStatus};
use crate::artifact::{BackupArtifact, Component};
use crate::session::RecoverySession;

/// One verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub component: Component,
    pub check: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(component: Component, check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            component,
            check: check.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(component: Component, check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            component,
            check: check.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Components with at least one failing check.
    #[must_use]
    pub fn failed_components(&self) -> Vec<Component> {
        let mut components: Vec<Component> = self.failures().map(|c| c.component).collect();
        components.sort();
        components.dedup();
        components
    }
}

/// `actual` is within one order of magnitude of `expected`. Zero counts as one.
#[must_use]
pub fn within_order_of_magnitude(expected: u64, actual: u64) -> bool {
    let (expected, actual) = (expected.max(1), actual.max(1));
    actual.saturating_mul(10) >= expected && actual <= expected.saturating_mul(10)
}

/// Stateless verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerificationEngine;

impl VerificationEngine {
    /// Verify every component the session restored.
    pub async fn verify(
        &self,
        session: &RecoverySession,
        adapters: &BTreeMap<Component, Arc<dyn ArtifactAdapter>>,
    ) -> VerificationReport {
        let targets: Vec<(Component, &BackupArtifact, &Arc<dyn ArtifactAdapter>)> = session
            .restored_components()
            .into_iter()
            .filter_map(|component| {
                let artifact = session.selected_artifacts().get(&component)?;
                let adapter = adapters.get(&component)?;
                Some((component, artifact, adapter))
            })
            .collect();

        let per_component = join_all(
            targets
                .into_iter()
                .map(|(component, artifact, adapter)| verify_component(component, artifact, adapter.as_ref())),
        )
        .await;

        let report = VerificationReport {
            checks: per_component.into_iter().flatten().collect(),
        };
        if report.all_passed() {
            info!(session_id = %session.id(), checks = report.checks.len(), "Verification passed");
        } else {
            warn!(
                session_id = %session.id(),
                failed = ?report.failed_components(),
                "Verification failed"
            );
        }
        report
    }
}

async fn verify_component(
    component: Component,
    artifact: &BackupArtifact,
    adapter: &dyn ArtifactAdapter,
) -> Vec<CheckResult> {
    let mut checks = Vec::new();
    let verification = match adapter.verify(artifact).await {
        Ok(v) => v,
        Err(e) => {
            checks.push(CheckResult::fail(component, "checksum", e.to_string()));
            return checks;
        }
    };

    if verification.checksum_ok() {
        checks.push(CheckResult::pass(component, "checksum", verification.actual_checksum.clone()));
    } else {
        checks.push(CheckResult::fail(
            component,
            "checksum",
            format!(
                "expected {}, got {}",
                verification.expected_checksum, verification.actual_checksum
            ),
        ));
    }

    let health = &verification.health;
    match health.status {
        HealthStatus::Healthy => checks.push(CheckResult::pass(component, "health", "healthy")),
        status => checks.push(CheckResult::fail(
            component,
            "health",
            health
                .detail
                .clone()
                .unwrap_or_else(|| format!("{status:?}").to_lowercase()),
        )),
    }

    for (key, &expected) in &artifact.facts {
        let check = format!("fact:{key}");
        match health.facts.get(key) {
            Some(&actual) if within_order_of_magnitude(expected, actual) => checks.push(
                CheckResult::pass(component, check, format!("{actual} (pre-incident {expected})")),
            ),
            Some(&actual) => checks.push(CheckResult::fail(
                component,
                check,
                format!("{actual} is not within an order of magnitude of pre-incident {expected}"),
            )),
            None => checks.push(CheckResult::fail(component, check, "not reported by live probe")),
        }
    }

    if component == Component::Application {
        let records = health.facts.get(FACT_RECORDS).copied().unwrap_or(0);
        if records == 0 {
            checks.push(CheckResult::fail(component, "records_present", "record count is zero"));
        } else {
            checks.push(CheckResult::pass(component, "records_present", records.to_string()));
        }
        let indexed = artifact.fact(FACT_VECTOR_DOCUMENTS).unwrap_or(0) > 0;
        if indexed {
            let documents = health.facts.get(FACT_VECTOR_DOCUMENTS).copied().unwrap_or(0);
            let check = "vector_index_consistency";
            if within_order_of_magnitude(records, documents) {
                checks.push(CheckResult::pass(
                    component,
                    check,
                    format!("{documents} documents for {records} records"),
                ));
            } else {
                checks.push(CheckResult::fail(
                    component,
                    check,
                    format!("{documents} documents for {records} records"),
                ));
            }
        }
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::simulated::{SimulatedAdapter, facts, simulated_artifact};
    use crate::artifact::RetentionTier;
    use crate::orchestrator::FailurePolicy;
    use crate::selector::MissingArtifactDecision;
    use crate::session::{Objectives, PhaseKind, PhaseResult, PhaseStatus, RecoveryMode};
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn order_of_magnitude_bounds() {
        assert!(within_order_of_magnitude(100, 100));
        assert!(within_order_of_magnitude(100, 10));
        assert!(within_order_of_magnitude(100, 1000));
        assert!(!within_order_of_magnitude(100, 9));
        assert!(!within_order_of_magnitude(100, 1001));
        assert!(within_order_of_magnitude(0, 0));
        assert!(within_order_of_magnitude(0, 5));
    }

    fn restored_session(artifact: &BackupArtifact) -> RecoverySession {
        let mut session = RecoverySession::new(
            None,
            RecoveryMode::Simulation,
            Objectives::default(),
            FailurePolicy::Continue,
            MissingArtifactDecision::Abort,
            1.0,
            0.25,
        );
        let mut phase = PhaseResult::pending(
            format!("restore:{}", artifact.component),
            PhaseKind::Restore,
            Some(artifact.component),
            1,
        );
        phase.status = PhaseStatus::Succeeded;
        session.phases.push(phase);
        session
            .selected_artifacts
            .insert(artifact.component, artifact.clone());
        session
    }

    fn adapters(adapter: SimulatedAdapter) -> BTreeMap<Component, Arc<dyn ArtifactAdapter>> {
        let mut map: BTreeMap<Component, Arc<dyn ArtifactAdapter>> = BTreeMap::new();
        map.insert(adapter.component(), Arc::new(adapter));
        map
    }

    #[tokio::test]
    async fn matching_facts_pass() {
        let artifact = simulated_artifact(
            Component::Application,
            Utc::now(),
            RetentionTier::Hourly,
            facts([("records", 1000), ("vector_documents", 900)]),
        );
        let adapter = SimulatedAdapter::new(Component::Application, Duration::ZERO)
            .with_live_facts(facts([("records", 800), ("vector_documents", 700)]));
        let report = VerificationEngine
            .verify(&restored_session(&artifact), &adapters(adapter))
            .await;
        assert!(report.all_passed(), "{report:?}");
    }

    #[tokio::test]
    async fn empty_application_store_fails() {
        let artifact = simulated_artifact(
            Component::Application,
            Utc::now(),
            RetentionTier::Hourly,
            facts([("records", 1000)]),
        );
        let adapter = SimulatedAdapter::new(Component::Application, Duration::ZERO)
            .with_live_facts(facts([("records", 0)]));
        let report = VerificationEngine
            .verify(&restored_session(&artifact), &adapters(adapter))
            .await;
        let failed: Vec<&str> = report.failures().map(|c| c.check.as_str()).collect();
        assert_eq!(failed, vec!["fact:records", "records_present"]);
        assert_eq!(report.failed_components(), vec![Component::Application]);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_reported() {
        let artifact = simulated_artifact(
            Component::Metrics,
            Utc::now(),
            RetentionTier::Hourly,
            facts([("series", 50)]),
        );
        let adapter = SimulatedAdapter::new(Component::Metrics, Duration::ZERO).corrupt_on_verify();
        let report = VerificationEngine
            .verify(&restored_session(&artifact), &adapters(adapter))
            .await;
        assert!(!report.all_passed());
        assert_eq!(report.failures().next().unwrap().check, "checksum");
    }

    #[tokio::test]
    async fn components_not_restored_are_not_verified() {
        let artifact = simulated_artifact(
            Component::Metrics,
            Utc::now(),
            RetentionTier::Hourly,
            facts([("series", 50)]),
        );
        let mut session = restored_session(&artifact);
        session.phases[0].status = PhaseStatus::Failed;
        let adapter = SimulatedAdapter::new(Component::Metrics, Duration::ZERO);
        let report = VerificationEngine.verify(&session, &adapters(adapter)).await;
        assert!(report.checks.is_empty());
    }
}
