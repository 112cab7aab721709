//! Configuration management for backstop
//!
//! Handles loading and validation of backstop.toml. Configuration is read
//! once at startup; any violation fails fast as a
//! [`ConfigError::ValidationError`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifact::Component;
use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::orchestrator::{Dependency, FailurePolicy, OrchestratorSettings, RecoveryPlan};
use crate::retention::RetentionPolicy;
use crate::scheduler::BackupSchedule;
use crate::selector::MissingArtifactDecision;
use crate::session::Objectives;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LogConfig,

    /// Where artifacts, catalogs and session records live
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub objectives: Objectives,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Backup schedule per component
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Live state locations of the backed-up subsystems
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Primary artifact directory
    #[serde(default = "default_artifact_root")]
    pub root: String,

    /// Where replaced live state is moved during restore
    #[serde(default = "default_quarantine")]
    pub quarantine: String,

    /// Secondary (remote) artifact directory
    #[serde(default)]
    pub remote: Option<String>,

    /// Catalog logs and persisted sessions
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
            quarantine: default_quarantine(),
            remote: None,
            state_dir: default_state_dir(),
        }
    }
}

fn default_artifact_root() -> String {
    "~/.local/share/backstop/artifacts".to_string()
}

fn default_quarantine() -> String {
    "~/.local/share/backstop/quarantine".to_string()
}

fn default_state_dir() -> String {
    "~/.local/share/backstop/state".to_string()
}

/// Expand a leading `~` to the home directory.
#[must_use]
pub fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(raw)
}

impl StorageConfig {
    #[must_use]
    pub fn resolved_root(&self) -> PathBuf {
        expand_tilde(&self.root)
    }

    #[must_use]
    pub fn resolved_quarantine(&self) -> PathBuf {
        expand_tilde(&self.quarantine)
    }

    #[must_use]
    pub fn resolved_remote(&self) -> Option<PathBuf> {
        self.remote.as_deref().map(expand_tilde)
    }

    #[must_use]
    pub fn catalog_dir(&self) -> PathBuf {
        expand_tilde(&self.state_dir).join("catalog")
    }

    /// Catalog log for one component.
    #[must_use]
    pub fn catalog_path(&self, component: Component) -> PathBuf {
        self.catalog_dir().join(format!("{component}.jsonl"))
    }

    /// Persisted recovery sessions, one JSON file per session id.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        expand_tilde(&self.state_dir).join("sessions")
    }
}

/// Retention policy per component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "RetentionPolicy::standard")]
    pub metrics: RetentionPolicy,
    #[serde(default = "RetentionPolicy::standard")]
    pub dashboards: RetentionPolicy,
    #[serde(default = "RetentionPolicy::standard")]
    pub application: RetentionPolicy,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            metrics: RetentionPolicy::standard(),
            dashboards: RetentionPolicy::standard(),
            application: RetentionPolicy::standard(),
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub const fn for_component(&self, component: Component) -> &RetentionPolicy {
        match component {
            Component::Metrics => &self.metrics,
            Component::Dashboards => &self.dashboards,
            Component::Application => &self.application,
        }
    }
}

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Restore order; each component exactly once
    #[serde(default = "default_order")]
    pub order: Vec<Component>,

    #[serde(default = "default_dependencies")]
    pub dependencies: Vec<Dependency>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// What to do when some component has no restorable artifact
    #[serde(default)]
    pub missing_artifacts: MissingArtifactDecision,

    /// How long a restored component may take to become ready
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,

    #[serde(default = "default_readiness_poll")]
    pub readiness_poll_ms: u64,

    #[serde(default = "default_infrastructure_timeout")]
    pub infrastructure_timeout_secs: u64,

    #[serde(default = "default_infrastructure_poll")]
    pub infrastructure_poll_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            order: default_order(),
            dependencies: default_dependencies(),
            failure_policy: FailurePolicy::default(),
            missing_artifacts: MissingArtifactDecision::default(),
            readiness_timeout_secs: default_readiness_timeout(),
            readiness_poll_ms: default_readiness_poll(),
            infrastructure_timeout_secs: default_infrastructure_timeout(),
            infrastructure_poll_ms: default_infrastructure_poll(),
        }
    }
}

fn default_order() -> Vec<Component> {
    RecoveryPlan::default().order().to_vec()
}

fn default_dependencies() -> Vec<Dependency> {
    RecoveryPlan::default().dependencies().to_vec()
}

fn default_readiness_timeout() -> u64 {
    120
}

fn default_readiness_poll() -> u64 {
    500
}

fn default_infrastructure_timeout() -> u64 {
    300
}

fn default_infrastructure_poll() -> u64 {
    2000
}

/// Drill (simulation mode) settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Wall time per unit of simulated time, in (0, 1]
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Allowed shortfall of wall time against the compressed minimum, in [0, 1)
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_scale: default_time_scale(),
            tolerance: default_tolerance(),
        }
    }
}

fn default_time_scale() -> f64 {
    0.001
}

fn default_tolerance() -> f64 {
    0.25
}

/// Backup schedules; `None` disables scheduled backups for a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_metrics_schedule")]
    pub metrics: Option<String>,
    #[serde(default = "default_dashboards_schedule")]
    pub dashboards: Option<String>,
    #[serde(default = "default_application_schedule")]
    pub application: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            metrics: default_metrics_schedule(),
            dashboards: default_dashboards_schedule(),
            application: default_application_schedule(),
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_metrics_schedule() -> Option<String> {
    Some("hourly".to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn default_dashboards_schedule() -> Option<String> {
    Some("daily".to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn default_application_schedule() -> Option<String> {
    Some("0 * * * *".to_string())
}

impl ScheduleConfig {
    #[must_use]
    pub fn for_component(&self, component: Component) -> Option<&str> {
        match component {
            Component::Metrics => self.metrics.as_deref(),
            Component::Dashboards => self.dashboards.as_deref(),
            Component::Application => self.application.as_deref(),
        }
    }

    /// Parsed schedule for `component`, if one is configured.
    pub fn parsed(&self, component: Component) -> crate::Result<Option<BackupSchedule>> {
        self.for_component(component)
            .map(BackupSchedule::parse)
            .transpose()
    }
}

/// Live state locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub metrics: MetricsSourceConfig,
    #[serde(default)]
    pub dashboards: DashboardsSourceConfig,
    #[serde(default)]
    pub application: ApplicationSourceConfig,
}

/// Time-series database data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSourceConfig {
    #[serde(default = "default_metrics_dir")]
    pub data_dir: PathBuf,
}

impl Default for MetricsSourceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_metrics_dir(),
        }
    }
}

fn default_metrics_dir() -> PathBuf {
    PathBuf::from("/var/lib/prometheus")
}

/// Dashboard service state: SQLite database plus provisioning files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardsSourceConfig {
    #[serde(default = "default_dashboards_root")]
    pub root: PathBuf,
    #[serde(default = "default_dashboards_db")]
    pub database: String,
    #[serde(default = "default_provisioning")]
    pub provisioning: String,
}

impl Default for DashboardsSourceConfig {
    fn default() -> Self {
        Self {
            root: default_dashboards_root(),
            database: default_dashboards_db(),
            provisioning: default_provisioning(),
        }
    }
}

fn default_dashboards_root() -> PathBuf {
    PathBuf::from("/var/lib/grafana")
}

fn default_dashboards_db() -> String {
    "grafana.db".to_string()
}

fn default_provisioning() -> String {
    "provisioning".to_string()
}

/// Application store: relational database plus vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSourceConfig {
    #[serde(default = "default_application_root")]
    pub root: PathBuf,
    #[serde(default = "default_application_db")]
    pub database: String,
    /// Table whose row count is the record count
    #[serde(default = "default_records_table")]
    pub records_table: String,
    #[serde(default = "default_vector_dir")]
    pub vector_dir: String,
}

impl Default for ApplicationSourceConfig {
    fn default() -> Self {
        Self {
            root: default_application_root(),
            database: default_application_db(),
            records_table: default_records_table(),
            vector_dir: default_vector_dir(),
        }
    }
}

fn default_application_root() -> PathBuf {
    PathBuf::from("/var/lib/journal")
}

fn default_application_db() -> String {
    "app.db".to_string()
}

fn default_records_table() -> String {
    "journal_entries".to_string()
}

fn default_vector_dir() -> String {
    "vectors".to_string()
}

/// Plain SQL identifier: letters, digits and underscores, not starting with a digit.
fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A relative path that stays inside its root.
fn is_contained_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)))
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

impl EngineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for component in Component::ALL {
            self.retention.for_component(component).validate(component)?;
        }
        self.plan()?;

        let sim = &self.simulation;
        if !(sim.time_scale > 0.0 && sim.time_scale <= 1.0) {
            return Err(invalid(format!(
                "simulation.time_scale must be in (0, 1], got {}",
                sim.time_scale
            )));
        }
        if !(0.0..1.0).contains(&sim.tolerance) {
            return Err(invalid(format!(
                "simulation.tolerance must be in [0, 1), got {}",
                sim.tolerance
            )));
        }

        let objectives = &self.objectives;
        if objectives.overall_rto_seconds == 0 || objectives.overall_rpo_seconds == 0 {
            return Err(invalid("objectives: overall RTO and RPO must be positive"));
        }
        for component in Component::ALL {
            if let Some(targets) = objectives.for_component(component) {
                if targets.rto_seconds == Some(0) || targets.rpo_seconds == Some(0) {
                    return Err(invalid(format!(
                        "objectives.{component}: RTO and RPO must be positive"
                    )));
                }
            }
        }

        let recovery = &self.recovery;
        if recovery.readiness_poll_ms == 0 || recovery.infrastructure_poll_ms == 0 {
            return Err(invalid("recovery: poll intervals must be positive"));
        }

        for component in Component::ALL {
            self.schedule.parsed(component).map_err(|e| {
                invalid(format!("schedule.{component}: {e}"))
            })?;
        }

        let app = &self.sources.application;
        if !is_sql_identifier(&app.records_table) {
            return Err(invalid(format!(
                "sources.application.records_table '{}' is not a plain identifier",
                app.records_table
            )));
        }
        let names = [
            ("sources.dashboards.database", &self.sources.dashboards.database),
            ("sources.dashboards.provisioning", &self.sources.dashboards.provisioning),
            ("sources.application.database", &app.database),
            ("sources.application.vector_dir", &app.vector_dir),
        ];
        if let Some((field, value)) = names.iter().find(|(_, v)| !is_contained_name(v)) {
            return Err(invalid(format!(
                "{field} '{value}' must be a relative path inside the source root"
            )));
        }
        Ok(())
    }

    /// The validated restore plan.
    pub fn plan(&self) -> Result<RecoveryPlan, ConfigError> {
        RecoveryPlan::new(
            self.recovery.order.clone(),
            self.recovery.dependencies.clone(),
        )
    }

    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings, ConfigError> {
        Ok(OrchestratorSettings {
            plan: self.plan()?,
            failure_policy: self.recovery.failure_policy,
            objectives: self.objectives.clone(),
            infrastructure_timeout: Duration::from_secs(self.recovery.infrastructure_timeout_secs),
            infrastructure_poll: Duration::from_millis(self.recovery.infrastructure_poll_ms),
            time_scale: self.simulation.time_scale,
            tolerance: self.simulation.tolerance,
        })
    }
}
