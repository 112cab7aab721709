//! Error types for backstop-core

use std::fmt::Write;
use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::{ArtifactId, Component};

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for backstop-core
#[derive(Error, Debug)]
pub enum Error {
    /// Artifact store adapter errors
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Point-in-time selection errors
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    /// Catalog log errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite errors from dashboard and application snapshots
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Runtime errors (task join failures, channel failures, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Adapter(err) => Some(err.remediation()),
            Self::Selection(err) => Some(err.remediation()),
            Self::Catalog(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and free space, then retry.")
                    .command("Disk usage", "df -h")
                    .alternative("Verify the artifact and quarantine directories are writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("A metadata or session file is not valid JSON.")
                    .command("Validate JSON", "python -m json.tool < file.json")
                    .alternative("Restore the sidecar from the secondary location."),
            ),
            Self::Sqlite(_) => Some(
                Remediation::new("The SQLite store could not be read; check it is not locked or corrupt.")
                    .command("Integrity check", "sqlite3 <db> 'PRAGMA integrity_check;'")
                    .alternative("Restore the store from the most recent verified artifact."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Retry the operation; if it persists, restart the scheduler.")
                    .command("Inspect logs", "RUST_LOG=backstop_core=debug")
                    .alternative("Check for resource exhaustion on the backup host."),
            ),
        }
    }
}

/// Errors raised by artifact store adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The live store could not produce a consistent snapshot.
    #[error("{component} source unavailable: {reason}")]
    SourceUnavailable { component: Component, reason: String },

    /// Copy to the secondary location failed; the primary copy still counts.
    #[error("upload of {artifact} failed: {reason}")]
    UploadFailed { artifact: ArtifactId, reason: String },

    /// Recomputed checksum disagrees with the recorded one.
    #[error("checksum mismatch for {artifact}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        artifact: ArtifactId,
        expected: String,
        actual: String,
    },

    /// Artifact exists but cannot be read or unpacked.
    #[error("artifact {artifact} is corrupt: {reason}")]
    CorruptArtifact { artifact: ArtifactId, reason: String },

    /// Neither the primary nor the secondary copy could be located.
    #[error("artifact {artifact} is not available at any location")]
    ArtifactUnavailable { artifact: ArtifactId },

    /// Another restore for this component is already running.
    #[error("a restore for {0} is already in progress")]
    RestoreInProgress(Component),

    /// Component-specific structural check failed after restore.
    #[error("{component} integrity check failed: {reason}")]
    IntegrityCheckFailed {
        component: Component,
        reason: String,
        quarantine: Option<PathBuf>,
    },

    /// The component did not report readiness within the window.
    #[error("{component} not ready after {waited_secs}s")]
    Timeout {
        component: Component,
        waited_secs: u64,
        quarantine: Option<PathBuf>,
    },

    /// Adapter was asked to act on an artifact of a different component.
    #[error("artifact {artifact} belongs to {actual}, not {expected}")]
    WrongComponent {
        artifact: ArtifactId,
        expected: Component,
        actual: Component,
    },

    /// Simulation mode refuses adapters that would touch live data.
    #[error("{0} adapter touches live data and cannot run in simulation mode")]
    LiveAdapterInSimulation(Component),

    /// Local filesystem failure during packaging or restore.
    #[error("{component} I/O failure: {reason}")]
    Io { component: Component, reason: String },
}

impl AdapterError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. }
                | Self::UploadFailed { .. }
                | Self::RestoreInProgress(_)
                | Self::Io { .. }
        )
    }

    /// Quarantine location preserved by a failed restore, if any.
    #[must_use]
    pub fn quarantine(&self) -> Option<&PathBuf> {
        match self {
            Self::IntegrityCheckFailed { quarantine, .. } | Self::Timeout { quarantine, .. } => {
                quarantine.as_ref()
            }
            _ => None,
        }
    }

    /// Short machine-readable kind used in phase results.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::UploadFailed { .. } => "upload_failed",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::CorruptArtifact { .. } => "corrupt_artifact",
            Self::ArtifactUnavailable { .. } => "artifact_unavailable",
            Self::RestoreInProgress(_) => "restore_in_progress",
            Self::IntegrityCheckFailed { .. } => "integrity_check_failed",
            Self::Timeout { .. } => "timeout",
            Self::WrongComponent { .. } => "wrong_component",
            Self::LiveAdapterInSimulation(_) => "live_adapter_in_simulation",
            Self::Io { .. } => "io",
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::SourceUnavailable { component, .. } => Remediation::new(format!(
                "The {component} store is down or busy; the next scheduled backup will retry."
            ))
            .command("Check health", format!("backstop verify --component {component}"))
            .alternative("Trigger a manual backup once the store is reachable."),
            Self::UploadFailed { .. } => Remediation::new(
                "The primary copy is intact; re-run the upload when remote storage is reachable.",
            )
            .command("Retry upload", "backstop backup --upload-only")
            .alternative("Check remote storage credentials and network reachability."),
            Self::ChecksumMismatch { artifact, .. } | Self::CorruptArtifact { artifact, .. } => {
                Remediation::new(format!(
                    "Artifact {artifact} is corrupt and will never be selected for restore."
                ))
                .command("List artifacts", "backstop list")
                .alternative("Restore from the secondary copy or an adjacent artifact.")
            }
            Self::ArtifactUnavailable { artifact } => {
                Remediation::new(format!("No readable copy of {artifact} was found."))
                    .command("List artifacts", "backstop list")
                    .alternative("Check that the remote prefix is mounted and listable.")
            }
            Self::RestoreInProgress(component) => Remediation::new(format!(
                "Wait for the running {component} restore to finish before starting another."
            ))
            .command("Session status", "backstop verify <session-id>"),
            Self::IntegrityCheckFailed { quarantine, .. } | Self::Timeout { quarantine, .. } => {
                let summary = match quarantine {
                    Some(path) => format!(
                        "Restore aborted; the previous live state is preserved at {}.",
                        path.display()
                    ),
                    None => "Restore aborted; no previous live state existed.".to_string(),
                };
                Remediation::new(summary)
                    .command("Inspect quarantine", "ls -la <quarantine-dir>")
                    .alternative("Move the quarantined directory back to roll back manually.")
            }
            Self::WrongComponent { .. } => {
                Remediation::new("Pass an artifact that belongs to the adapter's component.")
                    .command("List artifacts", "backstop list")
            }
            Self::LiveAdapterInSimulation(_) => {
                Remediation::new("Drills must run against simulated adapters.")
                    .command("Run a drill", "backstop recover --latest --simulate")
            }
            Self::Io { .. } => {
                Remediation::new("Check filesystem permissions and free space, then retry.")
                    .command("Disk usage", "df -h")
            }
        }
    }
}

/// Why a component has no selectable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoArtifactReason {
    /// The catalog holds no artifacts at all.
    EmptyCatalog,
    /// Every artifact in the catalog is flagged corrupt.
    AllCorrupt,
}

/// Point-in-time selection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no artifact available for {component} ({reason:?})")]
    NoArtifactAvailable {
        component: Component,
        reason: NoArtifactReason,
    },

    #[error("selection incomplete; missing components: {missing:?}")]
    Incomplete { missing: Vec<Component> },
}

impl SelectionError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NoArtifactAvailable { component, .. } => Remediation::new(format!(
                "No restorable {component} artifact exists; recover the others explicitly degraded or abort."
            ))
            .command("List artifacts", format!("backstop list {component}"))
            .alternative("Set recovery.missing_artifacts = \"degraded\" to accept a partial recovery."),
            Self::Incomplete { .. } => {
                Remediation::new("Some components have no restorable artifact.")
                    .command("Degraded recovery", "backstop recover --latest --allow-degraded")
                    .alternative("Restore missing artifacts from off-site copies first.")
            }
        }
    }
}

/// Catalog log errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode catalog event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("artifact already registered: {0}")]
    Duplicate(ArtifactId),

    #[error("artifact not in catalog: {0}")]
    Unknown(ArtifactId),

    #[error("catalog for {expected} cannot hold {actual} artifacts")]
    ComponentMismatch {
        expected: Component,
        actual: Component,
    },
}

impl CatalogError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Io(_) => Remediation::new("The catalog log could not be read or appended.")
                .command("Check log", "ls -l <catalog-dir>")
                .alternative("Rebuild the catalog from artifact sidecars with a reconcile."),
            Self::Encode(_) => Remediation::new("A catalog event could not be encoded.")
                .command("Inspect logs", "RUST_LOG=backstop_core=debug"),
            Self::Duplicate(_) => Remediation::new("The artifact is already tracked; nothing to do.")
                .command("List artifacts", "backstop list"),
            Self::Unknown(_) => Remediation::new("Reconcile the catalog against the artifact store.")
                .command("List artifacts", "backstop list"),
            Self::ComponentMismatch { .. } => {
                Remediation::new("Register artifacts only with their own component's catalog.")
                    .command("List artifacts", "backstop list")
            }
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseError(_) => Remediation::new("Config parse failed. Fix the syntax and retry.")
                .command("Validate TOML", "taplo check backstop.toml")
                .alternative("Compare against the documented configuration sections."),
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Validate TOML", "taplo check backstop.toml")
                    .alternative("Retention counts, recovery order and objectives are checked at startup.")
            }
        }
    }
}

/// Report validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportValidationError {
    #[error(
        "simulated session ran {wall_ms} ms, below the compressed minimum of {expected_ms} ms"
    )]
    CompressedTimeTooShort { wall_ms: u64, expected_ms: u64 },

    #[error("simulated phase {phase} has no simulated duration override")]
    MissingSimulatedDuration { phase: String },

    #[error("session {0} is not finalized")]
    NotFinalized(String),
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_available_for_error_variants() {
        let json_err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        let id = ArtifactId::new("metrics_20260101_000000");
        let errors = vec![
            Error::Adapter(AdapterError::SourceUnavailable {
                component: Component::Metrics,
                reason: "down".to_string(),
            }),
            Error::Adapter(AdapterError::UploadFailed {
                artifact: id.clone(),
                reason: "remote".to_string(),
            }),
            Error::Adapter(AdapterError::ChecksumMismatch {
                artifact: id.clone(),
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            }),
            Error::Adapter(AdapterError::ArtifactUnavailable {
                artifact: id.clone(),
            }),
            Error::Adapter(AdapterError::RestoreInProgress(Component::Dashboards)),
            Error::Adapter(AdapterError::Timeout {
                component: Component::Application,
                waited_secs: 30,
                quarantine: Some(PathBuf::from("/q/application")),
            }),
            Error::Selection(SelectionError::NoArtifactAvailable {
                component: Component::Metrics,
                reason: NoArtifactReason::AllCorrupt,
            }),
            Error::Catalog(CatalogError::Duplicate(id)),
            Error::Config(ConfigError::ValidationError("bad".to_string())),
            Error::Io(std::io::Error::other("io")),
            Error::Json(json_err),
            Error::Sqlite(rusqlite::Error::InvalidQuery),
            Error::Runtime("join".to_string()),
        ];

        for error in errors {
            let remediation = error.remediation().expect("missing remediation");
            assert!(
                !remediation.summary.is_empty(),
                "remediation summary empty for {error:?}"
            );
            assert!(
                !remediation.commands.is_empty(),
                "remediation commands empty for {error:?}"
            );
        }
    }

    #[test]
    fn render_plain_omits_empty_sections() {
        let r = Remediation::new("Fix it");
        let output = r.render_plain();
        assert!(output.contains("Fix it"));
        assert!(!output.contains("Commands:"));
        assert!(!output.contains("Alternatives:"));
    }

    #[test]
    fn render_plain_includes_commands_and_alternatives() {
        let r = Remediation::new("Fix it")
            .command("Diagnose", "backstop list")
            .alternative("Try plan B");
        let output = r.render_plain();
        assert!(output.contains("Diagnose: backstop list"));
        assert!(output.contains("Try plan B"));
    }

    #[test]
    fn timeout_remediation_names_quarantine() {
        let err = AdapterError::Timeout {
            component: Component::Metrics,
            waited_secs: 5,
            quarantine: Some(PathBuf::from("/srv/quarantine/metrics_x")),
        };
        assert!(err.remediation().summary.contains("/srv/quarantine/metrics_x"));
        assert_eq!(
            err.quarantine(),
            Some(&PathBuf::from("/srv/quarantine/metrics_x"))
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(
            AdapterError::SourceUnavailable {
                component: Component::Metrics,
                reason: String::new(),
            }
            .is_retryable()
        );
        assert!(
            !AdapterError::ChecksumMismatch {
                artifact: ArtifactId::new("x"),
                expected: String::new(),
                actual: String::new(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn format_error_includes_remediation() {
        let err = Error::Adapter(AdapterError::RestoreInProgress(Component::Metrics));
        let text = format_error_with_remediation(&err);
        assert!(text.starts_with("Error: Adapter error"));
        assert!(text.contains("To fix:"));
    }
}
