//! Structured logging for backstop
//!
//! Library code only emits `tracing` events. The embedding binary calls
//! [`init_logging`] once at startup to install a subscriber.
//!
//! ```ignore
//! use backstop_core::logging::{init_logging, LogConfig, LogFormat};
//!
//! init_logging(&LogConfig {
//!     level: "info".to_string(),
//!     format: LogFormat::Json,
//!     file: Some("/var/log/backstop/drills.log".into()),
//! })?;
//! ```
//!
//! # Correlation Fields
//!
//! Spans and events use these names:
//! - `component`: metrics, dashboards or application
//! - `artifact_id`: artifact name (`{component}_{YYYYMMDD_HHMMSS}`)
//! - `session_id`: recovery session identifier
//! - `phase`: phase name within a session
//! - `elapsed_ms`: phase or operation duration

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io;
#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// `[logging]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `backstop_core=debug`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
    /// Append-only log file kept alongside drill reports.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Open `path` for appending. New files are 0600 and new parent directories 0700.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)
}

fn output_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(writer)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    let configured = EnvFilter::try_new(level).map_err(|e| LogError::InvalidFilter {
        directive: level.to_string(),
        reason: e.to_string(),
    })?;
    Ok(EnvFilter::try_from_default_env().unwrap_or(configured))
}

/// Install the global subscriber: stderr plus the optional log file, both in
/// the configured format.
///
/// A second call returns [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }
    let filter = build_filter(&config.level)?;

    let mut layers: Vec<BoxedLayer> = vec![output_layer(config.format, io::stderr, true)];
    if let Some(path) = &config.file {
        let file = open_log_file(path).map_err(|source| LogError::File {
            path: path.clone(),
            source,
        })?;
        layers.push(output_layer(config.format, file, false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    let _ = LOGGING_INITIALIZED.set(());

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}

/// Create a span carrying the recovery correlation fields.
///
/// ```ignore
/// let span = backstop_core::recovery_span!(
///     "restore",
///     session_id = %session.id(),
///     component = %Component::Metrics,
/// );
/// ```
#[macro_export]
macro_rules! recovery_span {
    ($name:expr $(, $($field:tt)+)?) => {
        tracing::info_span!($name $(, $($field)+)?)
    };
}
