//! Backup artifacts: components, retention tiers, naming and metadata sidecars.
//!
//! An artifact is named `{component}_{YYYYMMDD_HHMMSS}` from its UTC creation
//! instant, with a `_NN` suffix when two artifacts of a component share a
//! second. The name is the artifact id; filesystem mtimes are never consulted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Timelike,
    Utc,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Component-specific counts captured at snapshot time.
pub type ArtifactFacts = BTreeMap<String, u64>;

/// Compact timestamp layout embedded in artifact names.
pub const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Archive extension for packaged artifacts.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// The independently backed-up subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Metrics,
    Dashboards,
    Application,
}

impl Component {
    pub const ALL: [Self; 3] = [Self::Metrics, Self::Dashboards, Self::Application];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Dashboards => "dashboards",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = ArtifactNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metrics" => Ok(Self::Metrics),
            "dashboards" => Ok(Self::Dashboards),
            "application" => Ok(Self::Application),
            other => Err(ArtifactNameError::UnknownComponent(other.to_string())),
        }
    }
}

/// Retention tiers, ordered finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTier {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RetentionTier {
    pub const ALL: [Self; 5] = [
        Self::Hourly,
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Yearly,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// The next less frequent tier, if any.
    #[must_use]
    pub const fn coarser(self) -> Option<Self> {
        match self {
            Self::Hourly => Some(Self::Daily),
            Self::Daily => Some(Self::Weekly),
            Self::Weekly => Some(Self::Monthly),
            Self::Monthly => Some(Self::Yearly),
            Self::Yearly => None,
        }
    }

    /// Nominal cadence period. Months count as 30 days, years as 365.
    #[must_use]
    pub fn cadence(self) -> ChronoDuration {
        match self {
            Self::Hourly => ChronoDuration::hours(1),
            Self::Daily => ChronoDuration::days(1),
            Self::Weekly => ChronoDuration::days(7),
            Self::Monthly => ChronoDuration::days(30),
            Self::Yearly => ChronoDuration::days(365),
        }
    }

    /// Latest boundary instant of this tier at or before `ts`.
    ///
    /// Boundaries are top of hour, midnight, Monday 00:00, the first of the
    /// month and 1 January, all in UTC.
    #[must_use]
    pub fn boundary_floor(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let floor = match self {
            Self::Hourly => date.and_hms_opt(ts.hour(), 0, 0),
            Self::Daily => date.and_hms_opt(0, 0, 0),
            Self::Weekly => {
                let back = i64::from(date.weekday().num_days_from_monday());
                (date - ChronoDuration::days(back)).and_hms_opt(0, 0, 0)
            }
            Self::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Self::Yearly => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
        };
        floor.map_or(ts, |naive| Utc.from_utc_datetime(&naive))
    }

    /// First boundary strictly after the boundary `floor`.
    #[must_use]
    pub fn next_boundary(self, floor: DateTime<Utc>) -> DateTime<Utc> {
        let date = floor.date_naive();
        let next = match self {
            Self::Hourly => return floor + ChronoDuration::hours(1),
            Self::Daily => return floor + ChronoDuration::days(1),
            Self::Weekly => return floor + ChronoDuration::days(7),
            Self::Monthly => {
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
            }
            Self::Yearly => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
        };
        next.and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(floor + self.cadence(), |naive| Utc.from_utc_datetime(&naive))
    }

    /// Boundary instant closest to `ts`; an exact midpoint goes to the earlier one.
    #[must_use]
    pub fn nearest_boundary(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.boundary_floor(ts);
        let next = self.next_boundary(floor);
        if next - ts < ts - floor { next } else { floor }
    }
}

impl fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown retention tier: {s}"))
    }
}

/// Artifact identifier; equal to the artifact name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors parsing artifact names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactNameError {
    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    #[error("malformed artifact name '{0}'")]
    Malformed(String),

    #[error("invalid timestamp in artifact name '{0}'")]
    InvalidTimestamp(String),
}

/// Parsed components of an artifact name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifactName {
    pub component: Component,
    pub created_at: DateTime<Utc>,
    pub collision_suffix: Option<u32>,
}

/// Base artifact name for a component and creation instant (second precision).
#[must_use]
pub fn artifact_name(component: Component, created_at: DateTime<Utc>) -> String {
    format!("{component}_{}", created_at.format(NAME_TIMESTAMP_FORMAT))
}

/// Artifact name with a collision suffix appended when `taken` reports a clash.
#[must_use]
pub fn unique_artifact_name(
    component: Component,
    created_at: DateTime<Utc>,
    taken: impl Fn(&str) -> bool,
) -> String {
    let base = artifact_name(component, created_at);
    if !taken(&base) {
        return base;
    }
    let mut idx = 1u32;
    loop {
        let candidate = format!("{base}_{idx:02}");
        if !taken(&candidate) {
            return candidate;
        }
        idx += 1;
    }
}

/// Parse `{component}_{YYYYMMDD_HHMMSS}[_NN][.tar.gz]`.
pub fn parse_artifact_name(raw: &str) -> Result<ParsedArtifactName, ArtifactNameError> {
    let name = raw.strip_suffix(".tar.gz").unwrap_or(raw);
    let mut parts = name.split('_');
    let (Some(component), Some(date), Some(time)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ArtifactNameError::Malformed(raw.to_string()));
    };
    let suffix = parts.next();
    if parts.next().is_some() {
        return Err(ArtifactNameError::Malformed(raw.to_string()));
    }

    let component: Component = component.parse()?;
    if date.len() != 8 || time.len() != 6 {
        return Err(ArtifactNameError::InvalidTimestamp(raw.to_string()));
    }
    let naive = NaiveDateTime::parse_from_str(&format!("{date}_{time}"), NAME_TIMESTAMP_FORMAT)
        .map_err(|_| ArtifactNameError::InvalidTimestamp(raw.to_string()))?;

    let collision_suffix = match suffix {
        None => None,
        Some(s) if s.len() >= 2 && s.bytes().all(|b| b.is_ascii_digit()) => {
            Some(s.parse().map_err(|_| ArtifactNameError::Malformed(raw.to_string()))?)
        }
        Some(_) => return Err(ArtifactNameError::Malformed(raw.to_string())),
    };

    Ok(ParsedArtifactName {
        component,
        created_at: Utc.from_utc_datetime(&naive),
        collision_suffix,
    })
}

/// An immutable unit produced by one component at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub id: ArtifactId,
    pub component: Component,
    pub created_at: DateTime<Utc>,
    /// Local archive path, when a primary copy exists.
    pub location_primary: Option<String>,
    /// Remote object key, when a secondary copy exists.
    pub location_secondary: Option<String>,
    pub size_bytes: u64,
    /// SHA-256 hex of the packaged archive.
    pub checksum: String,
    pub retention_tier: RetentionTier,
    #[serde(default)]
    pub facts: ArtifactFacts,
}

impl BackupArtifact {
    /// Archive file name, `{id}.tar.gz`.
    #[must_use]
    pub fn archive_file_name(&self) -> String {
        archive_file_name(&self.id)
    }

    #[must_use]
    pub fn metadata_file_name(&self) -> String {
        metadata_file_name(&self.id)
    }

    #[must_use]
    pub fn checksum_file_name(&self) -> String {
        checksum_file_name(&self.id)
    }

    /// Absolute distance of the creation instant from `target`.
    #[must_use]
    pub fn distance_from(&self, target: DateTime<Utc>) -> ChronoDuration {
        (self.created_at - target).abs()
    }

    #[must_use]
    pub fn fact(&self, key: &str) -> Option<u64> {
        self.facts.get(key).copied()
    }
}

#[must_use]
pub fn archive_file_name(id: &ArtifactId) -> String {
    format!("{id}.{ARCHIVE_EXTENSION}")
}

#[must_use]
pub fn metadata_file_name(id: &ArtifactId) -> String {
    format!("{id}.metadata.json")
}

#[must_use]
pub fn checksum_file_name(id: &ArtifactId) -> String {
    format!("{id}.{ARCHIVE_EXTENSION}.sha256")
}

/// Contents of the `{name}.metadata.json` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub backup_name: String,
    /// `YYYYMMDD_HHMMSS`
    pub timestamp: String,
    pub component: Component,
    /// Component-specific source paths captured in the archive.
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
    /// ISO-8601 creation instant.
    pub created_at: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub retention_tier: RetentionTier,
    #[serde(default)]
    pub facts: ArtifactFacts,
    #[serde(default)]
    pub engine_version: String,
}

impl ArtifactMetadata {
    #[must_use]
    pub fn from_artifact(artifact: &BackupArtifact, paths: BTreeMap<String, String>) -> Self {
        Self {
            backup_name: artifact.id.to_string(),
            timestamp: artifact.created_at.format(NAME_TIMESTAMP_FORMAT).to_string(),
            component: artifact.component,
            paths,
            created_at: artifact.created_at.to_rfc3339(),
            checksum: artifact.checksum.clone(),
            size_bytes: artifact.size_bytes,
            retention_tier: artifact.retention_tier,
            facts: artifact.facts.clone(),
            engine_version: crate::VERSION.to_string(),
        }
    }

    /// Rebuild the artifact record this sidecar describes.
    ///
    /// `created_at` comes from the sidecar, falling back to the name.
    pub fn into_artifact(
        self,
        location_primary: Option<String>,
        location_secondary: Option<String>,
    ) -> Result<BackupArtifact, ArtifactNameError> {
        let parsed = parse_artifact_name(&self.backup_name)?;
        if parsed.component != self.component {
            return Err(ArtifactNameError::Malformed(self.backup_name));
        }
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(parsed.created_at);
        Ok(BackupArtifact {
            id: ArtifactId::new(self.backup_name),
            component: self.component,
            created_at,
            location_primary,
            location_secondary,
            size_bytes: self.size_bytes,
            checksum: self.checksum,
            retention_tier: self.retention_tier,
            facts: self.facts,
        })
    }
}
