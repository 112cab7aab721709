//! Periodic backups.
//!
//! Each component gets its own tokio task driven by a [`BackupSchedule`].
//! Tasks share no mutable state beyond the catalog they own and stop when
//! their cancellation token fires. Schedules are evaluated in UTC.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc, Weekday};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::adapter::ArtifactAdapter;
use crate::artifact::{Component, RetentionTier};
use crate::backup::{BackupContext, BackupOutcome, run_backup};
use crate::catalog::Catalog;
use crate::error::ConfigError;
use crate::retention::{ArtifactRemover, RetentionEngine, RetentionPolicy};
use crate::{Error, Result};

/// Parsed backup schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupSchedule {
    /// Every hour at the given minute (default: minute 0).
    Hourly { minute: u32 },
    /// Daily at the given hour/minute (default: 03:00).
    Daily { hour: u32, minute: u32 },
    /// Weekly on the given weekday at hour/minute (default: Sunday 03:00).
    Weekly {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
    /// 5-field cron; each field is `*` or a single number.
    Cron(CronSchedule),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: Option<u32>,
    hour: Option<u32>,
    day_of_month: Option<u32>,
    month: Option<u32>,
    day_of_week: Option<u32>,
    raw: String,
}

fn parse_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError::ParseError(message.into()))
}

impl BackupSchedule {
    /// Parse "hourly", "daily", "weekly", or "m h dom mon dow".
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("hourly") {
            return Ok(Self::Hourly { minute: 0 });
        }
        if trimmed.eq_ignore_ascii_case("daily") {
            return Ok(Self::Daily { hour: 3, minute: 0 });
        }
        if trimmed.eq_ignore_ascii_case("weekly") {
            return Ok(Self::Weekly {
                weekday: Weekday::Sun,
                hour: 3,
                minute: 0,
            });
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = parts.as_slice() else {
            return Err(parse_error(
                "backup schedule must be 'hourly', 'daily', 'weekly', or 5-field cron",
            ));
        };

        Ok(Self::Cron(CronSchedule {
            minute: parse_cron_field(minute, 0, 59)?,
            hour: parse_cron_field(hour, 0, 23)?,
            day_of_month: parse_cron_field(dom, 1, 31)?,
            month: parse_cron_field(month, 1, 12)?,
            day_of_week: parse_cron_field(dow, 0, 7)?,
            raw: trimmed.to_string(),
        }))
    }

    #[must_use]
    pub fn display_label(&self) -> String {
        match self {
            Self::Hourly { .. } => "hourly".to_string(),
            Self::Daily { .. } => "daily".to_string(),
            Self::Weekly { .. } => "weekly".to_string(),
            Self::Cron(cron) => format!("cron: {}", cron.raw),
        }
    }

    /// Tier assigned to artifacts this schedule produces.
    ///
    /// Cron schedules map to the coarsest field they pin.
    #[must_use]
    pub fn cadence(&self) -> RetentionTier {
        match self {
            Self::Hourly { .. } => RetentionTier::Hourly,
            Self::Daily { .. } => RetentionTier::Daily,
            Self::Weekly { .. } => RetentionTier::Weekly,
            Self::Cron(cron) => match cron {
                CronSchedule {
                    month: Some(_),
                    day_of_month: Some(_),
                    ..
                } => RetentionTier::Yearly,
                CronSchedule {
                    day_of_month: Some(_),
                    ..
                } => RetentionTier::Monthly,
                CronSchedule {
                    day_of_week: Some(_),
                    ..
                } => RetentionTier::Weekly,
                CronSchedule { hour: Some(_), .. } => RetentionTier::Daily,
                _ => RetentionTier::Hourly,
            },
        }
    }

    /// Next run strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Self::Hourly { minute } => next_hourly(now, *minute),
            Self::Daily { hour, minute } => next_daily(now, *hour, *minute),
            Self::Weekly {
                weekday,
                hour,
                minute,
            } => next_weekly(now, *weekday, *hour, *minute),
            Self::Cron(cron) => next_cron(now, cron),
        }
    }
}

fn parse_cron_field(raw: &str, min: u32, max: u32) -> Result<Option<u32>> {
    if raw == "*" {
        return Ok(None);
    }
    let value: u32 = raw
        .parse()
        .map_err(|_| parse_error(format!("invalid cron field '{raw}'")))?;
    if value < min || value > max {
        return Err(parse_error(format!(
            "cron field '{raw}' out of range ({min}-{max})"
        )));
    }
    Ok(Some(value))
}

fn at_time(day: DateTime<Utc>, hour: u32, minute: u32) -> Result<DateTime<Utc>> {
    day.date_naive()
        .and_hms_opt(hour, minute, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| parse_error(format!("invalid schedule time {hour:02}:{minute:02}")))
}

fn next_hourly(now: DateTime<Utc>, minute: u32) -> Result<DateTime<Utc>> {
    let mut candidate = at_time(now, now.hour(), minute)?;
    if candidate <= now {
        candidate += ChronoDuration::hours(1);
    }
    Ok(candidate)
}

fn next_daily(now: DateTime<Utc>, hour: u32, minute: u32) -> Result<DateTime<Utc>> {
    let candidate = at_time(now, hour, minute)?;
    if candidate > now {
        return Ok(candidate);
    }
    Ok(candidate + ChronoDuration::days(1))
}

fn next_weekly(now: DateTime<Utc>, weekday: Weekday, hour: u32, minute: u32) -> Result<DateTime<Utc>> {
    let now_weekday = i64::from(now.weekday().number_from_monday());
    let target_weekday = i64::from(weekday.number_from_monday());
    let days_ahead = (target_weekday - now_weekday).rem_euclid(7);

    let candidate = at_time(now, hour, minute)? + ChronoDuration::days(days_ahead);
    if candidate <= now {
        return Ok(candidate + ChronoDuration::days(7));
    }
    Ok(candidate)
}

fn next_cron(now: DateTime<Utc>, cron: &CronSchedule) -> Result<DateTime<Utc>> {
    let start = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .ok_or_else(|| Error::Runtime("failed to truncate schedule time".to_string()))?;
    // Scan forward minute-by-minute up to 366 days.
    let max_minutes = 366_i64 * 24 * 60;
    (1..=max_minutes)
        .map(|offset| start + ChronoDuration::minutes(offset))
        .find(|candidate| cron_matches(*candidate, cron))
        .ok_or_else(|| Error::Runtime(format!("no run of '{}' within 366 days", cron.raw)))
}

fn cron_matches(candidate: DateTime<Utc>, cron: &CronSchedule) -> bool {
    if cron.minute.is_some_and(|m| candidate.minute() != m)
        || cron.hour.is_some_and(|h| candidate.hour() != h)
        || cron.month.is_some_and(|m| candidate.month() != m)
    {
        return false;
    }

    let day_of_month_matches = cron.day_of_month.is_none_or(|dom| candidate.day() == dom);
    let day_of_week_matches = cron.day_of_week.is_none_or(|dow| {
        let normalized = if dow == 7 { 0 } else { dow };
        candidate.weekday().num_days_from_sunday() == normalized
    });

    // Standard cron: when both day fields are restricted, either may match.
    match (cron.day_of_month, cron.day_of_week) {
        (Some(_), Some(_)) => day_of_month_matches || day_of_week_matches,
        _ => day_of_month_matches && day_of_week_matches,
    }
}

/// Owned handles a backup task needs.
pub struct BackupJob {
    pub schedule: BackupSchedule,
    pub adapter: Arc<dyn ArtifactAdapter>,
    pub catalog: Arc<Catalog>,
    pub retention: Arc<RetentionEngine>,
    pub policy: RetentionPolicy,
    pub remover: Arc<dyn ArtifactRemover>,
}

impl BackupJob {
    #[must_use]
    pub fn component(&self) -> Component {
        self.adapter.component()
    }

    /// Run one cycle now, at the schedule's cadence.
    pub async fn run_once(&self) -> Result<BackupOutcome> {
        let ctx = BackupContext {
            adapter: self.adapter.as_ref(),
            catalog: &self.catalog,
            retention: &self.retention,
            policy: &self.policy,
            remover: self.remover.as_ref(),
        };
        run_backup(&ctx, self.schedule.cadence()).await
    }

    /// Run on schedule until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let component = self.component();
            info!(component = %component, schedule = %self.schedule.display_label(), "Backup task started");
            loop {
                let now = Utc::now();
                let next = match self.schedule.next_after(now) {
                    Ok(next) => next,
                    Err(e) => {
                        error!(component = %component, error = %e, "Schedule has no next run");
                        break;
                    }
                };
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(component = %component, next = %next, "Next backup scheduled");

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(wait) => {}
                }

                // A started cycle runs to completion; cancellation applies between cycles.
                if let Err(e) = self.run_once().await {
                    error!(component = %component, error = %e, "Scheduled backup failed");
                }
            }
            info!(component = %component, "Backup task stopped");
        })
    }
}

/// Spawn one task per job.
#[must_use]
pub fn spawn_all(jobs: Vec<BackupJob>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    jobs.into_iter()
        .map(|job| job.spawn(cancel.child_token()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::simulated::SimulatedAdapter;
    use crate::artifact::BackupArtifact;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_named_schedules() {
        assert!(matches!(
            BackupSchedule::parse("hourly").unwrap(),
            BackupSchedule::Hourly { minute: 0 }
        ));
        assert!(matches!(
            BackupSchedule::parse("DAILY").unwrap(),
            BackupSchedule::Daily { hour: 3, minute: 0 }
        ));
        assert!(matches!(
            BackupSchedule::parse(" weekly ").unwrap(),
            BackupSchedule::Weekly { .. }
        ));
        assert!(matches!(
            BackupSchedule::parse("15 3 * * *").unwrap(),
            BackupSchedule::Cron(_)
        ));
    }

    #[test]
    fn rejects_bad_schedules() {
        assert!(BackupSchedule::parse("fortnightly").is_err());
        assert!(BackupSchedule::parse("* * * *").is_err());
        assert!(BackupSchedule::parse("60 * * * *").is_err());
        assert!(BackupSchedule::parse("0 24 * * *").is_err());
        assert!(BackupSchedule::parse("0 0 0 * *").is_err());
        assert!(BackupSchedule::parse("*/5 * * * *").is_err());
    }

    #[test]
    fn parse_cron_field_bounds() {
        assert_eq!(parse_cron_field("*", 0, 59).unwrap(), None);
        assert_eq!(parse_cron_field("0", 0, 59).unwrap(), Some(0));
        assert_eq!(parse_cron_field("59", 0, 59).unwrap(), Some(59));
        assert!(parse_cron_field("60", 0, 59).is_err());
        assert!(parse_cron_field("abc", 0, 59).is_err());
    }

    #[test]
    fn next_hourly_is_strictly_after() {
        let schedule = BackupSchedule::parse("hourly").unwrap();
        assert_eq!(
            schedule.next_after(at(2026, 5, 1, 10, 30, 0)).unwrap(),
            at(2026, 5, 1, 11, 0, 0)
        );
        assert_eq!(
            schedule.next_after(at(2026, 5, 1, 11, 0, 0)).unwrap(),
            at(2026, 5, 1, 12, 0, 0)
        );
    }

    #[test]
    fn next_daily_rolls_to_tomorrow() {
        let schedule = BackupSchedule::parse("daily").unwrap();
        assert_eq!(
            schedule.next_after(at(2026, 5, 1, 2, 0, 0)).unwrap(),
            at(2026, 5, 1, 3, 0, 0)
        );
        assert_eq!(
            schedule.next_after(at(2026, 5, 1, 3, 0, 0)).unwrap(),
            at(2026, 5, 2, 3, 0, 0)
        );
    }

    #[test]
    fn next_weekly_lands_on_sunday() {
        // 2026-05-01 is a Friday.
        let schedule = BackupSchedule::parse("weekly").unwrap();
        let next = schedule.next_after(at(2026, 5, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 5, 3, 3, 0, 0));
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(schedule.next_after(next).unwrap(), at(2026, 5, 10, 3, 0, 0));
    }

    #[test]
    fn next_cron_matches_fields() {
        let schedule = BackupSchedule::parse("30 2 * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2026, 5, 1, 2, 30, 15)).unwrap(),
            at(2026, 5, 2, 2, 30, 0)
        );
        let schedule = BackupSchedule::parse("0 0 1 * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2026, 5, 1, 0, 0, 0)).unwrap(),
            at(2026, 6, 1, 0, 0, 0)
        );
    }

    #[test]
    fn cron_day_fields_match_either() {
        // Day 15 or any Monday; 2026-05-04 is a Monday.
        let schedule = BackupSchedule::parse("0 0 15 * 1").unwrap();
        assert_eq!(
            schedule.next_after(at(2026, 5, 1, 12, 0, 0)).unwrap(),
            at(2026, 5, 4, 0, 0, 0)
        );
    }

    #[test]
    fn cadence_follows_schedule() {
        let cadence = |raw: &str| BackupSchedule::parse(raw).unwrap().cadence();
        assert_eq!(cadence("hourly"), RetentionTier::Hourly);
        assert_eq!(cadence("0 * * * *"), RetentionTier::Hourly);
        assert_eq!(cadence("0 3 * * *"), RetentionTier::Daily);
        assert_eq!(cadence("0 3 * * 0"), RetentionTier::Weekly);
        assert_eq!(cadence("0 3 1 * *"), RetentionTier::Monthly);
        assert_eq!(cadence("0 3 1 1 *"), RetentionTier::Yearly);
    }

    fn job(component: Component) -> (BackupJob, Arc<Catalog>) {
        let catalog = Arc::new(Catalog::in_memory(component));
        let remover: Arc<dyn ArtifactRemover> =
            Arc::new(|_: &BackupArtifact| -> std::result::Result<(), String> { Ok(()) });
        let job = BackupJob {
            schedule: BackupSchedule::parse("hourly").unwrap(),
            adapter: Arc::new(SimulatedAdapter::new(component, Duration::ZERO)),
            catalog: Arc::clone(&catalog),
            retention: Arc::new(RetentionEngine::new()),
            policy: RetentionPolicy::standard(),
            remover,
        };
        (job, catalog)
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_backs_up_until_cancelled() {
        let (job, catalog) = job(Component::Metrics);
        let cancel = CancellationToken::new();
        let handle = job.spawn(cancel.clone());

        while catalog.snapshot().is_empty() {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(catalog.snapshot().latest().unwrap().retention_tier, RetentionTier::Hourly);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_run_takes_no_backup() {
        let (job, catalog) = job(Component::Dashboards);
        let cancel = CancellationToken::new();
        cancel.cancel();
        spawn_all(vec![job], &cancel)
            .pop()
            .unwrap()
            .await
            .unwrap();
        assert!(catalog.snapshot().is_empty());
    }
}
