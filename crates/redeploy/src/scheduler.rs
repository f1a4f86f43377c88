//! Staggered scheduling of bulk actions
//!
//! A schedule request is expanded into one task per resolved service. Task
//! `i` fires at `base + i * interval`, in resolver output order. The
//! scheduler never runs anything itself.

use crate::error::{Error, Result};
use crate::target::Targets;
use crate::types::{ActionKind, CommitFlags, Keypath, ScheduledTask};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Default spacing between consecutive tasks
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

static ISO_DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("static regex"));
static OFFSET_HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)h").expect("static regex"));
static OFFSET_MINUTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)m").expect("static regex"));

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// When the first task of a schedule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleTime {
    /// Absolute time
    At(DateTime<Utc>),
    /// Offset from now
    In(TimeDelta),
}

impl Default for ScheduleTime {
    /// One minute from now
    fn default() -> Self {
        Self::In(TimeDelta::minutes(1))
    }
}

impl ScheduleTime {
    /// Parse an ISO date-time (`2024-05-06T22:00:00`, offset optional,
    /// read as UTC when absent) or an `Hh Mm` offset such as `6h15m`.
    ///
    /// The offset form needs both components, `0h05m` rather than `5m`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if ISO_DATE_PREFIX.is_match(input) {
            return parse_absolute(input).map(Self::At);
        }

        let hours = capture_number(&OFFSET_HOURS, input)
            .ok_or_else(|| Error::invalid_schedule(input, "missing hours, expected e.g. 6h15m"))?;
        let minutes = capture_number(&OFFSET_MINUTES, input).ok_or_else(|| {
            Error::invalid_schedule(input, "missing minutes, give them even if 00")
        })?;

        let offset = TimeDelta::try_hours(hours)
            .zip(TimeDelta::try_minutes(minutes))
            .and_then(|(h, m)| h.checked_add(&m))
            .ok_or_else(|| Error::invalid_schedule(input, "offset out of range"))?;
        Ok(Self::In(offset))
    }

    /// Base time relative to `now`, or None when it is not representable
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::At(at) => Some(*at),
            Self::In(offset) => now.checked_add_signed(*offset),
        }
    }
}

fn capture_number(re: &Regex, input: &str) -> Option<i64> {
    re.captures(input)?.get(1)?.as_str().parse().ok()
}

fn parse_absolute(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(Error::invalid_schedule(input, "not an ISO date-time"))
}

/// Bulk action to schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub action: ActionKind,
    pub targets: Targets,
    /// `reconcile` is derived from `action` and ignored here
    pub commit_flags: CommitFlags,
    pub interval_secs: u64,
    pub schedule: ScheduleTime,
}

impl ScheduleRequest {
    pub fn new(action: ActionKind, targets: Targets) -> Self {
        Self {
            action,
            targets,
            commit_flags: CommitFlags::dry_run(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            schedule: ScheduleTime::default(),
        }
    }

    /// Flags every task carries
    pub fn task_flags(&self) -> CommitFlags {
        CommitFlags {
            reconcile: self.action.is_reconcile(),
            ..self.commit_flags
        }
    }
}

/// Name of the task for one action on one service
pub fn task_name(action: ActionKind, keypath: &str) -> String {
    format!("bulk-service-action-scheduler_{action}_{keypath}")
}

/// Fail with [`Error::ScheduleInPast`] when the base time precedes `now`
pub fn check_not_past(schedule: &ScheduleTime, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let base = schedule
        .resolve(now)
        .ok_or_else(|| Error::invalid_schedule(&describe(schedule), "schedule out of range"))?;
    if base < now {
        return Err(Error::ScheduleInPast {
            requested: base.to_rfc3339(),
            now: now.to_rfc3339(),
        });
    }
    Ok(base)
}

fn describe(schedule: &ScheduleTime) -> String {
    match schedule {
        ScheduleTime::At(at) => at.to_rfc3339(),
        ScheduleTime::In(offset) => {
            format!("{}h{:02}m", offset.num_hours(), offset.num_minutes() % 60)
        }
    }
}

/// Expand a request over resolved keypaths into time-ordered tasks.
pub fn plan_tasks(
    request: &ScheduleRequest,
    keypaths: &BTreeSet<Keypath>,
    now: DateTime<Utc>,
) -> Result<Vec<ScheduledTask>> {
    let base = check_not_past(&request.schedule, now)?;
    let interval = i64::try_from(request.interval_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| {
            Error::invalid_schedule(&request.interval_secs.to_string(), "interval too large")
        })?;
    let flags = request.task_flags();

    let mut tasks = Vec::with_capacity(keypaths.len());
    for (position, keypath) in keypaths.iter().enumerate() {
        let fire_at = i32::try_from(position)
            .ok()
            .and_then(|i| interval.checked_mul(i))
            .and_then(|offset| base.checked_add_signed(offset))
            .ok_or_else(|| {
                Error::invalid_schedule(&request.interval_secs.to_string(), "schedule out of range")
            })?;
        tasks.push(ScheduledTask {
            name: task_name(request.action, keypath),
            action: request.action,
            target: keypath.clone(),
            commit_flags: flags,
            fire_at,
        });
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
    }

    fn keys(items: &[&str]) -> BTreeSet<Keypath> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_relative_offset() {
        assert_eq!(
            ScheduleTime::parse("6h15m").unwrap(),
            ScheduleTime::In(TimeDelta::minutes(6 * 60 + 15))
        );
        assert_eq!(
            ScheduleTime::parse("00h01m").unwrap(),
            ScheduleTime::In(TimeDelta::minutes(1))
        );
    }

    #[test]
    fn test_parse_relative_requires_both_components() {
        assert!(matches!(
            ScheduleTime::parse("6h"),
            Err(Error::InvalidSchedule { .. })
        ));
        assert!(matches!(
            ScheduleTime::parse("15m"),
            Err(Error::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_parse_absolute_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 6, 22, 30, 0).unwrap();
        assert_eq!(
            ScheduleTime::parse("2024-05-06T22:30:00").unwrap(),
            ScheduleTime::At(expected)
        );
        assert_eq!(
            ScheduleTime::parse("2024-05-06T23:30:00+01:00").unwrap(),
            ScheduleTime::At(expected)
        );
        assert_eq!(
            ScheduleTime::parse("2024-05-07").unwrap(),
            ScheduleTime::At(Utc.with_ymd_and_hms(2024, 5, 7, 0, 0, 0).unwrap())
        );
        assert!(ScheduleTime::parse("2024-05-06Tlater").is_err());
    }

    #[test]
    fn test_tasks_staggered_in_resolver_order() {
        let mut request = ScheduleRequest::new(ActionKind::RedeployTopLevel, Targets::all());
        request.schedule = ScheduleTime::In(TimeDelta::zero());
        let tasks = plan_tasks(&request, &keys(&["/s{c}", "/s{a}", "/s{b}"]), now()).unwrap();

        let targets: Vec<_> = tasks.iter().map(|t| t.target.as_str()).collect();
        assert_eq!(targets, ["/s{a}", "/s{b}", "/s{c}"]);
        let offsets: Vec<_> = tasks
            .iter()
            .map(|t| (t.fire_at - now()).num_seconds())
            .collect();
        assert_eq!(offsets, [0, 30, 60]);
        assert_eq!(
            tasks[0].name,
            "bulk-service-action-scheduler_redeploy-top-level_/s{a}"
        );
    }

    #[test]
    fn test_reconcile_tasks_carry_reconcile_flag() {
        let mut request = ScheduleRequest::new(ActionKind::ReconcileSublayers, Targets::all());
        request.commit_flags = CommitFlags {
            dry_run: false,
            no_networking: true,
            reconcile: false,
        };
        let tasks = plan_tasks(&request, &keys(&["/s{a}"]), now()).unwrap();
        assert!(tasks[0].commit_flags.reconcile);
        assert!(tasks[0].commit_flags.no_networking);
        assert!(!tasks[0].commit_flags.dry_run);
        assert_eq!(tasks[0].fire_at, now() + TimeDelta::minutes(1));
    }

    #[test]
    fn test_past_time_rejected_without_tasks() {
        let mut request = ScheduleRequest::new(ActionKind::RedeployTopLevel, Targets::all());
        request.schedule = ScheduleTime::At(now() - TimeDelta::seconds(1));
        let result = plan_tasks(&request, &keys(&["/s{a}"]), now());
        assert!(matches!(result, Err(Error::ScheduleInPast { .. })));
    }

    #[test]
    fn test_offset_beyond_calendar_is_invalid() {
        let schedule = ScheduleTime::parse("2000000000000h00m").unwrap();
        assert!(matches!(
            check_not_past(&schedule, now()),
            Err(Error::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_huge_interval_is_invalid() {
        let mut request = ScheduleRequest::new(ActionKind::RedeployTopLevel, Targets::all());
        request.interval_secs = 9_000_000_000_000;

        let single = plan_tasks(&request, &keys(&["/s{a}"]), now()).unwrap();
        assert_eq!(single[0].fire_at, now() + TimeDelta::minutes(1));

        let result = plan_tasks(&request, &keys(&["/s{a}", "/s{b}"]), now());
        assert!(matches!(result, Err(Error::InvalidSchedule { .. })));
    }

    #[test]
    fn test_now_is_not_past() {
        assert_eq!(
            check_not_past(&ScheduleTime::At(now()), now()).unwrap(),
            now()
        );
    }
}
