//! Fixed-cadence resampling of irregular per-user tables.
//!
//! Buckets are calendar days or clock hours in the data's own clock. Each
//! user's output runs from the bucket holding their first row to the bucket
//! holding their last, with one row per bucket. A bucket with no contributing
//! observations for a variable is absent for that variable, for `sum` as well
//! as `mean`.

use std::collections::BTreeMap;

use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::coverage::{DateRange, DayCoverage, UserCoverage};
use crate::series::{
    is_daily_total_variable, Cadence, PivotedSeries, SeriesRow, UserSeries, ACTIVITY, MOOD,
};

pub const DEFAULT_WAKING_HOURS: u32 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResampleError {
    #[error("aggregation policy references variable '{0}' that is not in the table")]
    MissingVariable(String),
    #[error("variable '{0}' has no aggregation assigned")]
    UnassignedVariable(String),
    #[error("waking hours must be in 1..=24, got {0}")]
    InvalidWakingHours(u32),
    #[error("daily sleep fill window {start}-{end} does not contain midnight")]
    SleepWindowMissesMidnight { start: NaiveTime, end: NaiveTime },
    #[error("table is already {0:?}; resampling expects irregular rows")]
    AlreadyResampled(Cadence),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    Sum,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationPolicy {
    assignments: BTreeMap<String, Aggregation>,
}

impl AggregationPolicy {
    pub fn daily_for(variables: &[String]) -> Self {
        let assignments = variables
            .iter()
            .map(|name| {
                let agg = if is_daily_total_variable(name) {
                    Aggregation::Sum
                } else {
                    Aggregation::Mean
                };
                (name.clone(), agg)
            })
            .collect();
        Self { assignments }
    }

    pub fn all_sum(variables: &[String]) -> Self {
        Self {
            assignments: variables
                .iter()
                .map(|name| (name.clone(), Aggregation::Sum))
                .collect(),
        }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Aggregation)>,
        S: Into<String>,
    {
        Self {
            assignments: pairs
                .into_iter()
                .map(|(name, agg)| (name.into(), agg))
                .collect(),
        }
    }

    pub fn get(&self, variable: &str) -> Option<Aggregation> {
        self.assignments.get(variable).copied()
    }

    pub fn validate_against(&self, series: &PivotedSeries) -> Result<(), ResampleError> {
        for name in &series.variables {
            if !self.assignments.contains_key(name) {
                return Err(ResampleError::UnassignedVariable(name.clone()));
            }
        }
        for name in self.assignments.keys() {
            if !series.has_variable(name) {
                return Err(ResampleError::MissingVariable(name.clone()));
            }
        }
        Ok(())
    }

    fn column_aggregations(&self, series: &PivotedSeries) -> Result<Vec<Aggregation>, ResampleError> {
        self.validate_against(series)?;
        series
            .variables
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| ResampleError::UnassignedVariable(name.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for SleepWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl SleepWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampleConfig {
    pub waking_hours: u32,
    pub sleep_fill: Option<SleepWindow>,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            waking_hours: DEFAULT_WAKING_HOURS,
            sleep_fill: None,
        }
    }
}

impl ResampleConfig {
    pub fn validate(&self) -> Result<(), ResampleError> {
        if self.waking_hours == 0 || self.waking_hours > 24 {
            return Err(ResampleError::InvalidWakingHours(self.waking_hours));
        }
        // Daily buckets start at 00:00, so the fill window has to cover midnight.
        if let Some(window) = self.sleep_fill {
            if !window.contains(NaiveTime::MIN) {
                return Err(ResampleError::SleepWindowMissesMidnight {
                    start: window.start,
                    end: window.end,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Hour,
    Day,
}

impl Bucket {
    fn floor(self, ts: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Day => ts.date().and_time(NaiveTime::MIN),
            Self::Hour => ts
                .date()
                .and_hms_opt(ts.hour(), 0, 0)
                .unwrap_or_else(|| ts.date().and_time(NaiveTime::MIN)),
        }
    }

    fn step(self) -> ChronoDuration {
        match self {
            Self::Day => ChronoDuration::days(1),
            Self::Hour => ChronoDuration::hours(1),
        }
    }
}

pub fn resample_daily(
    series: &PivotedSeries,
    policy: &AggregationPolicy,
    cfg: &ResampleConfig,
) -> Result<PivotedSeries, ResampleError> {
    cfg.validate()?;
    if series.cadence != Cadence::Irregular {
        return Err(ResampleError::AlreadyResampled(series.cadence));
    }
    let aggs = policy.column_aggregations(series)?;

    let mut out = resample_with(series, &aggs, Bucket::Day, cfg.sleep_fill);
    out.cadence = Cadence::Daily;

    if let Some(col) = out.column(ACTIVITY) {
        let divisor = cfg.waking_hours as f64;
        for row in out.users.iter_mut().flat_map(|user| user.rows.iter_mut()) {
            if let Some(value) = row.values[col].as_mut() {
                *value /= divisor;
            }
        }
        out.activity_normalized = true;
    }

    info!(
        component = "resample",
        event = "resample.daily.finish",
        users = out.users.len(),
        rows = out.users.iter().map(|u| u.rows.len()).sum::<usize>(),
        waking_hours = cfg.waking_hours,
        sleep_fill = cfg.sleep_fill.is_some()
    );

    Ok(out)
}

pub fn resample_hourly(
    series: &PivotedSeries,
    sleep_fill: Option<SleepWindow>,
) -> Result<PivotedSeries, ResampleError> {
    if series.cadence != Cadence::Irregular {
        return Err(ResampleError::AlreadyResampled(series.cadence));
    }
    let policy = AggregationPolicy::all_sum(&series.variables);
    let aggs = policy.column_aggregations(series)?;

    let mut out = resample_with(series, &aggs, Bucket::Hour, sleep_fill);
    out.cadence = Cadence::Hourly;

    info!(
        component = "resample",
        event = "resample.hourly.finish",
        users = out.users.len(),
        rows = out.users.iter().map(|u| u.rows.len()).sum::<usize>(),
        sleep_fill = sleep_fill.is_some()
    );

    Ok(out)
}

pub fn daily_coverage_view(series: &PivotedSeries) -> Result<Vec<UserCoverage>, ResampleError> {
    let mood_col = series
        .column(MOOD)
        .ok_or_else(|| ResampleError::MissingVariable(MOOD.to_string()))?;
    let activity_col = series.column(ACTIVITY);

    let mut out = Vec::with_capacity(series.users.len());
    for user in &series.users {
        let mut days: BTreeMap<_, (u32, u32, f64)> = BTreeMap::new();
        if let (Some(first), Some(last)) = (user.rows.first(), user.rows.last()) {
            let span = DateRange {
                start: first.date(),
                end: last.date(),
            };
            days.extend(span.days().map(|day| (day, (0, 0, 0.0))));
        }
        for row in &user.rows {
            let entry = days.entry(row.date()).or_insert((0, 0, 0.0));
            if row.values[mood_col].is_some() {
                entry.0 += 1;
            }
            if let Some(value) = activity_col.and_then(|col| row.values[col]) {
                entry.1 += 1;
                entry.2 += value;
            }
        }

        out.push(UserCoverage {
            user_id: user.user_id.clone(),
            days: days
                .into_iter()
                .map(|(date, (mood_count, activity_count, activity_sum))| DayCoverage {
                    date,
                    mood_count,
                    activity_count,
                    activity_mean: (activity_count > 0)
                        .then(|| activity_sum / activity_count as f64),
                })
                .collect(),
        });
    }
    Ok(out)
}

fn resample_with(
    series: &PivotedSeries,
    aggs: &[Aggregation],
    bucket: Bucket,
    sleep_fill: Option<SleepWindow>,
) -> PivotedSeries {
    let activity_col = series.column(ACTIVITY);
    let mut out = series.empty_like();

    for user in &series.users {
        let (Some(first), Some(last)) = (user.rows.first(), user.rows.last()) else {
            out.users.push(UserSeries::new(user.user_id.clone()));
            continue;
        };

        let mut rows = Vec::new();
        let mut cursor = bucket.floor(first.timestamp);
        let last_bucket = bucket.floor(last.timestamp);
        let mut idx = 0;
        while cursor <= last_bucket {
            let next = cursor + bucket.step();
            let mut sums = vec![0.0; aggs.len()];
            let mut counts = vec![0u32; aggs.len()];
            while idx < user.rows.len() && user.rows[idx].timestamp < next {
                for (col, value) in user.rows[idx].values.iter().enumerate() {
                    if let Some(value) = value {
                        sums[col] += value;
                        counts[col] += 1;
                    }
                }
                idx += 1;
            }

            let mut values: Vec<Option<f64>> = aggs
                .iter()
                .enumerate()
                .map(|(col, agg)| {
                    if counts[col] == 0 {
                        return None;
                    }
                    Some(match agg {
                        Aggregation::Sum => sums[col],
                        Aggregation::Mean => sums[col] / counts[col] as f64,
                    })
                })
                .collect();

            if let (Some(window), Some(col)) = (sleep_fill, activity_col) {
                if values[col].is_none() && window.contains(cursor.time()) {
                    values[col] = Some(0.0);
                }
            }

            rows.push(SeriesRow {
                timestamp: cursor,
                values,
            });
            cursor = next;
        }

        out.users.push(UserSeries {
            user_id: user.user_id.clone(),
            rows,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::RawObservation;
    use chrono::NaiveDate;

    fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2014, 3, day)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .expect("valid timestamp")
    }

    fn obs(day: u32, hour: u32, minute: u32, variable: &str, value: f64) -> RawObservation {
        RawObservation {
            user_id: "AS14.01".to_string(),
            timestamp: ts(day, hour, minute),
            variable: variable.to_string(),
            value,
        }
    }

    fn sample() -> PivotedSeries {
        PivotedSeries::from_observations(&[
            obs(1, 9, 0, "mood", 6.0),
            obs(1, 18, 0, "mood", 8.0),
            obs(1, 9, 0, "screen", 100.0),
            obs(1, 9, 30, "screen", 50.0),
            obs(1, 10, 0, "activity", 0.5),
            obs(1, 11, 0, "activity", 0.3),
            obs(3, 12, 0, "mood", 5.0),
            obs(3, 12, 0, "screen", 10.0),
        ])
    }

    fn value(series: &PivotedSeries, row: usize, variable: &str) -> Option<f64> {
        let col = series.column(variable).expect("column present");
        series.users[0].rows[row].values[col]
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "actual={actual} expected={expected}"
        );
    }

    #[test]
    fn daily_policy_sums_totals_and_averages_scores() {
        let policy = AggregationPolicy::daily_for(&sample().variables);
        assert_eq!(policy.get("screen"), Some(Aggregation::Sum));
        assert_eq!(policy.get("activity"), Some(Aggregation::Sum));
        assert_eq!(policy.get("mood"), Some(Aggregation::Mean));
    }

    #[test]
    fn daily_resample_is_additive_and_keeps_empty_days_absent() {
        let raw = sample();
        let policy = AggregationPolicy::daily_for(&raw.variables);
        let daily = resample_daily(&raw, &policy, &ResampleConfig::default()).expect("resample");

        assert_eq!(daily.cadence, Cadence::Daily);
        assert_eq!(daily.users[0].rows.len(), 3);
        assert_eq!(daily.users[0].rows[1].timestamp, ts(2, 0, 0));

        assert_eq!(value(&daily, 0, "screen"), Some(150.0));
        assert_eq!(value(&daily, 0, "mood"), Some(7.0));
        assert_eq!(value(&daily, 1, "screen"), None);
        assert_eq!(value(&daily, 1, "mood"), None);
        assert_eq!(value(&daily, 1, "activity"), None);
        assert_eq!(value(&daily, 2, "screen"), Some(10.0));
    }

    #[test]
    fn activity_is_divided_by_waking_hours_once() {
        let raw = sample();
        let policy = AggregationPolicy::daily_for(&raw.variables);
        let daily = resample_daily(&raw, &policy, &ResampleConfig::default()).expect("resample");

        assert!(daily.activity_normalized);
        assert_close(value(&daily, 0, "activity").expect("activity"), 0.8 / 16.0);

        let err = resample_daily(&daily, &policy, &ResampleConfig::default())
            .expect_err("daily table cannot be resampled again");
        assert_eq!(err, ResampleError::AlreadyResampled(Cadence::Daily));
    }

    #[test]
    fn sleep_fill_zeroes_absent_activity_only_when_enabled() {
        let raw = sample();
        let policy = AggregationPolicy::daily_for(&raw.variables);
        let cfg = ResampleConfig {
            sleep_fill: Some(SleepWindow::default()),
            ..ResampleConfig::default()
        };
        let daily = resample_daily(&raw, &policy, &cfg).expect("resample");
        assert_eq!(value(&daily, 1, "activity"), Some(0.0));
        assert_eq!(value(&daily, 1, "screen"), None);
    }

    #[test]
    fn daily_sleep_fill_window_must_cover_midnight() {
        let raw = sample();
        let policy = AggregationPolicy::daily_for(&raw.variables);
        let early_morning = SleepWindow {
            start: NaiveTime::from_hms_opt(1, 0, 0).expect("time"),
            end: NaiveTime::from_hms_opt(6, 0, 0).expect("time"),
        };
        let cfg = ResampleConfig {
            sleep_fill: Some(early_morning),
            ..ResampleConfig::default()
        };
        assert_eq!(
            resample_daily(&raw, &policy, &cfg),
            Err(ResampleError::SleepWindowMissesMidnight {
                start: early_morning.start,
                end: early_morning.end,
            })
        );

        let around_midnight = ResampleConfig {
            sleep_fill: Some(SleepWindow {
                start: NaiveTime::from_hms_opt(23, 0, 0).expect("time"),
                end: NaiveTime::from_hms_opt(6, 0, 0).expect("time"),
            }),
            ..ResampleConfig::default()
        };
        let daily = resample_daily(&raw, &policy, &around_midnight).expect("resample");
        assert_eq!(value(&daily, 1, "activity"), Some(0.0));
    }

    #[test]
    fn hourly_resample_uses_min_count_one_sums() {
        let raw = sample();
        let hourly = resample_hourly(&raw, None).expect("resample");
        assert_eq!(hourly.cadence, Cadence::Hourly);
        // 2014-03-01 09:00 through 2014-03-03 12:00 inclusive.
        assert_eq!(hourly.users[0].rows.len(), 24 * 2 + 3 + 1);
        assert_eq!(value(&hourly, 0, "screen"), Some(150.0));
        assert_eq!(value(&hourly, 0, "mood"), Some(6.0));
        assert_eq!(value(&hourly, 1, "activity"), Some(0.5));
        assert_eq!(value(&hourly, 3, "screen"), None);
        assert!(!hourly.activity_normalized);
    }

    #[test]
    fn hourly_sleep_fill_respects_wrapping_window() {
        let raw = sample();
        let hourly = resample_hourly(&raw, Some(SleepWindow::default())).expect("resample");
        // Row 12 is 21:00 on day 1 (awake), row 13 is 22:00 (asleep).
        assert_eq!(value(&hourly, 12, "activity"), None);
        assert_eq!(value(&hourly, 13, "activity"), Some(0.0));
        assert_eq!(value(&hourly, 3, "activity"), None);
    }

    #[test]
    fn policy_must_cover_every_column() {
        let raw = sample();
        let partial = AggregationPolicy::from_pairs([
            ("mood", Aggregation::Mean),
            ("screen", Aggregation::Sum),
        ]);
        assert_eq!(
            partial.validate_against(&raw),
            Err(ResampleError::UnassignedVariable("activity".to_string()))
        );

        let extra = AggregationPolicy::from_pairs([
            ("mood", Aggregation::Mean),
            ("screen", Aggregation::Sum),
            ("activity", Aggregation::Sum),
            ("call", Aggregation::Sum),
        ]);
        let err = resample_daily(&raw, &extra, &ResampleConfig::default()).expect_err("missing");
        assert_eq!(err, ResampleError::MissingVariable("call".to_string()));
    }

    #[test]
    fn zero_waking_hours_is_rejected() {
        let raw = sample();
        let policy = AggregationPolicy::daily_for(&raw.variables);
        let cfg = ResampleConfig {
            waking_hours: 0,
            sleep_fill: None,
        };
        assert_eq!(
            resample_daily(&raw, &policy, &cfg),
            Err(ResampleError::InvalidWakingHours(0))
        );
    }

    #[test]
    fn coverage_view_counts_raw_observations_per_day() {
        let view = daily_coverage_view(&sample()).expect("mood present");
        let days = &view[0].days;
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].mood_count, 2);
        assert_eq!(days[0].activity_count, 2);
        assert_close(days[0].activity_mean.expect("mean"), 0.4);
        assert_eq!(days[1].mood_count, 0);
        assert_eq!(days[1].activity_mean, None);
        assert_eq!(days[2].mood_count, 1);
    }

    #[test]
    fn coverage_view_requires_mood() {
        let raw = PivotedSeries::from_observations(&[obs(1, 9, 0, "screen", 1.0)]);
        assert_eq!(
            daily_coverage_view(&raw),
            Err(ResampleError::MissingVariable("mood".to_string()))
        );
    }
}
