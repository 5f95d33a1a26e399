//! Detection of maximal contiguous day ranges that satisfy a coverage rule.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const MIN_ACTIVITY_COUNT: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoverageError {
    #[error("coverage rule must require mood, activity, or both")]
    EmptyRule,
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CoverageError> {
        if start > end {
            return Err(CoverageError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn with_preceding_day(&self) -> Self {
        Self {
            start: self.start.pred_opt().unwrap_or(self.start),
            end: self.end,
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |day| *day <= self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRule {
    pub mood: bool,
    pub activity: bool,
}

impl Default for CoverageRule {
    fn default() -> Self {
        Self {
            mood: true,
            activity: true,
        }
    }
}

impl CoverageRule {
    pub fn validate(&self) -> Result<(), CoverageError> {
        if !self.mood && !self.activity {
            return Err(CoverageError::EmptyRule);
        }
        Ok(())
    }

    pub fn is_satisfied(&self, day: &DayCoverage) -> bool {
        let mood_ok = day.mood_count > 0;
        let activity_ok = (day.activity_count > 0)
            && (day.activity_count >= MIN_ACTIVITY_COUNT)
            && (day.activity_mean.unwrap_or(0.0) > 0.0);

        match (self.mood, self.activity) {
            (true, true) => mood_ok && activity_ok,
            (true, false) => mood_ok,
            (false, true) => activity_ok,
            (false, false) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayCoverage {
    pub date: NaiveDate,
    pub mood_count: u32,
    pub activity_count: u32,
    pub activity_mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCoverage {
    pub user_id: String,
    pub days: Vec<DayCoverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRanges {
    pub user_id: String,
    pub ranges: Vec<DateRange>,
}

pub fn find_coverage_ranges(
    view: &[UserCoverage],
    rule: &CoverageRule,
) -> Result<Vec<UserRanges>, CoverageError> {
    rule.validate()?;

    let mut out = Vec::with_capacity(view.len());
    for user in view {
        let qualifying: Vec<NaiveDate> = user
            .days
            .iter()
            .filter(|day| rule.is_satisfied(day))
            .map(|day| day.date)
            .collect();
        let ranges = contiguous_ranges(&qualifying);

        if ranges.is_empty() {
            warn!(
                component = "coverage",
                event = "coverage.user.no_ranges",
                user_id = %user.user_id,
                days_seen = user.days.len()
            );
        } else {
            debug!(
                component = "coverage",
                event = "coverage.ranges.found",
                user_id = %user.user_id,
                qualifying_days = qualifying.len(),
                range_count = ranges.len()
            );
        }

        out.push(UserRanges {
            user_id: user.user_id.clone(),
            ranges,
        });
    }
    Ok(out)
}

pub fn contiguous_ranges(days: &[NaiveDate]) -> Vec<DateRange> {
    let Some((&first, rest)) = days.split_first() else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let mut start = first;
    let mut prev = first;
    for &day in rest {
        if (day - prev).num_days() > 1 {
            ranges.push(DateRange { start, end: prev });
            start = day;
        }
        prev = day;
    }
    ranges.push(DateRange { start, end: prev });
    ranges
}
