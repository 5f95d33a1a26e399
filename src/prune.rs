//! Day selection over coverage ranges.
//!
//! Policies:
//! - `allMood`: every qualifying range, in range order
//! - `longest`: the single range with the greatest day span (first wins ties)
//! - `longestInc`: `longest` plus the calendar day right before it
//!
//! Ranges may come from a different table than the one being sliced, as long
//! as both share the same users and day index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::coverage::{DateRange, UserRanges};
use crate::series::PivotedSeries;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PruneError {
    #[error("unknown prune method '{0}' (expected allMood, longest or longestInc)")]
    UnknownMethod(String),
    #[error("user '{0}' has coverage ranges but no rows in the table being pruned")]
    UnknownUser(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PruneMethod {
    AllMood,
    #[default]
    Longest,
    LongestInc,
}

impl PruneMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllMood => "allMood",
            Self::Longest => "longest",
            Self::LongestInc => "longestInc",
        }
    }

    pub fn select(self, ranges: &[DateRange]) -> Vec<DateRange> {
        match self {
            Self::AllMood => ranges.to_vec(),
            Self::Longest => longest_range(ranges).into_iter().collect(),
            Self::LongestInc => longest_range(ranges)
                .map(|range| range.with_preceding_day())
                .into_iter()
                .collect(),
        }
    }
}

impl fmt::Display for PruneMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruneMethod {
    type Err = PruneError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "allmood" => Ok(Self::AllMood),
            "longest" => Ok(Self::Longest),
            "longestinc" => Ok(Self::LongestInc),
            _ => Err(PruneError::UnknownMethod(raw.to_string())),
        }
    }
}

pub fn longest_range(ranges: &[DateRange]) -> Option<DateRange> {
    let mut best: Option<DateRange> = None;
    for range in ranges {
        match best {
            Some(current) if range.span_days() <= current.span_days() => {}
            _ => best = Some(*range),
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunedSeries {
    pub series: PivotedSeries,
    pub selected: Vec<UserRanges>,
}

pub fn prune_days(
    table: &PivotedSeries,
    ranges: &[UserRanges],
    method: PruneMethod,
) -> Result<PrunedSeries, PruneError> {
    let mut series = table.empty_like();
    let mut selected = Vec::new();

    for user_ranges in ranges {
        let chosen = method.select(&user_ranges.ranges);
        if chosen.is_empty() {
            continue;
        }
        let user = table
            .user(&user_ranges.user_id)
            .ok_or_else(|| PruneError::UnknownUser(user_ranges.user_id.clone()))?;
        let sliced = user.slice_ranges(&chosen);

        debug!(
            component = "prune",
            event = "prune.user.selected",
            user_id = %user.user_id,
            method = %method,
            ranges_in = user_ranges.ranges.len(),
            ranges_kept = chosen.len(),
            rows_kept = sliced.rows.len()
        );

        series.users.push(sliced);
        selected.push(UserRanges {
            user_id: user_ranges.user_id.clone(),
            ranges: chosen,
        });
    }

    Ok(PrunedSeries { series, selected })
}
