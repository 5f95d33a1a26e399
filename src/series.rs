//! Pivoted per-user observation tables.
//!
//! A [`PivotedSeries`] holds one [`UserSeries`] per user, in canonical user
//! order, with one column per variable. The same table type carries raw
//! (irregular) rows and resampled daily/hourly rows; [`Cadence`] records
//! which one it is. Every stage builds a new table rather than editing one
//! in place.
//!
//! Pivoting keeps users in first-appearance order, sorts variables by name
//! and rows by timestamp, and averages repeated `(user, timestamp, variable)`
//! triples. Day slicing is by whole calendar days, inclusive at both ends.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::coverage::DateRange;

pub const MOOD: &str = "mood";
pub const ACTIVITY: &str = "activity";
pub const SCREEN: &str = "screen";
pub const SMS: &str = "sms";
pub const CALL: &str = "call";
pub const APP_CATEGORY_PREFIX: &str = "appCat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub variable: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cadence {
    Irregular,
    Hourly,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub timestamp: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

impl SeriesRow {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSeries {
    pub user_id: String,
    pub rows: Vec<SeriesRow>,
}

impl UserSeries {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            rows: Vec::new(),
        }
    }

    pub fn rows_between(&self, first: NaiveDate, last: NaiveDate) -> &[SeriesRow] {
        let lo = self.rows.partition_point(|row| row.date() < first);
        let hi = self.rows.partition_point(|row| row.date() <= last);
        if lo >= hi {
            &[]
        } else {
            &self.rows[lo..hi]
        }
    }

    pub fn rows_on(&self, day: NaiveDate) -> &[SeriesRow] {
        self.rows_between(day, day)
    }

    pub fn slice_ranges(&self, ranges: &[DateRange]) -> UserSeries {
        let mut rows = Vec::new();
        for range in ranges {
            rows.extend_from_slice(self.rows_between(range.start, range.end));
        }
        UserSeries {
            user_id: self.user_id.clone(),
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotedSeries {
    pub cadence: Cadence,
    pub variables: Vec<String>,
    pub users: Vec<UserSeries>,
    #[serde(default)]
    pub activity_normalized: bool,
}

impl PivotedSeries {
    pub fn new(cadence: Cadence, variables: Vec<String>) -> Self {
        Self {
            cadence,
            variables,
            users: Vec::new(),
            activity_normalized: false,
        }
    }

    pub fn from_observations(observations: &[RawObservation]) -> Self {
        let mut variables: Vec<String> = observations
            .iter()
            .map(|obs| obs.variable.clone())
            .collect();
        variables.sort();
        variables.dedup();
        let column_of: BTreeMap<&str, usize> = variables
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let mut user_order: Vec<&str> = Vec::new();
        let mut cells: BTreeMap<&str, BTreeMap<NaiveDateTime, Vec<(f64, u32)>>> = BTreeMap::new();
        for obs in observations {
            let per_user = cells.entry(obs.user_id.as_str()).or_insert_with(|| {
                user_order.push(obs.user_id.as_str());
                BTreeMap::new()
            });
            let row = per_user
                .entry(obs.timestamp)
                .or_insert_with(|| vec![(0.0, 0); variables.len()]);
            // column_of is built from the same observations, so the lookup cannot miss.
            if let Some(&col) = column_of.get(obs.variable.as_str()) {
                row[col].0 += obs.value;
                row[col].1 += 1;
            }
        }

        let mut series = PivotedSeries::new(Cadence::Irregular, variables.clone());
        for user_id in user_order {
            let Some(per_user) = cells.remove(user_id) else {
                continue;
            };
            let rows = per_user
                .into_iter()
                .map(|(timestamp, acc)| SeriesRow {
                    timestamp,
                    values: acc
                        .into_iter()
                        .map(|(sum, n)| (n > 0).then(|| sum / n as f64))
                        .collect(),
                })
                .collect();
            series.users.push(UserSeries {
                user_id: user_id.to_string(),
                rows,
            });
        }
        series
    }

    pub fn column(&self, variable: &str) -> Option<usize> {
        self.variables.iter().position(|name| name == variable)
    }

    pub fn has_variable(&self, variable: &str) -> bool {
        self.column(variable).is_some()
    }

    pub fn user(&self, user_id: &str) -> Option<&UserSeries> {
        self.users.iter().find(|user| user.user_id == user_id)
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.users.iter().map(|user| user.user_id.clone()).collect()
    }

    pub fn empty_like(&self) -> Self {
        Self {
            cadence: self.cadence,
            variables: self.variables.clone(),
            users: Vec::new(),
            activity_normalized: self.activity_normalized,
        }
    }
}

pub fn is_duration_variable(variable: &str) -> bool {
    variable == SCREEN || variable.starts_with(APP_CATEGORY_PREFIX)
}

pub fn is_daily_total_variable(variable: &str) -> bool {
    is_duration_variable(variable) || variable == SMS || variable == CALL || variable == ACTIVITY
}
