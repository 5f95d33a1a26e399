//! Sliding-window "sub-user" feature records with a next-day mood label.
//!
//! For every qualifying day range a window of `period_days` slides forward
//! `stride_days` at a time. Each position yields one record:
//! - daily-total variables (usage time, sms, call, activity) take the mean of
//!   their daily aggregates over the window days
//! - every other variable takes the mean of its raw observations in the window
//! - `nextday` is the mean raw mood of the day after the window
//!
//! A range is only used when it spans at least `period_days + 1` days.

use std::io::Write;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::coverage::DateRange;
use crate::series::{is_daily_total_variable, UserSeries, MOOD};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const LABEL_COLUMN: &str = "nextday";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("window period must be > 0 days")]
    InvalidPeriod,
    #[error("window stride must be > 0 days")]
    InvalidStride,
    #[error("label variable '{0}' is not in the table")]
    MissingLabel(String),
    #[error("{table} rows for user '{user_id}' have {actual} columns, expected {expected}")]
    ColumnMismatch {
        table: &'static str,
        user_id: String,
        expected: usize,
        actual: usize,
    },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub period_days: u32,
    pub stride_days: u32,
}

impl WindowConfig {
    pub fn new(period_days: u32) -> Self {
        Self {
            period_days,
            stride_days: 1,
        }
    }

    pub fn validate(&self) -> Result<(), WindowError> {
        if self.period_days == 0 {
            return Err(WindowError::InvalidPeriod);
        }
        if self.stride_days == 0 {
            return Err(WindowError::InvalidStride);
        }
        Ok(())
    }

    pub fn fits(&self, range: &DateRange) -> bool {
        range.span_days() >= i64::from(self.period_days) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubUserRecord {
    pub user_id: String,
    pub window_index: usize,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub values: Vec<Option<f64>>,
    pub nextday: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub records: Vec<SubUserRecord>,
}

pub fn build_feature_schema(
    variables: &[String],
    window: &WindowConfig,
    waking_hours: u32,
) -> FeatureSchema {
    let mut columns: Vec<FeatureColumn> = variables
        .iter()
        .map(|name| FeatureColumn {
            name: name.clone(),
            dtype: FeatureDType::F64,
        })
        .collect();
    columns.push(FeatureColumn {
        name: LABEL_COLUMN.to_string(),
        dtype: FeatureDType::F64,
    });

    let fingerprint = schema_fingerprint(window, waking_hours, &columns);

    info!(
        component = "reinstance",
        event = "reinstance.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        period_days = window.period_days,
        stride_days = window.stride_days,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), WindowError> {
    if expected_version != actual.version {
        return Err(WindowError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(WindowError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

pub fn generate_sub_users(
    raw: &UserSeries,
    daily: &UserSeries,
    ranges: &[DateRange],
    variables: &[String],
    window: &WindowConfig,
) -> Result<Vec<SubUserRecord>, WindowError> {
    window.validate()?;
    let mood_col = variables
        .iter()
        .position(|name| name == MOOD)
        .ok_or_else(|| WindowError::MissingLabel(MOOD.to_string()))?;
    check_width("raw", raw, variables.len())?;
    check_width("daily", daily, variables.len())?;
    let daily_total: Vec<bool> = variables
        .iter()
        .map(|name| is_daily_total_variable(name))
        .collect();

    let period = Days::new(u64::from(window.period_days));
    let stride = Days::new(u64::from(window.stride_days));

    let mut records = Vec::new();
    for range in ranges {
        if !window.fits(range) {
            continue;
        }

        let mut window_start = range.start;
        let Some(mut window_end) = range.start.checked_add_days(period) else {
            continue;
        };
        while window_end < range.end {
            let raw_rows = raw.rows_between(window_start, window_end);
            let daily_rows = daily.rows_between(window_start, window_end);

            let values = (0..variables.len())
                .map(|col| {
                    let rows = if daily_total[col] { daily_rows } else { raw_rows };
                    mean(rows.iter().filter_map(|row| row.values[col]))
                })
                .collect();

            let nextday = window_end
                .succ_opt()
                .and_then(|label_day| {
                    mean(
                        raw.rows_on(label_day)
                            .iter()
                            .filter_map(|row| row.values[mood_col]),
                    )
                });

            records.push(SubUserRecord {
                user_id: raw.user_id.clone(),
                window_index: records.len(),
                window_start,
                window_end,
                values,
                nextday,
            });

            match (
                window_start.checked_add_days(stride),
                window_end.checked_add_days(stride),
            ) {
                (Some(next_start), Some(next_end)) => {
                    window_start = next_start;
                    window_end = next_end;
                }
                _ => break,
            }
        }
    }

    Ok(records)
}

pub fn write_feature_table_csv<W: Write>(table: &FeatureTable, writer: W) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);

    let mut header = vec![
        "user_id".to_string(),
        "window_index".to_string(),
        "window_start".to_string(),
        "window_end".to_string(),
    ];
    header.extend(table.schema.columns.iter().map(|column| column.name.clone()));
    out.write_record(&header)?;

    for record in &table.records {
        let mut fields = vec![
            record.user_id.clone(),
            record.window_index.to_string(),
            record.window_start.to_string(),
            record.window_end.to_string(),
        ];
        fields.extend(
            record
                .values
                .iter()
                .chain(std::iter::once(&record.nextday))
                .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
        );
        out.write_record(&fields)?;
    }

    out.flush()?;
    Ok(())
}

fn check_width(table: &'static str, user: &UserSeries, expected: usize) -> Result<(), WindowError> {
    match user.rows.iter().find(|row| row.values.len() != expected) {
        Some(row) => Err(WindowError::ColumnMismatch {
            table,
            user_id: user.user_id.clone(),
            expected,
            actual: row.values.len(),
        }),
        None => Ok(()),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn schema_fingerprint(window: &WindowConfig, waking_hours: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{FEATURE_SCHEMA_VERSION};"));
    hasher.update(format!("period_days:{};", window.period_days));
    hasher.update(format!("stride_days:{};", window.stride_days));
    hasher.update(format!("waking_hours:{waking_hours};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}
