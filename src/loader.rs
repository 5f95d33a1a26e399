//! Loading of the long-format observation CSV.
//!
//! Expected header: an unnamed row-index column followed by `id`, `time`,
//! `variable` and `value`, e.g.
//!
//! ```text
//! "","id","time","variable","value"
//! "1","AS14.01","2014-02-26 13:00:00.000","mood",6
//! ```
//!
//! Column order does not matter; columns are looked up by name.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDateTime;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::series::{PivotedSeries, RawObservation};

const TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("observation file has no '{0}' column")]
    MissingColumn(&'static str),
    #[error("line {line}: failed to parse field {field} value '{value}'")]
    ParseField {
        line: u64,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_read: u64,
    pub observations: u64,
    pub skipped_rows: u64,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    id: usize,
    time: usize,
    variable: usize,
    value: usize,
}

pub fn load_observations(path: &Path) -> Result<(Vec<RawObservation>, LoadReport), LoadError> {
    let file = File::open(path)?;
    let loaded = read_observations(file)?;
    info!(
        component = "loader",
        event = "loader.load.finish",
        path = %path.display(),
        rows_read = loaded.1.rows_read,
        observations = loaded.1.observations,
        skipped_rows = loaded.1.skipped_rows
    );
    Ok(loaded)
}

pub fn load_pivoted(path: &Path) -> Result<(PivotedSeries, LoadReport), LoadError> {
    let (observations, report) = load_observations(path)?;
    Ok((PivotedSeries::from_observations(&observations), report))
}

pub fn read_observations<R: Read>(reader: R) -> Result<(Vec<RawObservation>, LoadReport), LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = locate_columns(reader.headers()?)?;

    let mut report = LoadReport::default();
    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record?;
        report.rows_read += 1;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);

        let raw_value = field(&record, columns.value);
        if raw_value.is_empty() || raw_value.eq_ignore_ascii_case("na") {
            debug!(
                component = "loader",
                event = "loader.row.skipped",
                line,
                reason = "missing_value"
            );
            report.skipped_rows += 1;
            continue;
        }

        observations.push(RawObservation {
            user_id: field(&record, columns.id).to_string(),
            timestamp: parse_time(line, field(&record, columns.time))?,
            variable: field(&record, columns.variable).to_string(),
            value: parse_f64(line, "value", raw_value)?,
        });
    }

    report.observations = observations.len() as u64;
    Ok((observations, report))
}

fn locate_columns(headers: &StringRecord) -> Result<Columns, LoadError> {
    let find = |name: &'static str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or(LoadError::MissingColumn(name))
    };
    Ok(Columns {
        id: find("id")?,
        time: find("time")?,
        variable: find("variable")?,
        value: find("value")?,
    })
}

fn field(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or("")
}

fn parse_time(line: u64, raw: &str) -> Result<NaiveDateTime, LoadError> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| LoadError::ParseField {
            line,
            field: "time",
            value: raw.to_string(),
        })
}

fn parse_f64(line: u64, field: &'static str, raw: &str) -> Result<f64, LoadError> {
    raw.parse::<f64>().map_err(|_| LoadError::ParseField {
        line,
        field,
        value: raw.to_string(),
    })
}
