//! Fixed-threshold correction of invalid usage-time readings.
//!
//! Negative readings and readings above the limit (five hours by default)
//! become zero; every other cell is copied unchanged.

use tracing::debug;

use crate::series::{is_duration_variable, PivotedSeries};

pub const DEFAULT_MAX_DURATION_SECONDS: u32 = 5 * 60 * 60;

pub fn remove_use_time_outliers(series: &PivotedSeries, max_duration_seconds: u32) -> PivotedSeries {
    let limit = max_duration_seconds as f64;
    let duration_cols: Vec<usize> = series
        .variables
        .iter()
        .enumerate()
        .filter(|(_, name)| is_duration_variable(name))
        .map(|(idx, _)| idx)
        .collect();

    let mut out = series.clone();
    for user in &mut out.users {
        let mut zeroed = 0usize;
        for row in &mut user.rows {
            for &col in &duration_cols {
                if let Some(value) = row.values[col].as_mut() {
                    if *value < 0.0 || *value > limit {
                        *value = 0.0;
                        zeroed += 1;
                    }
                }
            }
        }
        if zeroed > 0 {
            debug!(
                component = "outliers",
                event = "outliers.corrected",
                user_id = %user.user_id,
                zeroed_cells = zeroed,
                max_duration_seconds
            );
        }
    }
    out
}
