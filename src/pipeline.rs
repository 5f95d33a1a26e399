//! End-to-end reinstancing run: outlier correction, daily resampling,
//! coverage detection, day selection and sliding-window generation.
//!
//! Configuration is validated before any per-user work. Users that cannot
//! produce a single window are skipped and listed in the report; they never
//! abort the run.

use std::env;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::coverage::{find_coverage_ranges, CoverageError, CoverageRule, UserRanges};
use crate::outliers::{remove_use_time_outliers, DEFAULT_MAX_DURATION_SECONDS};
use crate::prune::{prune_days, PruneError, PruneMethod};
use crate::reinstance::{
    build_feature_schema, generate_sub_users, FeatureTable, WindowConfig, WindowError,
};
use crate::resample::{
    daily_coverage_view, resample_daily, AggregationPolicy, ResampleConfig, ResampleError,
    SleepWindow, DEFAULT_WAKING_HOURS,
};
use crate::series::{PivotedSeries, ACTIVITY, MOOD};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
    #[error("input table has no '{variable}' column")]
    SchemaViolation { variable: String },
    #[error("resample error: {0}")]
    Resample(#[from] ResampleError),
    #[error("coverage error: {0}")]
    Coverage(#[from] CoverageError),
    #[error("prune error: {0}")]
    Prune(#[from] PruneError),
    #[error("window error: {0}")]
    Window(#[from] WindowError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub prune_method: PruneMethod,
    pub coverage: CoverageRule,
    pub max_duration_outlier_seconds: u32,
    pub waking_hours: u32,
    pub window_period_days: Option<u32>,
    pub window_stride_days: u32,
    pub sleep_fill: Option<SleepWindow>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prune_method: PruneMethod::default(),
            coverage: CoverageRule::default(),
            max_duration_outlier_seconds: DEFAULT_MAX_DURATION_SECONDS,
            waking_hours: DEFAULT_WAKING_HOURS,
            window_period_days: None,
            window_stride_days: 1,
            sleep_fill: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_window_period(period_days: u32) -> Self {
        Self {
            window_period_days: Some(period_days),
            ..Self::default()
        }
    }

    pub fn resample_config(&self) -> ResampleConfig {
        ResampleConfig {
            waking_hours: self.waking_hours,
            sleep_fill: self.sleep_fill,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoCoverage,
    RangesTooShort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUser {
    pub user_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub users_total: usize,
    pub users_emitted: usize,
    pub records: usize,
    pub skipped_users: Vec<SkippedUser>,
    pub selected_ranges: Vec<UserRanges>,
}

pub fn validate_config(cfg: &PipelineConfig) -> Result<WindowConfig, PipelineError> {
    let period_days = cfg
        .window_period_days
        .ok_or_else(|| PipelineError::InvalidConfig("window_period_days is required".to_string()))?;
    let window = WindowConfig {
        period_days,
        stride_days: cfg.window_stride_days,
    };

    window
        .validate()
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    cfg.coverage
        .validate()
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    cfg.resample_config()
        .validate()
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    if cfg.max_duration_outlier_seconds == 0 {
        return Err(PipelineError::InvalidConfig(
            "max_duration_outlier_seconds must be > 0".to_string(),
        ));
    }

    Ok(window)
}

pub fn run_pipeline(
    raw: &PivotedSeries,
    cfg: &PipelineConfig,
) -> Result<(FeatureTable, PipelineReport), PipelineError> {
    let window = validate_config(cfg)?;
    require_variable(raw, MOOD)?;
    if cfg.coverage.activity {
        require_variable(raw, ACTIVITY)?;
    }

    info!(
        component = "pipeline",
        event = "pipeline.run.start",
        users = raw.users.len(),
        variables = raw.variables.len(),
        prune_method = %cfg.prune_method,
        coverage_mood = cfg.coverage.mood,
        coverage_activity = cfg.coverage.activity,
        period_days = window.period_days,
        stride_days = window.stride_days,
        waking_hours = cfg.waking_hours,
        sleep_fill = cfg.sleep_fill.is_some()
    );

    let corrected = remove_use_time_outliers(raw, cfg.max_duration_outlier_seconds);
    let policy = AggregationPolicy::daily_for(&corrected.variables);
    let daily = resample_daily(&corrected, &policy, &cfg.resample_config())?;

    let coverage_view = daily_coverage_view(&corrected)?;
    let ranges = find_coverage_ranges(&coverage_view, &cfg.coverage)?;

    let pruned_raw = prune_days(&corrected, &ranges, cfg.prune_method)?;
    let pruned_daily = prune_days(&daily, &ranges, cfg.prune_method)?;

    let mut records = Vec::new();
    let mut skipped_users = Vec::new();
    let mut users_emitted = 0;
    for user in &raw.users {
        let selected = pruned_raw
            .selected
            .iter()
            .find(|entry| entry.user_id == user.user_id);
        let sliced = (
            selected,
            pruned_raw.series.user(&user.user_id),
            pruned_daily.series.user(&user.user_id),
        );
        let (Some(selected), Some(user_raw), Some(user_daily)) = sliced else {
            skip_user(&mut skipped_users, &user.user_id, SkipReason::NoCoverage);
            continue;
        };

        let user_records = generate_sub_users(
            user_raw,
            user_daily,
            &selected.ranges,
            &corrected.variables,
            &window,
        )?;
        if user_records.is_empty() {
            skip_user(&mut skipped_users, &user.user_id, SkipReason::RangesTooShort);
            continue;
        }

        users_emitted += 1;
        records.extend(user_records);
    }

    let schema = build_feature_schema(&corrected.variables, &window, cfg.waking_hours);
    let report = PipelineReport {
        users_total: raw.users.len(),
        users_emitted,
        records: records.len(),
        skipped_users,
        selected_ranges: pruned_raw.selected,
    };

    info!(
        component = "pipeline",
        event = "pipeline.run.finish",
        users_total = report.users_total,
        users_emitted = report.users_emitted,
        users_skipped = report.skipped_users.len(),
        records = report.records
    );

    Ok((FeatureTable { schema, records }, report))
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, PipelineError> {
    pipeline_config_from_lookup(|key| env::var(key).ok())
}

pub fn pipeline_config_from_lookup<F>(lookup: F) -> Result<PipelineConfig, PipelineError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = PipelineConfig::default();
    let get = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    if let Some(raw) = get("MOODPREP_PRUNE_METHOD") {
        cfg.prune_method = raw
            .parse::<PruneMethod>()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    }
    if let Some(raw) = get("MOODPREP_COVERAGE_MOOD") {
        cfg.coverage.mood = parse_bool("MOODPREP_COVERAGE_MOOD", &raw)?;
    }
    if let Some(raw) = get("MOODPREP_COVERAGE_ACTIVITY") {
        cfg.coverage.activity = parse_bool("MOODPREP_COVERAGE_ACTIVITY", &raw)?;
    }
    if let Some(raw) = get("MOODPREP_MAX_DURATION_SECONDS") {
        cfg.max_duration_outlier_seconds = parse_u32("MOODPREP_MAX_DURATION_SECONDS", &raw)?;
    }
    if let Some(raw) = get("MOODPREP_WAKING_HOURS") {
        cfg.waking_hours = parse_u32("MOODPREP_WAKING_HOURS", &raw)?;
    }
    if let Some(raw) = get("MOODPREP_WINDOW_PERIOD") {
        cfg.window_period_days = Some(parse_u32("MOODPREP_WINDOW_PERIOD", &raw)?);
    }
    if let Some(raw) = get("MOODPREP_WINDOW_STRIDE") {
        cfg.window_stride_days = parse_u32("MOODPREP_WINDOW_STRIDE", &raw)?;
    }
    if let Some(raw) = get("MOODPREP_SLEEP_FILL") {
        cfg.sleep_fill = parse_sleep_fill(&raw)?;
    }

    Ok(cfg)
}

fn require_variable(series: &PivotedSeries, variable: &str) -> Result<(), PipelineError> {
    if series.has_variable(variable) {
        Ok(())
    } else {
        Err(PipelineError::SchemaViolation {
            variable: variable.to_string(),
        })
    }
}

fn skip_user(skipped: &mut Vec<SkippedUser>, user_id: &str, reason: SkipReason) {
    warn!(
        component = "reinstance",
        event = "reinstance.user.skipped",
        user_id,
        reason = ?reason
    );
    skipped.push(SkippedUser {
        user_id: user_id.to_string(),
        reason,
    });
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, PipelineError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PipelineError::InvalidConfig(format!(
            "{key} must be a boolean, got '{raw}'"
        ))),
    }
}

fn parse_u32(key: &str, raw: &str) -> Result<u32, PipelineError> {
    raw.parse::<u32>().map_err(|_| {
        PipelineError::InvalidConfig(format!("{key} must be a non-negative integer, got '{raw}'"))
    })
}

// `off`, `on` (22:00-10:00) or `HH:MM-HH:MM`; the window must cover midnight.
fn parse_sleep_fill(raw: &str) -> Result<Option<SleepWindow>, PipelineError> {
    match raw.to_ascii_lowercase().as_str() {
        "off" | "disabled" | "false" | "0" => return Ok(None),
        "on" | "default" | "true" | "1" => return Ok(Some(SleepWindow::default())),
        _ => {}
    }

    let invalid = || {
        PipelineError::InvalidConfig(format!(
            "MOODPREP_SLEEP_FILL must be off, on or HH:MM-HH:MM, got '{raw}'"
        ))
    };
    let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| invalid())?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| invalid())?;
    Ok(Some(SleepWindow { start, end }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = pipeline_config_from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.prune_method, PruneMethod::Longest);
        assert_eq!(cfg.max_duration_outlier_seconds, 18_000);
        assert_eq!(cfg.waking_hours, 16);
        assert_eq!(cfg.window_period_days, None);
        assert_eq!(cfg.window_stride_days, 1);
        assert_eq!(cfg.sleep_fill, None);
    }

    #[test]
    fn parses_every_option() {
        let cfg = pipeline_config_from_lookup(lookup(&[
            ("MOODPREP_PRUNE_METHOD", "LongestInc"),
            ("MOODPREP_COVERAGE_MOOD", "yes"),
            ("MOODPREP_COVERAGE_ACTIVITY", "false"),
            ("MOODPREP_MAX_DURATION_SECONDS", "3600"),
            ("MOODPREP_WAKING_HOURS", "14"),
            ("MOODPREP_WINDOW_PERIOD", "5"),
            ("MOODPREP_WINDOW_STRIDE", "2"),
            ("MOODPREP_SLEEP_FILL", "23:00-07:30"),
        ]))
        .expect("valid env");

        assert_eq!(cfg.prune_method, PruneMethod::LongestInc);
        assert!(cfg.coverage.mood);
        assert!(!cfg.coverage.activity);
        assert_eq!(cfg.max_duration_outlier_seconds, 3_600);
        assert_eq!(cfg.waking_hours, 14);
        assert_eq!(cfg.window_period_days, Some(5));
        assert_eq!(cfg.window_stride_days, 2);
        let window = cfg.sleep_fill.expect("sleep fill on");
        assert_eq!(window.start, NaiveTime::from_hms_opt(23, 0, 0).expect("time"));
        assert_eq!(window.end, NaiveTime::from_hms_opt(7, 30, 0).expect("time"));
    }

    #[test]
    fn invalid_env_values_are_configuration_errors() {
        for (key, value) in [
            ("MOODPREP_PRUNE_METHOD", "random"),
            ("MOODPREP_COVERAGE_MOOD", "maybe"),
            ("MOODPREP_WINDOW_PERIOD", "-1"),
            ("MOODPREP_SLEEP_FILL", "late"),
        ] {
            let err = pipeline_config_from_lookup(lookup(&[(key, value)])).expect_err(key);
            assert!(matches!(err, PipelineError::InvalidConfig(_)), "{key}");
        }
    }

    #[test]
    fn validation_fails_fast_on_bad_config() {
        let missing_period = PipelineConfig::default();
        assert!(matches!(
            validate_config(&missing_period),
            Err(PipelineError::InvalidConfig(_))
        ));

        let no_coverage = PipelineConfig {
            coverage: CoverageRule {
                mood: false,
                activity: false,
            },
            ..PipelineConfig::with_window_period(5)
        };
        assert!(matches!(
            validate_config(&no_coverage),
            Err(PipelineError::InvalidConfig(_))
        ));

        let zero_stride = PipelineConfig {
            window_stride_days: 0,
            ..PipelineConfig::with_window_period(5)
        };
        assert!(matches!(
            validate_config(&zero_stride),
            Err(PipelineError::InvalidConfig(_))
        ));

        let mut daytime_fill = PipelineConfig::with_window_period(5);
        daytime_fill.sleep_fill = pipeline_config_from_lookup(lookup(&[(
            "MOODPREP_SLEEP_FILL",
            "01:00-06:00",
        )]))
        .expect("parses")
        .sleep_fill;
        assert!(matches!(
            validate_config(&daytime_fill),
            Err(PipelineError::InvalidConfig(_))
        ));

        let window = validate_config(&PipelineConfig::with_window_period(5)).expect("valid");
        assert_eq!(window, WindowConfig::new(5));
    }
}
