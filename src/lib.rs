//! moodprep core crate.
//!
//! Turns irregular per-user smartphone and mood observations into aligned
//! daily series and sliding-window "sub-user" feature records:
//! - loading and pivoting of the long-format observation CSV
//! - usage-time outlier correction
//! - daily/hourly resampling under a per-variable aggregation policy
//! - coverage range detection and day selection
//! - sliding-window feature generation with a next-day mood label

mod coverage;
mod loader;
mod observability;
mod outliers;
mod pipeline;
mod prune;
mod reinstance;
mod resample;
mod series;

pub use coverage::{
    contiguous_ranges, find_coverage_ranges, CoverageError, CoverageRule, DateRange, DayCoverage,
    UserCoverage, UserRanges,
};
pub use loader::{load_observations, load_pivoted, read_observations, LoadError, LoadReport};
pub use observability::{
    init_logging, log_app_start, log_output_written, logging_config_from_env,
    logging_config_from_lookup, LogFormat, LoggingConfig, LoggingInitError,
};
pub use outliers::{remove_use_time_outliers, DEFAULT_MAX_DURATION_SECONDS};
pub use pipeline::{
    pipeline_config_from_env, pipeline_config_from_lookup, run_pipeline, validate_config,
    PipelineConfig, PipelineError, PipelineReport, SkipReason, SkippedUser,
};
pub use prune::{longest_range, prune_days, PruneError, PruneMethod, PrunedSeries};
pub use reinstance::{
    assert_schema_compatible, build_feature_schema, generate_sub_users, write_feature_table_csv,
    FeatureColumn, FeatureDType, FeatureSchema, FeatureTable, SubUserRecord, WindowConfig,
    WindowError, FEATURE_SCHEMA_VERSION, LABEL_COLUMN,
};
pub use resample::{
    daily_coverage_view, resample_daily, resample_hourly, Aggregation, AggregationPolicy,
    ResampleConfig, ResampleError, SleepWindow, DEFAULT_WAKING_HOURS,
};
pub use series::{
    is_daily_total_variable, is_duration_variable, Cadence, PivotedSeries, RawObservation,
    SeriesRow, UserSeries, ACTIVITY, APP_CATEGORY_PREFIX, CALL, MOOD, SCREEN, SMS,
};
