use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use moodprep::{
    init_logging, load_pivoted, log_app_start, log_output_written, logging_config_from_env,
    pipeline_config_from_env, run_pipeline, write_feature_table_csv,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let input_path = std::env::var("MOODPREP_INPUT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/dataset_mood_smartphone.csv"));
    let output_path = std::env::var("MOODPREP_OUTPUT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/reinstanced.csv"));
    let report_path = std::env::var("MOODPREP_REPORT").ok().map(PathBuf::from);

    let cfg = pipeline_config_from_env()?;
    let (raw, load_report) = load_pivoted(&input_path)?;

    println!(
        "Loaded {} | observations={} skipped_rows={} users={} variables={}",
        input_path.display(),
        load_report.observations,
        load_report.skipped_rows,
        raw.users.len(),
        raw.variables.len()
    );

    let (table, report) = run_pipeline(&raw, &cfg)?;

    let writer = BufWriter::new(File::create(&output_path)?);
    write_feature_table_csv(&table, writer)?;
    log_output_written(&output_path, table.records.len());

    if let Some(path) = report_path {
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, &report)?;
    }

    for skipped in &report.skipped_users {
        println!(
            "  {} cannot provide sub-users in ranges ({:?})",
            skipped.user_id, skipped.reason
        );
    }
    println!(
        "Wrote {} | records={} users_emitted={} users_skipped={} schema={}",
        output_path.display(),
        report.records,
        report.users_emitted,
        report.skipped_users.len(),
        table.schema.fingerprint
    );

    Ok(())
}
