//! Run reports: step-time log export and the printed summary.
//!
//! The step-time log is a tab-separated file with one row per step, written
//! with the `csv` crate when the `storage_csv` feature is enabled (default).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, HandlerError};
use crate::sequencer::RunSummary;

/// Header of the step-time log
pub const STEP_LOG_HEADER: [&str; 5] = ["STEP", "execution", "description", "wait_time", "execution_time"];

fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => {
            let secs = d.as_secs();
            format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
        }
        None => String::new(),
    }
}

/// Write `time_log_<timestamp>.txt` into `output_dir` and return its path.
#[cfg(feature = "storage_csv")]
pub fn write_step_log(summary: &RunSummary, output_dir: &Path) -> AppResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!(
        "time_log_{}.txt",
        summary.started_at.format("%Y%m%d_%H%M%S")
    ));

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&path)?;
    writer.write_record(STEP_LOG_HEADER)?;
    for step in &summary.steps {
        writer.write_record([
            step.ordinal.to_string(),
            if step.executed { "yes" } else { "no" }.to_string(),
            step.description.clone(),
            format_duration(step.wait_time),
            format_duration(step.elapsed),
        ])?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), "Step time log written");
    Ok(path)
}

/// Always fails: the step log needs the `storage_csv` feature.
#[cfg(not(feature = "storage_csv"))]
pub fn write_step_log(_summary: &RunSummary, _output_dir: &Path) -> AppResult<PathBuf> {
    Err(HandlerError::Report(
        "Step log export requires the 'storage_csv' feature".to_string(),
    ))
}

/// Human-readable end-of-run summary.
pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run {} finished in {:.1} s", summary.run_id, summary.elapsed.as_secs_f64());
    let _ = writeln!(
        out,
        "Steps executed: {}/{}",
        summary.executed_steps().count(),
        summary.steps.len()
    );
    for tips in &summary.tips {
        let _ = writeln!(
            out,
            "{} pipette: {} tips used, {} rack refills",
            tips.mount, tips.total_consumed, tips.refills
        );
    }
    for reagent in &summary.reagents {
        let _ = writeln!(
            out,
            "{}: {:.1} uL used from {}/{} columns, {:.1} uL left unused",
            reagent.reagent,
            reagent.volume_used,
            reagent.columns_used,
            reagent.columns_provisioned,
            reagent.unused_volume
        );
    }
    let _ = writeln!(
        out,
        "Total: {} tips, {} refills, {:.1} uL reagent",
        summary.total_tips_consumed(),
        summary.total_refills(),
        summary.total_volume_used()
    );
    out
}

/// Summary as pretty-printed JSON.
pub fn summary_json(summary: &RunSummary) -> AppResult<String> {
    serde_json::to_string_pretty(summary).map_err(|e| HandlerError::Report(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Some(Duration::from_secs(3725))), "1:02:05");
        assert_eq!(format_duration(None), "");
    }
}
