//! Report rendering: Markdown summaries plus CSV detail files.
//!
//! The structured results stay authoritative; everything here is a
//! rendering of fields the evaluators and the merger already exposed.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog::{ResolvedReport, sanitize};
use crate::evaluate::{Evaluation, Outcome, SingleDateCheck, WindowCheck};
use crate::merge::DeviceFacts;
use crate::oplog::OperationStatus;

/// Appends a serializable record as a row to a CSV file. The header row is
/// written only when the file is created, so repeated appends stay valid CSV.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// Writes a full CSV file (headers + rows) in one pass.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Creates `<output_root>/<prefix>_<local timestamp>/` for this run.
pub fn timestamped_report_dir(output_root: &Path, prefix: &str) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let dir = output_root.join(format!("{prefix}_{stamp}"));
    fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create report dir {}", dir.display()))?;
    info!(dir = %dir.display(), "Report directory created");
    Ok(dir)
}

/// Normality report: a Markdown overview plus `report_task1.csv` and
/// `report_task2.csv` with the structured evaluation rows. With
/// `failures_only`, the result tables and CSVs keep only `Fail` rows
/// (the data-integrity variant run after a collection pass).
pub fn write_normality_report(
    dir: &Path,
    resolved: &[ResolvedReport],
    single_check: &SingleDateCheck,
    window_check: &WindowCheck,
    task1: &[Evaluation],
    task2: &[Evaluation],
    failures_only: bool,
) -> Result<()> {
    let task1_rows = filter_rows(task1, failures_only);
    let task2_rows = filter_rows(task2, failures_only);

    let mut md = String::new();
    let now = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(md, "# Exposure normality report - {now}\n")?;

    writeln!(md, "## 1. Report file availability\n")?;
    writeln!(md, "| Bus | MAC | File | Status |")?;
    writeln!(md, "|---|---|---|---|")?;
    for r in resolved {
        let status = if r.exists { "present" } else { "missing" };
        writeln!(
            md,
            "| {} | {} | {} | {} |",
            r.device.bus_number,
            r.device.mac,
            r.device.report_file_name(),
            status
        )?;
    }

    let suffix = if failures_only { " (failures only)" } else { "" };

    writeln!(md, "\n## 2. Task 1: single-date exposure check{suffix}\n")?;
    writeln!(md, "- Target date: `{}`", single_check.target_date)?;
    writeln!(md, "- Minimum exposure_count: `{}`\n", single_check.min_exposure)?;
    write_result_table(&mut md, &task1_rows)?;

    writeln!(md, "\n## 3. Task 2: low-exposure period check{suffix}\n")?;
    writeln!(md, "- Reference date: `{}`", window_check.reference_date)?;
    writeln!(md, "- Window length: `{}` days", window_check.window_days)?;
    writeln!(md, "- Allowed deficient days: `{}`", window_check.max_fail_days)?;
    writeln!(md, "- Minimum exposure_count: `{}`\n", window_check.min_exposure)?;
    write_result_table(&mut md, &task2_rows)?;

    writeln!(md, "\n## 4. Detail files\n")?;
    writeln!(md, "- Task 1 details: [`report_task1.csv`](./report_task1.csv)")?;
    writeln!(md, "- Task 2 details: [`report_task2.csv`](./report_task2.csv)")?;

    fs::write(dir.join("report.md"), md)?;
    write_csv(&dir.join("report_task1.csv"), &task1_rows)?;
    write_csv(&dir.join("report_task2.csv"), &task2_rows)?;

    info!(dir = %dir.display(), "Normality report written");
    Ok(())
}

fn filter_rows(rows: &[Evaluation], failures_only: bool) -> Vec<Evaluation> {
    rows.iter()
        .filter(|r| !failures_only || r.outcome == Outcome::Fail)
        .cloned()
        .collect()
}

fn write_result_table(md: &mut String, rows: &[Evaluation]) -> Result<()> {
    writeln!(md, "| Bus | MAC | Result |")?;
    writeln!(md, "|---|---|---|")?;
    for row in rows {
        writeln!(md, "| {} | {} | {} |", row.bus_number, row.mac, row.detail)?;
    }
    Ok(())
}

/// A (bus, date) pair whose operational status could not be determined.
#[derive(Debug, Serialize)]
struct JudgementFailure {
    bus_number: String,
    date: NaiveDate,
}

/// Headline numbers for `summary.md` and the cumulative run history.
#[derive(Debug)]
pub struct RunSummary {
    pub total_attempts: usize,
    pub success: usize,
    pub skipped: usize,
    pub failure: usize,
    pub total_exposure: u64,
    pub duration_secs: f64,
}

/// One row of `run_history.csv`, appended per collection run.
#[derive(Debug, Serialize)]
struct RunRecord {
    timestamp: DateTime<Utc>,
    total_attempts: usize,
    success: usize,
    skipped: usize,
    failure: usize,
    total_exposure: u64,
    duration_secs: f64,
}

/// Appends this run's headline numbers to the cumulative history file
/// kept next to the per-run report folders.
pub fn append_run_history(path: &Path, summary: &RunSummary) -> Result<()> {
    let record = RunRecord {
        timestamp: Utc::now(),
        total_attempts: summary.total_attempts,
        success: summary.success,
        skipped: summary.skipped,
        failure: summary.failure,
        total_exposure: summary.total_exposure,
        duration_secs: summary.duration_secs,
    };
    append_record(path, &record)?;
    info!(path = %path.display(), "Run history appended");
    Ok(())
}

/// The per-device CSV row handed to the plotting consumer; the remaining
/// [`crate::merge::FactRow`] fields stay structured in memory.
#[derive(Debug, Serialize)]
struct DeviceReportRow {
    date: NaiveDate,
    status: crate::download::AttemptStatus,
    exposure_count: u32,
    operation: OperationStatus,
}

/// Fact-table report: one CSV per device (date-ordered rows for the
/// plotting consumer), a list of undetermined (bus, date) pairs, and a
/// Markdown run summary.
pub fn write_fact_report(dir: &Path, facts: &[DeviceFacts], summary: &RunSummary) -> Result<()> {
    let devices_dir = dir.join("devices");
    fs::create_dir_all(&devices_dir)?;

    for device in facts {
        let file_name = format!(
            "{}_{}.csv",
            sanitize(&device.bus_number),
            sanitize(&device.mac)
        );
        let rows: Vec<DeviceReportRow> = device
            .rows
            .iter()
            .map(|row| DeviceReportRow {
                date: row.date,
                status: row.status,
                exposure_count: row.exposure_count,
                operation: row.operation,
            })
            .collect();
        write_csv(&devices_dir.join(file_name), &rows)?;
    }

    let failures: Vec<JudgementFailure> = facts
        .iter()
        .flat_map(|dev| dev.rows.iter())
        .filter(|row| row.operation == OperationStatus::Undetermined)
        .map(|row| JudgementFailure {
            bus_number: row.bus_number.clone(),
            date: row.date,
        })
        .collect();
    if !failures.is_empty() {
        write_csv(&dir.join("judgement_failures.csv"), &failures)?;
        info!(count = failures.len(), "Undetermined status list written");
    }

    let now = Local::now().format("%Y-%m-%d %H:%M:%S");
    let md = format!(
        "# Run summary\n\
         - Generated at: {now}\n\
         - Total duration: {:.2} s\n\
         \n\
         ## Acquisition\n\
         - Attempted files: {}\n\
         - Success: {}\n\
         - Skipped (already present): {}\n\
         - Failure: {}\n\
         \n\
         ## Data\n\
         - Total exposure count collected: {}\n",
        summary.duration_secs,
        summary.total_attempts,
        summary.success,
        summary.skipped,
        summary.failure,
        summary.total_exposure,
    );
    fs::write(dir.join("summary.md"), md)?;

    info!(devices = facts.len(), dir = %dir.display(), "Fact-table report written");
    Ok(())
}
