//! CLI entry point for the buslight monitoring tool.
//!
//! Provides subcommands for bootstrapping the working directories,
//! collecting per-device usage logs into a merged fact table, and running
//! the exposure-normality checks over per-device report files.

mod infra;

use crate::infra::oplog::client::OperationLogClient;
use anyhow::Result;
use buslight_monitor::{
    catalog::{load_dates, load_devices, resolve_report_files},
    download::{AttemptStatus, DownloadMode, build_targets, download_usage_logs, scan_local_files},
    evaluate::{SingleDateCheck, WindowCheck, check_rolling_window, check_single_date},
    extract::{ExposureMode, ExtractError, read_exposure_series},
    fetch::BasicClient,
    merge::build_fact_table,
    oplog::{OperationLogTable, load_operation_log_csv},
    report::{
        RunSummary, append_run_history, timestamped_report_dir, write_fact_report,
        write_normality_report,
    },
};
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "buslight_monitor")]
#[command(about = "Collects buslight usage logs and checks device exposure normality", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the working directories and sample reference files
    Init {
        /// Project base directory
        #[arg(short, long, default_value = ".")]
        base_dir: String,
    },
    /// Download (or scan) usage logs, merge with operation logs, and write the fact-table report
    Collect {
        /// Device catalog CSV
        #[arg(long, default_value = "data/reference/devices.csv")]
        devices: String,

        /// Date list CSV
        #[arg(long, default_value = "data/reference/dates.csv")]
        dates: String,

        /// Directory holding the raw downloaded usage logs
        #[arg(long, default_value = "data/raw/buslight")]
        source_dir: String,

        /// Directory for per-run report folders
        #[arg(short, long, default_value = "output")]
        output_dir: String,

        /// Download from the API instead of scanning local files
        #[arg(long, default_value_t = false)]
        download: bool,

        /// How to treat files already on disk when downloading
        #[arg(long, value_enum, default_value_t = DownloadMode::SkipExisting)]
        download_mode: DownloadMode,

        /// Which raw rows qualify as exposures
        #[arg(long, value_enum, default_value_t = ExposureMode::RowCount)]
        exposure_mode: ExposureMode,

        /// Operation-log CSV export; when absent the HTTP API is used
        #[arg(long)]
        oplog_csv: Option<String>,
    },
    /// Run the single-date and rolling-window exposure checks
    Check {
        /// Device catalog CSV
        #[arg(long, default_value = "data/reference/devices.csv")]
        devices: String,

        /// Directory holding per-device report files
        #[arg(long, default_value = "data/reports")]
        reports_dir: String,

        /// Directory for per-run report folders
        #[arg(short, long, default_value = "output")]
        output_dir: String,

        /// Date the checks evaluate (reference date for the window)
        #[arg(short, long)]
        target_date: NaiveDate,

        /// Minimum exposure count for the single-date check
        #[arg(long, default_value_t = 500)]
        min_exposure: u32,

        /// Rolling window length in days
        #[arg(long, default_value_t = 10)]
        window_days: i64,

        /// Deficient-day count at which the window check fails
        #[arg(long, default_value_t = 3)]
        max_fail_days: u32,

        /// Minimum exposure count for the window check
        #[arg(long, default_value_t = 500)]
        window_min_exposure: u32,

        /// Which raw rows qualify as exposures
        #[arg(long, value_enum, default_value_t = ExposureMode::RowCount)]
        exposure_mode: ExposureMode,

        /// Operation-log CSV export; when absent the HTTP API is used
        #[arg(long)]
        oplog_csv: Option<String>,

        /// Keep only Fail rows in the report tables and CSVs
        #[arg(long, default_value_t = false)]
        failures_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/buslight_monitor.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("buslight_monitor.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { base_dir } => {
            init_workspace(Path::new(&base_dir))?;
        }
        Commands::Collect {
            devices,
            dates,
            source_dir,
            output_dir,
            download,
            download_mode,
            exposure_mode,
            oplog_csv,
        } => {
            collect(
                Path::new(&devices),
                Path::new(&dates),
                Path::new(&source_dir),
                Path::new(&output_dir),
                download,
                download_mode,
                exposure_mode,
                oplog_csv.as_deref().map(Path::new),
            )
            .await?;
        }
        Commands::Check {
            devices,
            reports_dir,
            output_dir,
            target_date,
            min_exposure,
            window_days,
            max_fail_days,
            window_min_exposure,
            exposure_mode,
            oplog_csv,
            failures_only,
        } => {
            let single = SingleDateCheck {
                target_date,
                min_exposure,
            };
            let window = WindowCheck {
                reference_date: target_date,
                window_days,
                max_fail_days,
                min_exposure: window_min_exposure,
            };
            check(
                Path::new(&devices),
                Path::new(&reports_dir),
                Path::new(&output_dir),
                &single,
                &window,
                exposure_mode,
                oplog_csv.as_deref().map(Path::new),
                failures_only,
            )
            .await?;
        }
    }

    Ok(())
}

/// Creates the project directories and, when absent, sample reference
/// files so a first run has something to chew on.
fn init_workspace(base_dir: &Path) -> Result<()> {
    let reference_dir = base_dir.join("data").join("reference");
    let source_dir = base_dir.join("data").join("raw").join("buslight");
    let reports_dir = base_dir.join("data").join("reports");
    let output_dir = base_dir.join("output");

    for dir in [&reference_dir, &source_dir, &reports_dir, &output_dir] {
        std::fs::create_dir_all(dir)?;
    }

    let devices_file = reference_dir.join("devices.csv");
    if !devices_file.exists() {
        let sample = "bus_number,route_code,route_name,ctn,imei,mac,installed_at,updated_at\n\
            seoul74sa1599,104000014,40,01236249809,86301807354296,68:ED:A4:85:D8:FC,,\n\
            seoul74sa5025,104000014,40,01236258954,86301807354646,68:ED:A4:85:DC:52,,\n\
            seoul74sa3483,100100549,100,01236244698,86301807354258,68:ED:A4:85:D7:20,,\n\
            seoul74sa6357,100100549,100,01236243669,86301807354250,68:ED:A4:85:DE:78,,\n";
        std::fs::write(&devices_file, sample)?;
        info!(path = %devices_file.display(), "Sample device catalog written");
    }

    let dates_file = reference_dir.join("dates.csv");
    if !dates_file.exists() {
        std::fs::write(&dates_file, "date\n2025-08-20\n2025-08-21\n")?;
        info!(path = %dates_file.display(), "Sample date list written");
    }

    info!(base = %base_dir.display(), "Workspace ready");
    Ok(())
}

/// Collection pipeline: acquire usage logs, fetch operation logs, merge,
/// and write the fact-table report.
#[tracing::instrument(skip_all, fields(download, mode = ?download_mode))]
async fn collect(
    devices_path: &Path,
    dates_path: &Path,
    source_dir: &Path,
    output_dir: &Path,
    download: bool,
    download_mode: DownloadMode,
    exposure_mode: ExposureMode,
    oplog_csv: Option<&Path>,
) -> Result<()> {
    let started = std::time::Instant::now();

    let devices = load_devices(devices_path)?;
    let dates = load_dates(dates_path)?;
    let targets = build_targets(&devices, &dates);

    let attempts = if download {
        let endpoint = std::env::var("BUSLIGHT_API_ENDPOINT")
            .expect("BUSLIGHT_API_ENDPOINT must be set when downloading");
        let client = BasicClient::new()?;
        download_usage_logs(&client, &endpoint, source_dir, &targets, download_mode).await?
    } else {
        info!("Local analysis mode: scanning existing files");
        scan_local_files(source_dir, &targets)
    };

    let statuses = load_operation_table(oplog_csv, &dates).await;
    info!(records = statuses.len(), "Operation log table ready");

    let facts = build_fact_table(&attempts, &statuses, exposure_mode);

    let summary = RunSummary {
        total_attempts: attempts.len(),
        success: attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Success)
            .count(),
        skipped: attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Skipped)
            .count(),
        failure: attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Failure)
            .count(),
        total_exposure: facts
            .iter()
            .flat_map(|d| d.rows.iter())
            .map(|r| r.exposure_count as u64)
            .sum(),
        duration_secs: started.elapsed().as_secs_f64(),
    };

    let report_dir = timestamped_report_dir(output_dir, "collect")?;
    write_fact_report(&report_dir, &facts, &summary)?;
    append_run_history(&output_dir.join("run_history.csv"), &summary)?;

    info!(dir = %report_dir.display(), "Collection run complete");
    Ok(())
}

/// Normality pipeline: evaluate every cataloged device on the target date
/// and over the trailing window, then write the normality report.
#[tracing::instrument(skip_all, fields(target_date = %single.target_date))]
async fn check(
    devices_path: &Path,
    reports_dir: &Path,
    output_dir: &Path,
    single: &SingleDateCheck,
    window: &WindowCheck,
    exposure_mode: ExposureMode,
    oplog_csv: Option<&Path>,
    failures_only: bool,
) -> Result<()> {
    let devices = load_devices(devices_path)?;
    let resolved = resolve_report_files(&devices, reports_dir)?;

    // Every date the window check can touch, reference date included.
    let window_dates: Vec<NaiveDate> = (0..window.window_days)
        .map(|i| window.reference_date - Duration::days(i))
        .collect();
    let statuses = load_operation_table(oplog_csv, &window_dates).await;
    info!(records = statuses.len(), "Operation log table ready");

    let mut task1 = Vec::with_capacity(resolved.len());
    let mut task2 = Vec::with_capacity(resolved.len());

    for report in &resolved {
        let series = if report.exists {
            read_exposure_series(&report.path, exposure_mode)
        } else {
            Err(ExtractError::FileMissing)
        };

        let single_result = check_single_date(report, &series, &statuses, single);
        info!(
            bus = %report.device.bus_number,
            outcome = ?single_result.outcome,
            detail = %single_result.detail,
            "Single-date check"
        );
        task1.push(single_result);

        let window_result = check_rolling_window(report, &series, &statuses, window);
        info!(
            bus = %report.device.bus_number,
            outcome = ?window_result.outcome,
            detail = %window_result.detail,
            "Rolling-window check"
        );
        task2.push(window_result);
    }

    let report_dir = timestamped_report_dir(output_dir, "normality")?;
    write_normality_report(
        &report_dir,
        &resolved,
        single,
        window,
        &task1,
        &task2,
        failures_only,
    )?;

    info!(dir = %report_dir.display(), "Normality check complete");
    Ok(())
}

/// Resolves the operation-log table from the configured source. Retrieval
/// problems degrade to an empty table so the run continues with every
/// status resolving to undetermined.
async fn load_operation_table(oplog_csv: Option<&Path>, dates: &[NaiveDate]) -> OperationLogTable {
    if let Some(path) = oplog_csv {
        match load_operation_log_csv(path) {
            Ok(records) => {
                info!(records = records.len(), path = %path.display(), "Operation log loaded from CSV");
                return OperationLogTable::from_records(&records);
            }
            Err(e) => {
                error!(error = %e, "Operation log CSV unreadable, continuing without statuses");
                return OperationLogTable::empty();
            }
        }
    }

    match (
        std::env::var("OPLOG_API_URL"),
        std::env::var("OPLOG_API_TOKEN"),
    ) {
        (Ok(url), Ok(token)) => {
            let client = OperationLogClient::new(url, token);
            match client.fetch_operation_logs(dates).await {
                Ok(records) => {
                    info!(records = records.len(), "Operation log fetched from API");
                    OperationLogTable::from_records(&records)
                }
                Err(e) => {
                    error!(error = %e, "Operation log fetch failed, continuing without statuses");
                    OperationLogTable::empty()
                }
            }
        }
        _ => {
            warn!("No operation log source configured; all statuses will be undetermined");
            OperationLogTable::empty()
        }
    }
}
