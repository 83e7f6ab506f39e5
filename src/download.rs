//! Usage-log acquisition: per-target API downloads or a local directory
//! scan, both producing the same attempt records the fact-table merger
//! consumes.
//!
//! Downloaded files land under `<source_dir>/<route_name>/` as
//! `{date}_{ctn}_{imei}_{mac}.csv`. One bad target never stops the batch;
//! it becomes a `Failure` attempt with the cause recorded.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalog::Device;
use crate::fetch::{HttpClient, post_form_bytes};

/// How the downloader treats already-present files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DownloadMode {
    /// Wipe the source directory and download everything fresh.
    OverwriteAll,
    /// Keep existing files, recording them as `Skipped` attempts.
    SkipExisting,
}

/// Outcome of one download or scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptStatus {
    Success,
    Skipped,
    Failure,
}

/// One (device, date) acquisition target.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub device: Device,
    pub date: NaiveDate,
}

impl DownloadTarget {
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.csv",
            self.date,
            self.device.ctn,
            self.device.imei,
            self.device.mac_compact()
        )
    }

    pub fn file_path(&self, source_dir: &Path) -> PathBuf {
        source_dir
            .join(&self.device.route_name)
            .join(self.file_name())
    }
}

/// One (device, date) attempt outcome, the merger's input row.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadAttempt {
    pub bus_number: String,
    pub route_name: String,
    pub date: NaiveDate,
    pub mac: String,
    pub ctn: String,
    pub imei: String,
    pub file_name: String,
    pub file_path: Option<PathBuf>,
    pub status: AttemptStatus,
    pub reason: String,
}

impl DownloadAttempt {
    fn pending(target: &DownloadTarget) -> Self {
        Self {
            bus_number: target.device.bus_number.clone(),
            route_name: target.device.route_name.clone(),
            date: target.date,
            mac: target.device.mac.clone(),
            ctn: target.device.ctn.clone(),
            imei: target.device.imei.clone(),
            file_name: target.file_name(),
            file_path: None,
            status: AttemptStatus::Failure,
            reason: String::new(),
        }
    }
}

/// Expands the device catalog against the date list into acquisition
/// targets, one per (device, date).
pub fn build_targets(devices: &[Device], dates: &[NaiveDate]) -> Vec<DownloadTarget> {
    let mut targets = Vec::with_capacity(devices.len() * dates.len());
    for device in devices {
        for date in dates {
            targets.push(DownloadTarget {
                device: device.clone(),
                date: *date,
            });
        }
    }
    targets
}

/// Downloads every target from the usage-log API, sequentially.
#[tracing::instrument(skip(client, targets), fields(endpoint, mode = ?mode, targets = targets.len()))]
pub async fn download_usage_logs<C: HttpClient>(
    client: &C,
    endpoint: &str,
    source_dir: &Path,
    targets: &[DownloadTarget],
    mode: DownloadMode,
) -> Result<Vec<DownloadAttempt>> {
    if mode == DownloadMode::OverwriteAll && source_dir.exists() {
        info!(dir = %source_dir.display(), "Overwrite mode: clearing source directory");
        fs::remove_dir_all(source_dir)
            .with_context(|| format!("cannot clear {}", source_dir.display()))?;
    }
    fs::create_dir_all(source_dir)
        .with_context(|| format!("cannot create {}", source_dir.display()))?;

    let total = targets.len();
    let mut attempts = Vec::with_capacity(total);

    for (i, target) in targets.iter().enumerate() {
        let mut attempt = DownloadAttempt::pending(target);
        let file_path = target.file_path(source_dir);

        if mode == DownloadMode::SkipExisting && file_path.exists() {
            info!(
                progress = format!("{}/{total}", i + 1),
                file = %attempt.file_name,
                "File already present, skipping"
            );
            attempt.status = AttemptStatus::Skipped;
            attempt.file_path = Some(file_path);
            attempts.push(attempt);
            continue;
        }

        info!(
            progress = format!("{}/{total}", i + 1),
            route = %attempt.route_name,
            date = %attempt.date,
            mac = %attempt.mac,
            "Downloading usage log"
        );

        match fetch_one(client, endpoint, target, &file_path).await {
            Ok(()) => {
                attempt.status = AttemptStatus::Success;
                attempt.file_path = Some(file_path);
            }
            Err(e) => {
                warn!(file = %attempt.file_name, error = %e, "Download failed, continuing");
                attempt.status = AttemptStatus::Failure;
                attempt.reason = e.to_string();
            }
        }
        attempts.push(attempt);
    }

    info!(attempts = attempts.len(), "Download pass complete");
    Ok(attempts)
}

async fn fetch_one<C: HttpClient>(
    client: &C,
    endpoint: &str,
    target: &DownloadTarget,
    file_path: &Path,
) -> Result<()> {
    let form = vec![
        ("date".to_string(), target.date.to_string()),
        ("mac".to_string(), target.device.mac.clone()),
        ("ctn".to_string(), target.device.ctn.clone()),
        ("imei".to_string(), target.device.imei.clone()),
    ];

    let bytes = post_form_bytes(client, endpoint, &form).await?;

    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(file_path, bytes)?;
    Ok(())
}

/// Marks each target `Success` or `Failure` from what is already on disk,
/// for runs that analyze previously downloaded data.
#[tracing::instrument(skip(targets), fields(targets = targets.len()))]
pub fn scan_local_files(source_dir: &Path, targets: &[DownloadTarget]) -> Vec<DownloadAttempt> {
    let total = targets.len();
    let mut attempts = Vec::with_capacity(total);

    for (i, target) in targets.iter().enumerate() {
        let mut attempt = DownloadAttempt::pending(target);
        let file_path = target.file_path(source_dir);

        if file_path.exists() {
            info!(progress = format!("{}/{total}", i + 1), file = %attempt.file_name, "File found");
            attempt.status = AttemptStatus::Success;
            attempt.file_path = Some(file_path);
        } else {
            info!(progress = format!("{}/{total}", i + 1), file = %attempt.file_name, "File not found");
            attempt.status = AttemptStatus::Failure;
            attempt.reason = "file not found locally".to_string();
        }
        attempts.push(attempt);
    }

    info!(attempts = attempts.len(), "Local scan complete");
    attempts
}
