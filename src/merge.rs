//! Fact-table merge: download/scan attempts joined with operational
//! status into one row per (device, date).
//!
//! Rows are grouped by device in first-appearance order and date-ordered
//! within a device, which is what the per-device report CSVs and any
//! plotting consumer expect.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::download::{AttemptStatus, DownloadAttempt};
use crate::extract::{ExposureMode, read_exposure_series};
use crate::oplog::{OperationStatus, OperationStatusSource};

/// One merged fact per (device, date).
#[derive(Debug, Clone, Serialize)]
pub struct FactRow {
    pub bus_number: String,
    pub route_name: String,
    pub mac: String,
    pub date: NaiveDate,
    pub status: AttemptStatus,
    pub exposure_count: u32,
    pub operation: OperationStatus,
    /// Charting hints only; the decision fields are the ones above.
    pub status_code: u8,
    pub operating_code: f32,
}

/// All facts for one device, date-ordered.
#[derive(Debug, Clone)]
pub struct DeviceFacts {
    pub bus_number: String,
    pub mac: String,
    pub rows: Vec<FactRow>,
}

pub fn status_code(status: AttemptStatus) -> u8 {
    match status {
        AttemptStatus::Success | AttemptStatus::Skipped => 1,
        AttemptStatus::Failure => 0,
    }
}

pub fn operating_code(status: OperationStatus) -> f32 {
    match status {
        OperationStatus::Operating => 1.0,
        OperationStatus::NotOperating => 0.5,
        OperationStatus::Undetermined => 0.0,
    }
}

/// Builds the fact table from attempt records and the operation-log
/// lookup. Every attempt yields exactly one row; a failed attempt pins the
/// exposure count to 0 no matter what is on disk, and an unreadable file
/// on a successful attempt degrades to 0 with a warning rather than
/// aborting the batch.
#[tracing::instrument(skip_all, fields(attempts = attempts.len()))]
pub fn build_fact_table(
    attempts: &[DownloadAttempt],
    statuses: &dyn OperationStatusSource,
    mode: ExposureMode,
) -> Vec<DeviceFacts> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, DeviceFacts> = HashMap::new();

    for attempt in attempts {
        let operation = statuses.status_for(&attempt.bus_number, attempt.date);

        let exposure_count = match (attempt.status, &attempt.file_path) {
            (AttemptStatus::Failure, _) | (_, None) => 0,
            (_, Some(path)) => match read_exposure_series(path, mode) {
                Ok(series) => series.count_on(attempt.date).unwrap_or(0),
                Err(e) => {
                    warn!(file = %path.display(), error = ?e, "Exposure count unavailable, using 0");
                    0
                }
            },
        };

        let row = FactRow {
            bus_number: attempt.bus_number.clone(),
            route_name: attempt.route_name.clone(),
            mac: attempt.mac.clone(),
            date: attempt.date,
            status: attempt.status,
            exposure_count,
            operation,
            status_code: status_code(attempt.status),
            operating_code: operating_code(operation),
        };

        grouped
            .entry(attempt.mac.clone())
            .or_insert_with(|| {
                order.push(attempt.mac.clone());
                DeviceFacts {
                    bus_number: attempt.bus_number.clone(),
                    mac: attempt.mac.clone(),
                    rows: Vec::new(),
                }
            })
            .rows
            .push(row);
    }

    let mut facts: Vec<DeviceFacts> = order
        .into_iter()
        .map(|mac| grouped.remove(&mac).expect("grouped by construction"))
        .collect();
    for device in &mut facts {
        device.rows.sort_by_key(|r| r.date);
    }

    let undetermined: usize = facts
        .iter()
        .flat_map(|d| d.rows.iter())
        .filter(|r| r.operation == OperationStatus::Undetermined)
        .count();
    info!(devices = facts.len(), undetermined, "Fact table built");

    facts
}
