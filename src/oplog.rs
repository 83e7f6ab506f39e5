//! Operational-status records and the lookup seam the evaluators consume.
//!
//! The upstream operations service records, per bus and date, whether the
//! vehicle ran during the morning, lunch, and dinner shifts. A bus counts
//! as operating for the day when any shift flag is set. Absence of a
//! record is a valid state and resolves to [`OperationStatus::Undetermined`].

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Resolved operational status for a (bus, date) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationStatus {
    Operating,
    NotOperating,
    /// No operation-log record matched; the sentinel, never an error.
    Undetermined,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Operating => "operating",
            OperationStatus::NotOperating => "not operating",
            OperationStatus::Undetermined => "undetermined",
        };
        f.write_str(s)
    }
}

/// One record from the operations log export.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationLogRecord {
    pub bus_number: String,
    pub operation_date: NaiveDate,
    pub is_morning_operating: u8,
    pub is_lunch_operating: u8,
    pub is_dinner_operating: u8,
}

impl OperationLogRecord {
    pub fn is_operating(&self) -> bool {
        self.is_morning_operating == 1
            || self.is_lunch_operating == 1
            || self.is_dinner_operating == 1
    }
}

/// Keyed lookup `(bus number, date) -> operational status`.
pub trait OperationStatusSource {
    fn status_for(&self, bus_number: &str, date: NaiveDate) -> OperationStatus;
}

/// In-memory operation-log table built from fetched or loaded records.
#[derive(Debug, Default)]
pub struct OperationLogTable {
    entries: HashMap<(String, NaiveDate), bool>,
}

impl OperationLogTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(records: &[OperationLogRecord]) -> Self {
        let entries = records
            .iter()
            .map(|r| ((r.bus_number.clone(), r.operation_date), r.is_operating()))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OperationStatusSource for OperationLogTable {
    fn status_for(&self, bus_number: &str, date: NaiveDate) -> OperationStatus {
        match self.entries.get(&(bus_number.to_string(), date)) {
            Some(true) => OperationStatus::Operating,
            Some(false) => OperationStatus::NotOperating,
            None => OperationStatus::Undetermined,
        }
    }
}

/// Loads operation-log records from a CSV export, for offline runs.
pub fn load_operation_log_csv(path: &Path) -> Result<Vec<OperationLogRecord>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("operation log not readable: {}", path.display()))?;

    let mut records = Vec::new();
    for row in rdr.deserialize() {
        let record: OperationLogRecord =
            row.with_context(|| format!("bad operation log row in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}
