//! Exposure extraction from raw per-device usage-log files.
//!
//! A raw log file is a row-oriented CSV with at least a `date` column. All
//! rows sharing a date are reduced to a single exposure count, under one of
//! two qualifying predicates selected per deployment (never both at once).

use chrono::NaiveDate;
use clap::ValueEnum;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::ops::Bound::{Excluded, Included};
use std::path::Path;

/// Which rows of a raw log qualify as exposures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExposureMode {
    /// Every raw row counts as one exposure.
    RowCount,
    /// Only rows whose `watched_time` parses as a number strictly greater
    /// than 1 count; unparseable values are non-qualifying, not errors.
    WatchedTime,
}

/// Why a device's series could not be produced. Both cases are contained
/// at device granularity and surface as evaluation outcomes, never as
/// batch-aborting errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    FileMissing,
    Processing(String),
}

pub type SeriesResult = Result<ExposureSeries, ExtractError>;

/// Date-ordered exposure counts for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExposureSeries(BTreeMap<NaiveDate, u32>);

impl ExposureSeries {
    pub fn from_counts(counts: BTreeMap<NaiveDate, u32>) -> Self {
        Self(counts)
    }

    pub fn count_on(&self, date: NaiveDate) -> Option<u32> {
        self.0.get(&date).copied()
    }

    /// Records in the half-open window `(start, end]`.
    pub fn window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = (NaiveDate, u32)> + '_ {
        self.0
            .range((Excluded(start), Included(end)))
            .map(|(d, c)| (*d, *c))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Reads a raw log file and reduces it to per-date exposure counts.
///
/// Re-reading the same file yields the same series. A missing file maps to
/// [`ExtractError::FileMissing`]; any other read or parse problem maps to
/// [`ExtractError::Processing`] with the underlying cause text.
pub fn read_exposure_series(path: &Path, mode: ExposureMode) -> SeriesResult {
    let file = std::fs::File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            ExtractError::FileMissing
        } else {
            ExtractError::Processing(e.to_string())
        }
    })?;

    let mut rdr = csv::Reader::from_reader(file);

    let headers = rdr
        .headers()
        .map_err(|e| ExtractError::Processing(e.to_string()))?
        .clone();
    let date_idx = headers
        .iter()
        .position(|h| h == "date")
        .ok_or_else(|| ExtractError::Processing("missing 'date' column".to_string()))?;
    let watched_idx = headers.iter().position(|h| h == "watched_time");

    if mode == ExposureMode::WatchedTime && watched_idx.is_none() {
        return Err(ExtractError::Processing(
            "missing 'watched_time' column".to_string(),
        ));
    }

    let mut counts: BTreeMap<NaiveDate, u32> = BTreeMap::new();

    for row in rdr.records() {
        let row = row.map_err(|e| ExtractError::Processing(e.to_string()))?;
        let raw_date = row.get(date_idx).unwrap_or("");
        let date = parse_log_date(raw_date)
            .ok_or_else(|| ExtractError::Processing(format!("bad date value '{raw_date}'")))?;

        let qualifies = match mode {
            ExposureMode::RowCount => true,
            ExposureMode::WatchedTime => {
                let field = watched_idx.and_then(|i| row.get(i)).unwrap_or("");
                matches!(field.trim().parse::<f64>(), Ok(v) if v > 1.0)
            }
        };

        let slot = counts.entry(date).or_insert(0);
        if qualifies {
            *slot += 1;
        }
    }

    Ok(ExposureSeries(counts))
}

/// Parses a `YYYY-MM-DD` date, tolerating a trailing time component.
fn parse_log_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
