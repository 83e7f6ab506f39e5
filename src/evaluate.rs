//! Exposure-normality evaluation: single-date threshold check and
//! rolling-window deficient-day check.
//!
//! Both evaluators gate on operational status through the same policy:
//! a device that was not operating (or whose status could not be
//! determined) is excluded from analysis for that day and can never fail
//! a threshold it had no chance to meet.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::catalog::ResolvedReport;
use crate::extract::{ExtractError, SeriesResult};
use crate::oplog::{OperationStatus, OperationStatusSource};

/// Outcome kind of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Pass,
    Fail,
    NoDataForDate,
    ExcludedNotOperating,
    FileMissing,
    ProcessingError,
}

/// Structured result of one evaluation, serialized directly into the
/// report CSVs. `detail` is rendering sugar; consumers branch on the
/// structured fields.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub bus_number: String,
    pub mac: String,
    pub target_date: NaiveDate,
    pub min_exposure: u32,
    pub outcome: Outcome,
    pub exposure_count: Option<u32>,
    pub operation: Option<OperationStatus>,
    /// Deficient-day count; only set by the rolling-window check.
    pub deficient_days: Option<u32>,
    pub detail: String,
}

/// Parameters of the single-date check.
#[derive(Debug, Clone, Copy)]
pub struct SingleDateCheck {
    pub target_date: NaiveDate,
    pub min_exposure: u32,
}

/// Parameters of the rolling-window check. The window is the half-open
/// interval `(reference_date - window_days, reference_date]`.
#[derive(Debug, Clone, Copy)]
pub struct WindowCheck {
    pub reference_date: NaiveDate,
    pub window_days: i64,
    pub max_fail_days: u32,
    pub min_exposure: u32,
}

/// Shared gate-then-compare policy. Only an operating device is measured
/// against the threshold; the bound is inclusive.
pub fn gate_and_compare(status: OperationStatus, count: u32, threshold: u32) -> Outcome {
    if status != OperationStatus::Operating {
        return Outcome::ExcludedNotOperating;
    }
    if count >= threshold {
        Outcome::Pass
    } else {
        Outcome::Fail
    }
}

/// Evaluates one device's exposure count on exactly one date.
///
/// Precedence: file missing > no data for the date > operating-status
/// gate > threshold comparison.
pub fn check_single_date(
    report: &ResolvedReport,
    series: &SeriesResult,
    statuses: &dyn OperationStatusSource,
    check: &SingleDateCheck,
) -> Evaluation {
    let mut result = Evaluation {
        bus_number: report.device.bus_number.clone(),
        mac: report.device.mac.clone(),
        target_date: check.target_date,
        min_exposure: check.min_exposure,
        outcome: Outcome::ProcessingError,
        exposure_count: None,
        operation: None,
        deficient_days: None,
        detail: String::new(),
    };

    let series = match series_or_outcome(report, series, &mut result) {
        Some(series) => series,
        None => return result,
    };

    let count = match series.count_on(check.target_date) {
        Some(count) => count,
        None => {
            result.outcome = Outcome::NoDataForDate;
            result.detail = format!("no data for {}", check.target_date);
            return result;
        }
    };
    result.exposure_count = Some(count);

    let status = statuses.status_for(&report.device.bus_number, check.target_date);
    result.operation = Some(status);

    result.outcome = gate_and_compare(status, count, check.min_exposure);
    result.detail = match result.outcome {
        Outcome::ExcludedNotOperating => {
            format!("excluded - device not operating ({status})")
        }
        Outcome::Pass => format!("pass - operating, exposure_count {count}"),
        Outcome::Fail => format!(
            "fail - operating, exposure_count {count} below minimum {}",
            check.min_exposure
        ),
        _ => unreachable!("gate_and_compare returns a terminal outcome"),
    };

    result
}

/// Counts deficient days in the trailing window and fails the device when
/// there are too many. A deficient day is an *operating* day whose
/// exposure count falls below the minimum; non-operating and undetermined
/// days neither help nor hurt.
pub fn check_rolling_window(
    report: &ResolvedReport,
    series: &SeriesResult,
    statuses: &dyn OperationStatusSource,
    check: &WindowCheck,
) -> Evaluation {
    let mut result = Evaluation {
        bus_number: report.device.bus_number.clone(),
        mac: report.device.mac.clone(),
        target_date: check.reference_date,
        min_exposure: check.min_exposure,
        outcome: Outcome::ProcessingError,
        exposure_count: None,
        operation: None,
        deficient_days: None,
        detail: String::new(),
    };

    let series = match series_or_outcome(report, series, &mut result) {
        Some(series) => series,
        None => return result,
    };

    let window_start = check.reference_date - Duration::days(check.window_days);
    let mut seen = 0u32;
    let mut deficient = 0u32;

    for (date, count) in series.window(window_start, check.reference_date) {
        seen += 1;
        let status = statuses.status_for(&report.device.bus_number, date);
        if gate_and_compare(status, count, check.min_exposure) == Outcome::Fail {
            deficient += 1;
        }
    }

    if seen == 0 {
        result.outcome = Outcome::NoDataForDate;
        result.detail = format!(
            "no data in window ({} .. {}]",
            window_start, check.reference_date
        );
        return result;
    }

    result.deficient_days = Some(deficient);
    if deficient >= check.max_fail_days {
        result.outcome = Outcome::Fail;
        result.detail = format!(
            "fail - {deficient} deficient operating day(s) at or over limit {}",
            check.max_fail_days
        );
    } else {
        result.outcome = Outcome::Pass;
        result.detail = format!(
            "pass - {deficient} deficient operating day(s), limit {}",
            check.max_fail_days
        );
    }

    result
}

/// Maps a missing or unreadable series onto its terminal outcome.
fn series_or_outcome<'a>(
    report: &ResolvedReport,
    series: &'a SeriesResult,
    result: &mut Evaluation,
) -> Option<&'a crate::extract::ExposureSeries> {
    if !report.exists {
        result.outcome = Outcome::FileMissing;
        result.detail = "report file missing".to_string();
        return None;
    }

    match series {
        Ok(series) => Some(series),
        Err(ExtractError::FileMissing) => {
            result.outcome = Outcome::FileMissing;
            result.detail = "report file missing".to_string();
            None
        }
        Err(ExtractError::Processing(cause)) => {
            result.outcome = Outcome::ProcessingError;
            result.detail = format!("processing error: {cause}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Device;
    use crate::extract::ExposureSeries;
    use crate::oplog::{OperationLogRecord, OperationLogTable};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn report(exists: bool) -> ResolvedReport {
        ResolvedReport {
            device: Device {
                bus_number: "bus1".to_string(),
                route_code: String::new(),
                route_name: "40".to_string(),
                ctn: "ctn".to_string(),
                imei: "imei".to_string(),
                mac: "68:ED:A4:85:D8:FC".to_string(),
                installed_at: String::new(),
                updated_at: String::new(),
            },
            path: PathBuf::from("/nonexistent/bus1_68EDA485D8FC.csv"),
            exists,
        }
    }

    fn series(counts: &[(&str, u32)]) -> SeriesResult {
        let map: BTreeMap<NaiveDate, u32> =
            counts.iter().map(|(date, c)| (d(date), *c)).collect();
        Ok(ExposureSeries::from_counts(map))
    }

    fn operating_on(dates: &[&str]) -> OperationLogTable {
        let records: Vec<OperationLogRecord> = dates
            .iter()
            .map(|date| OperationLogRecord {
                bus_number: "bus1".to_string(),
                operation_date: d(date),
                is_morning_operating: 1,
                is_lunch_operating: 0,
                is_dinner_operating: 0,
            })
            .collect();
        OperationLogTable::from_records(&records)
    }

    fn idle_on(dates: &[&str]) -> OperationLogTable {
        let records: Vec<OperationLogRecord> = dates
            .iter()
            .map(|date| OperationLogRecord {
                bus_number: "bus1".to_string(),
                operation_date: d(date),
                is_morning_operating: 0,
                is_lunch_operating: 0,
                is_dinner_operating: 0,
            })
            .collect();
        OperationLogTable::from_records(&records)
    }

    #[test]
    fn test_gate_and_compare_inclusive_bound() {
        assert_eq!(
            gate_and_compare(OperationStatus::Operating, 500, 500),
            Outcome::Pass
        );
        assert_eq!(
            gate_and_compare(OperationStatus::Operating, 499, 500),
            Outcome::Fail
        );
    }

    #[test]
    fn test_gate_excludes_non_operating_and_undetermined() {
        assert_eq!(
            gate_and_compare(OperationStatus::NotOperating, 0, 500),
            Outcome::ExcludedNotOperating
        );
        assert_eq!(
            gate_and_compare(OperationStatus::Undetermined, 1000, 500),
            Outcome::ExcludedNotOperating
        );
    }

    #[test]
    fn test_single_date_pass_and_fail() {
        let statuses = operating_on(&["2025-08-15"]);
        let check = SingleDateCheck {
            target_date: d("2025-08-15"),
            min_exposure: 500,
        };

        let pass = check_single_date(&report(true), &series(&[("2025-08-15", 500)]), &statuses, &check);
        assert_eq!(pass.outcome, Outcome::Pass);
        assert_eq!(pass.exposure_count, Some(500));

        let fail = check_single_date(&report(true), &series(&[("2025-08-15", 499)]), &statuses, &check);
        assert_eq!(fail.outcome, Outcome::Fail);
        assert_eq!(fail.exposure_count, Some(499));
        assert!(fail.detail.contains("499"));
        assert!(fail.detail.contains("500"));
    }

    #[test]
    fn test_single_date_idle_device_never_fails() {
        let statuses = idle_on(&["2025-08-15"]);
        let check = SingleDateCheck {
            target_date: d("2025-08-15"),
            min_exposure: 500,
        };

        let result = check_single_date(&report(true), &series(&[("2025-08-15", 0)]), &statuses, &check);
        assert_eq!(result.outcome, Outcome::ExcludedNotOperating);
        assert_eq!(result.operation, Some(OperationStatus::NotOperating));
    }

    #[test]
    fn test_single_date_no_data() {
        let statuses = operating_on(&["2025-08-15"]);
        let check = SingleDateCheck {
            target_date: d("2025-08-15"),
            min_exposure: 500,
        };

        let result = check_single_date(&report(true), &series(&[("2025-08-14", 900)]), &statuses, &check);
        assert_eq!(result.outcome, Outcome::NoDataForDate);
        assert_eq!(result.exposure_count, None);
    }

    #[test]
    fn test_file_missing_takes_precedence() {
        // Even with a loaded-looking series and a would-be failing count,
        // a missing file is always FileMissing.
        let statuses = operating_on(&["2025-08-15"]);
        let check = SingleDateCheck {
            target_date: d("2025-08-15"),
            min_exposure: 500,
        };

        let result = check_single_date(&report(false), &series(&[("2025-08-15", 0)]), &statuses, &check);
        assert_eq!(result.outcome, Outcome::FileMissing);
    }

    #[test]
    fn test_processing_error_is_contained() {
        let statuses = operating_on(&["2025-08-15"]);
        let check = SingleDateCheck {
            target_date: d("2025-08-15"),
            min_exposure: 500,
        };
        let broken: SeriesResult = Err(ExtractError::Processing("bad date value 'x'".to_string()));

        let result = check_single_date(&report(true), &broken, &statuses, &check);
        assert_eq!(result.outcome, Outcome::ProcessingError);
        assert!(result.detail.contains("bad date value"));
    }

    #[test]
    fn test_single_date_is_idempotent() {
        let statuses = operating_on(&["2025-08-15"]);
        let check = SingleDateCheck {
            target_date: d("2025-08-15"),
            min_exposure: 500,
        };
        let s = series(&[("2025-08-15", 321)]);

        let first = check_single_date(&report(true), &s, &statuses, &check);
        let second = check_single_date(&report(true), &s, &statuses, &check);
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.exposure_count, second.exposure_count);
    }

    #[test]
    fn test_window_boundary_dates() {
        // D = 2025-08-15, W = 10: 2025-08-05 is out, 2025-08-06 is in.
        let statuses = operating_on(&["2025-08-05", "2025-08-06"]);
        let check = WindowCheck {
            reference_date: d("2025-08-15"),
            window_days: 10,
            max_fail_days: 1,
            min_exposure: 500,
        };

        // Only the excluded boundary day is deficient: must pass.
        let out = check_rolling_window(
            &report(true),
            &series(&[("2025-08-05", 0), ("2025-08-06", 900)]),
            &statuses,
            &check,
        );
        assert_eq!(out.outcome, Outcome::Pass);
        assert_eq!(out.deficient_days, Some(0));

        // The included boundary day is deficient: must fail.
        let out = check_rolling_window(
            &report(true),
            &series(&[("2025-08-05", 900), ("2025-08-06", 0)]),
            &statuses,
            &check,
        );
        assert_eq!(out.outcome, Outcome::Fail);
        assert_eq!(out.deficient_days, Some(1));
    }

    #[test]
    fn test_window_max_fail_days_threshold() {
        let statuses = operating_on(&[
            "2025-08-10",
            "2025-08-11",
            "2025-08-12",
            "2025-08-13",
            "2025-08-14",
        ]);
        let base = WindowCheck {
            reference_date: d("2025-08-15"),
            window_days: 10,
            max_fail_days: 3,
            min_exposure: 500,
        };

        // Exactly 3 deficient operating days: fail.
        let out = check_rolling_window(
            &report(true),
            &series(&[
                ("2025-08-10", 100),
                ("2025-08-11", 100),
                ("2025-08-12", 100),
                ("2025-08-13", 900),
                ("2025-08-14", 900),
            ]),
            &statuses,
            &base,
        );
        assert_eq!(out.outcome, Outcome::Fail);
        assert_eq!(out.deficient_days, Some(3));

        // Exactly 2: pass.
        let out = check_rolling_window(
            &report(true),
            &series(&[
                ("2025-08-10", 100),
                ("2025-08-11", 100),
                ("2025-08-12", 900),
                ("2025-08-13", 900),
                ("2025-08-14", 900),
            ]),
            &statuses,
            &base,
        );
        assert_eq!(out.outcome, Outcome::Pass);
        assert_eq!(out.deficient_days, Some(2));
    }

    #[test]
    fn test_window_idle_days_do_not_count() {
        // Three below-threshold days, but the device only operated on one
        // of them; only that one is deficient.
        let mut records = Vec::new();
        for (date, flag) in [("2025-08-12", 1u8), ("2025-08-13", 0), ("2025-08-14", 0)] {
            records.push(OperationLogRecord {
                bus_number: "bus1".to_string(),
                operation_date: d(date),
                is_morning_operating: flag,
                is_lunch_operating: 0,
                is_dinner_operating: 0,
            });
        }
        let statuses = OperationLogTable::from_records(&records);

        let check = WindowCheck {
            reference_date: d("2025-08-15"),
            window_days: 10,
            max_fail_days: 2,
            min_exposure: 500,
        };

        let out = check_rolling_window(
            &report(true),
            &series(&[
                ("2025-08-12", 10),
                ("2025-08-13", 10),
                ("2025-08-14", 10),
            ]),
            &statuses,
            &check,
        );
        assert_eq!(out.outcome, Outcome::Pass);
        assert_eq!(out.deficient_days, Some(1));
    }

    #[test]
    fn test_window_empty_is_no_data() {
        let statuses = operating_on(&[]);
        let check = WindowCheck {
            reference_date: d("2025-08-15"),
            window_days: 10,
            max_fail_days: 3,
            min_exposure: 500,
        };

        // Records exist, but none inside the window.
        let out = check_rolling_window(
            &report(true),
            &series(&[("2025-07-01", 900)]),
            &statuses,
            &check,
        );
        assert_eq!(out.outcome, Outcome::NoDataForDate);
    }

    #[test]
    fn test_window_file_missing_propagates() {
        let statuses = operating_on(&[]);
        let check = WindowCheck {
            reference_date: d("2025-08-15"),
            window_days: 10,
            max_fail_days: 3,
            min_exposure: 500,
        };

        let out = check_rolling_window(&report(false), &series(&[]), &statuses, &check);
        assert_eq!(out.outcome, Outcome::FileMissing);
    }
}
