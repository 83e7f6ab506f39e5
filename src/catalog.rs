//! Device catalog loading and per-device report file resolution.
//!
//! The catalog CSV is a reference input owned by operations; a missing
//! required column or value there is a configuration error that aborts the
//! whole run. A missing per-device report *file*, on the other hand, is a
//! normal outcome that every downstream consumer must be able to report.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// One row of the device catalog (`devices.csv`).
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub bus_number: String,
    #[serde(default)]
    pub route_code: String,
    pub route_name: String,
    pub ctn: String,
    pub imei: String,
    pub mac: String,
    #[serde(default)]
    pub installed_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Device {
    /// MAC with separators stripped, as used in downloaded file names.
    pub fn mac_compact(&self) -> String {
        self.mac.chars().filter(|c| *c != ':').collect()
    }

    /// File name of this device's per-device time-series report.
    pub fn report_file_name(&self) -> String {
        format!(
            "{}_{}.csv",
            sanitize(&self.bus_number),
            sanitize(&self.mac)
        )
    }
}

/// Keeps only alphanumeric characters, so bus numbers and MACs are safe to
/// use in file names.
pub fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// A device together with its resolved report file path and whether that
/// file is present on disk.
#[derive(Debug, Clone)]
pub struct ResolvedReport {
    pub device: Device,
    pub path: PathBuf,
    pub exists: bool,
}

/// Loads the device catalog, failing fast on structural problems.
///
/// # Errors
///
/// Returns an error if the file is absent, a required column is missing,
/// or any row leaves a required field empty.
pub fn load_devices(path: &Path) -> Result<Vec<Device>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("device catalog not readable: {}", path.display()))?;

    let mut devices = Vec::new();
    for (i, row) in rdr.deserialize().enumerate() {
        let device: Device = row.with_context(|| {
            format!("device catalog row {} is malformed in {}", i + 2, path.display())
        })?;

        let required = [
            ("bus_number", &device.bus_number),
            ("route_name", &device.route_name),
            ("ctn", &device.ctn),
            ("imei", &device.imei),
            ("mac", &device.mac),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                bail!(
                    "device catalog row {} is missing required field '{}' in {}",
                    i + 2,
                    name,
                    path.display()
                );
            }
        }

        devices.push(device);
    }

    info!(count = devices.len(), path = %path.display(), "Device catalog loaded");
    Ok(devices)
}

/// Loads the run's date list (`dates.csv`, single `date` column).
pub fn load_dates(path: &Path) -> Result<Vec<NaiveDate>> {
    #[derive(Deserialize)]
    struct DateRow {
        date: NaiveDate,
    }

    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("date list not readable: {}", path.display()))?;

    let mut dates = Vec::new();
    for row in rdr.deserialize() {
        let row: DateRow = row.with_context(|| format!("bad date row in {}", path.display()))?;
        dates.push(row.date);
    }
    Ok(dates)
}

/// Resolves each device's report file under `reports_root`, creating the
/// root directory if it does not exist. Absence of an individual file is
/// recorded, never raised.
pub fn resolve_report_files(
    devices: &[Device],
    reports_root: &Path,
) -> Result<Vec<ResolvedReport>> {
    fs::create_dir_all(reports_root)
        .with_context(|| format!("cannot create reports root {}", reports_root.display()))?;

    let resolved: Vec<ResolvedReport> = devices
        .iter()
        .map(|device| {
            let path = reports_root.join(device.report_file_name());
            let exists = path.exists();
            ResolvedReport {
                device: device.clone(),
                path,
                exists,
            }
        })
        .collect();

    let present = resolved.iter().filter(|r| r.exists).count();
    info!(
        devices = resolved.len(),
        present,
        missing = resolved.len() - present,
        "Report files resolved"
    );

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("buslight_catalog_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn device(bus: &str, mac: &str) -> Device {
        Device {
            bus_number: bus.to_string(),
            route_code: String::new(),
            route_name: "40".to_string(),
            ctn: "01236249809".to_string(),
            imei: "86301807354296".to_string(),
            mac: mac.to_string(),
            installed_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_sanitize_strips_separators() {
        assert_eq!(sanitize("68:ED:A4:85:D8:FC"), "68EDA485D8FC");
        assert_eq!(sanitize("seoul74-1599"), "seoul741599");
    }

    #[test]
    fn test_report_file_name() {
        let d = device("seoul74sa1599", "68:ED:A4:85:D8:FC");
        assert_eq!(d.report_file_name(), "seoul74sa1599_68EDA485D8FC.csv");
    }

    #[test]
    fn test_mac_compact() {
        assert_eq!(device("b", "68:ED:A4:85:D8:FC").mac_compact(), "68EDA485D8FC");
    }

    #[test]
    fn test_load_devices_ok() {
        let dir = temp_dir("load_ok");
        let path = dir.join("devices.csv");
        fs::write(
            &path,
            "bus_number,route_code,route_name,ctn,imei,mac,installed_at,updated_at\n\
             seoul74sa1599,104000014,40,01236249809,86301807354296,68:ED:A4:85:D8:FC,,\n",
        )
        .unwrap();

        let devices = load_devices(&path).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].route_name, "40");
    }

    #[test]
    fn test_load_devices_missing_column_is_fatal() {
        let dir = temp_dir("load_badcol");
        let path = dir.join("devices.csv");
        // no mac column at all
        fs::write(
            &path,
            "bus_number,route_name,ctn,imei\nseoul74sa1599,40,0123,8630\n",
        )
        .unwrap();

        assert!(load_devices(&path).is_err());
    }

    #[test]
    fn test_load_devices_empty_required_value_is_fatal() {
        let dir = temp_dir("load_badval");
        let path = dir.join("devices.csv");
        fs::write(
            &path,
            "bus_number,route_code,route_name,ctn,imei,mac,installed_at,updated_at\n\
             seoul74sa1599,104000014,40,,86301807354296,68:ED:A4:85:D8:FC,,\n",
        )
        .unwrap();

        let err = load_devices(&path).unwrap_err();
        assert!(err.to_string().contains("ctn"));
    }

    #[test]
    fn test_resolve_report_files_flags_existence() {
        let dir = temp_dir("resolve");
        let root = dir.join("reports");

        let present = device("bus1", "68EDA485D8FC");
        let absent = device("bus2", "68EDA485DC52");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(present.report_file_name()), "date,watched_time\n").unwrap();

        let resolved = resolve_report_files(&[present, absent], &root).unwrap();
        assert!(resolved[0].exists);
        assert!(!resolved[1].exists);
    }

    #[test]
    fn test_resolve_creates_missing_root() {
        let dir = temp_dir("resolve_mkdir");
        let root = dir.join("nested").join("reports");
        let resolved = resolve_report_files(&[device("b", "AA")], &root).unwrap();
        assert!(root.is_dir());
        assert!(!resolved[0].exists);
    }

    #[test]
    fn test_load_dates() {
        let dir = temp_dir("dates");
        let path = dir.join("dates.csv");
        fs::write(&path, "date\n2025-08-20\n2025-08-21\n").unwrap();

        let dates = load_dates(&path).unwrap();
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2025, 8, 20).unwrap());
    }
}
