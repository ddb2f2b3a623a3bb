//! Half-hourly demand data: CSV loading and date-range filtering.
//!
//! Expected columns (others are ignored):
//! - `LCLid`: household identifier
//! - `tstp`: timestamp, e.g. `2013-01-01 00:30:00.0000000`
//! - `energy(kWh/hh)`: energy for the half hour, or `Null`

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sim::policy::Classify;
use crate::sim::types::DemandRecord;

const HOUSEHOLD_COLUMN: &str = "LCLid";
const TIMESTAMP_COLUMN: &str = "tstp";
const ENERGY_COLUMN: &str = "energy(kWh/hh)";

/// Demand data loading errors.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("cannot open demand data {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("demand data is not valid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("demand data is missing the \"{0}\" column")]
    MissingColumn(&'static str),
    #[error("invalid start date \"{0}\", expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid timescale \"{0}\", use d, w, m or y")]
    InvalidTimescale(String),
}

impl Classify for DataError {
    fn is_transient(&self) -> bool {
        false
    }
}

/// Length of the replayed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timescale {
    #[default]
    Day,
    Week,
    Month,
    Year,
}

impl Timescale {
    pub fn days(&self) -> u64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
            Self::Year => 365,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Day => "d",
            Self::Week => "w",
            Self::Month => "m",
            Self::Year => "y",
        }
    }
}

impl fmt::Display for Timescale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Timescale {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "d" | "day" => Ok(Self::Day),
            "w" | "week" => Ok(Self::Week),
            "m" | "month" => Ok(Self::Month),
            "y" | "year" => Ok(Self::Year),
            _ => Err(DataError::InvalidTimescale(s.to_string())),
        }
    }
}

/// Which rows to keep: one household over `[start, start + timescale)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFilter {
    pub household: String,
    pub start: NaiveDate,
    pub timescale: Timescale,
}

impl DataFilter {
    /// # Errors
    ///
    /// Returns `DataError::InvalidDate` if `start` is not `YYYY-MM-DD`.
    pub fn new(household: &str, start: &str, timescale: Timescale) -> Result<Self, DataError> {
        let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")
            .map_err(|_| DataError::InvalidDate(start.to_string()))?;
        Ok(Self {
            household: household.to_string(),
            start,
            timescale,
        })
    }

    /// Half-open window covered by the filter.
    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        let from = self.start.and_time(chrono::NaiveTime::MIN);
        let to = from
            .checked_add_days(Days::new(self.timescale.days()))
            .unwrap_or(NaiveDateTime::MAX);
        (from, to)
    }

    fn keeps(&self, household: &str, ts: NaiveDateTime) -> bool {
        let (from, to) = self.window();
        household == self.household && ts >= from && ts < to
    }
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "LCLid")]
    household: String,
    tstp: String,
    #[serde(rename = "energy(kWh/hh)")]
    energy: String,
}

/// Parses a `tstp` value, tolerating the `.0000000` fractional suffix.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Parses an energy value; `Null`, non-numeric and negative values are missing.
fn parse_energy(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Reads demand records for `filter` from CSV data.
///
/// The result is sorted by timestamp with duplicates removed (first row
/// wins), so timestamps are strictly increasing.
///
/// # Errors
///
/// Returns a `DataError` if the CSV cannot be read or lacks a required column.
pub fn read_demand_csv<R: Read>(reader: R, filter: &DataFilter) -> Result<Vec<DemandRecord>, DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    for column in [HOUSEHOLD_COLUMN, TIMESTAMP_COLUMN, ENERGY_COLUMN] {
        if !headers.iter().any(|h| h == column) {
            return Err(DataError::MissingColumn(column));
        }
    }

    let mut records = Vec::new();
    let mut skipped = 0_usize;
    for (line, row) in rdr.deserialize::<Row>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping unreadable row");
                skipped += 1;
                continue;
            }
        };
        if row.household != filter.household {
            continue;
        }
        let Some(ts) = parse_timestamp(&row.tstp) else {
            warn!(line = line + 2, tstp = %row.tstp, "skipping row with invalid timestamp");
            skipped += 1;
            continue;
        };
        if !filter.keeps(&row.household, ts) {
            continue;
        }
        match parse_energy(&row.energy) {
            Some(kwh) => records.push(DemandRecord::new(ts, kwh)),
            None => {
                debug!(%ts, value = %row.energy, "missing demand value");
                records.push(DemandRecord::missing(ts));
            }
        }
    }

    records.sort_by_key(|r| r.timestamp);
    records.dedup_by_key(|r| r.timestamp);

    info!(
        household = %filter.household,
        start = %filter.start,
        timescale = %filter.timescale,
        rows = records.len(),
        skipped,
        "demand data loaded"
    );
    Ok(records)
}

/// Opens `path` and reads demand records for `filter`.
///
/// # Errors
///
/// Returns a `DataError` if the file cannot be opened or parsed.
pub fn load_demand_csv(path: &Path, filter: &DataFilter) -> Result<Vec<DemandRecord>, DataError> {
    let file = File::open(path).map_err(|source| DataError::Open {
        path: path.display().to_string(),
        source,
    })?;
    read_demand_csv(file, filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
LCLid,stdorToU,tstp,energy(kWh/hh)
MAC000002,Std,2013-01-01 00:30:00.0000000,0.219
MAC000002,Std,2013-01-01 00:00:00.0000000,0.105
MAC000003,Std,2013-01-01 00:00:00.0000000,9.9
MAC000002,Std,2013-01-01 01:00:00.0000000,Null
MAC000002,Std,2013-01-01 01:00:00.0000000,0.5
MAC000002,Std,not a date,0.3
MAC000002,Std,2013-01-02 00:00:00.0000000,0.4
MAC000002,Std,2012-12-31 23:30:00.0000000,0.4
";

    fn filter(timescale: Timescale) -> DataFilter {
        DataFilter::new("MAC000002", "2013-01-01", timescale).expect("valid date")
    }

    #[test]
    fn filters_household_and_window() {
        let records = read_demand_csv(SAMPLE.as_bytes(), &filter(Timescale::Day)).expect("valid csv");
        let times: Vec<String> = records
            .iter()
            .map(|r| r.timestamp.format("%H:%M").to_string())
            .collect();
        assert_eq!(times, vec!["00:00", "00:30", "01:00"]);
        assert_eq!(records[0].demand_kwh, Some(0.105));
    }

    #[test]
    fn null_energy_is_missing_and_first_duplicate_wins() {
        let records = read_demand_csv(SAMPLE.as_bytes(), &filter(Timescale::Day)).expect("valid csv");
        assert_eq!(records[2].demand_kwh, None);
    }

    #[test]
    fn week_window_includes_next_day() {
        let records = read_demand_csv(SAMPLE.as_bytes(), &filter(Timescale::Week)).expect("valid csv");
        assert_eq!(records.len(), 4);
        assert!(records.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn missing_column_is_an_error() {
        let data = "LCLid,tstp\nMAC000002,2013-01-01 00:00:00\n";
        let err = read_demand_csv(data.as_bytes(), &filter(Timescale::Day)).unwrap_err();
        assert!(matches!(err, DataError::MissingColumn(ENERGY_COLUMN)));
    }

    #[test]
    fn timescale_parsing() {
        assert_eq!("d".parse::<Timescale>().ok(), Some(Timescale::Day));
        assert_eq!("W".parse::<Timescale>().ok(), Some(Timescale::Week));
        assert_eq!("m".parse::<Timescale>().map(|t| t.days()).ok(), Some(30));
        assert_eq!("y".parse::<Timescale>().map(|t| t.days()).ok(), Some(365));
        assert!("x".parse::<Timescale>().is_err());
    }

    #[test]
    fn invalid_start_date_is_rejected() {
        assert!(DataFilter::new("MAC000002", "01/01/2013", Timescale::Day).is_err());
    }

    #[test]
    fn parses_timestamps_with_and_without_fraction() {
        assert!(parse_timestamp("2013-01-01 00:30:00.0000000").is_some());
        assert!(parse_timestamp("2013-01-01 00:30:00").is_some());
        assert!(parse_timestamp("2013-01-01T00:30:00").is_some());
        assert!(parse_timestamp("Null").is_none());
    }
}
