//! Reader for CSV files describing microscopic inflow, one vehicle per row.

use crate::source::MicroEntry;
use log::{error, warn};
use std::io;
use thiserror::Error;

/// An error reading a micro-inflow file. Errors concerning single records
/// are recovered by skipping the record; only file-level errors propagate.
#[derive(Debug, Error)]
pub enum InflowFileError {
    #[error("failed to read inflow file: {0}")]
    Read(#[from] csv::Error),
    #[error("missing column {column}")]
    MissingColumn { column: usize },
    #[error("invalid {field} value `{value}`")]
    InvalidField { field: &'static str, value: String },
}

/// The 1-based column indices of a micro-inflow file.
#[derive(Clone, Copy, Debug)]
pub struct InflowColumns {
    /// The entry time column.
    pub time: usize,
    /// The vehicle type label column.
    pub label: usize,
    /// The entry lane column, if present.
    pub lane: Option<usize>,
    /// The route name column, if present.
    pub route: Option<usize>,
    /// The entry speed column in m/s, if present.
    pub speed: Option<usize>,
    /// The vehicle length column in m, if present.
    pub length: Option<usize>,
    /// The statistical weight column, if present.
    pub weight: Option<usize>,
}

impl Default for InflowColumns {
    fn default() -> Self {
        Self {
            time: 1,
            label: 2,
            lane: None,
            route: None,
            speed: None,
            length: None,
            weight: None,
        }
    }
}

/// The format of the time column.
#[derive(Clone, Copy, Debug)]
pub enum TimeFormat {
    /// Raw seconds since the scenario start.
    Seconds,
    /// `HH:MM:SS`, converted to seconds relative to the scenario epoch.
    HourMinSec {
        /// The scenario epoch in seconds of day.
        epoch: f64,
    },
}

/// Reads micro-inflow entries from CSV data. Malformed rows are logged and
/// skipped; the returned entries are sorted by entry time. An input that
/// yields no entries at all is reported but still returned as empty, so the
/// simulation runs with an empty inflow rather than aborting.
pub fn read_micro_entries<R: io::Read>(
    reader: R,
    columns: &InflowColumns,
    format: TimeFormat,
) -> Result<Vec<MicroEntry>, InflowFileError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut entries = vec![];
    let mut rows = 0usize;
    for record in csv_reader.records() {
        let record = record?;
        if record.is_empty() || (record.len() == 1 && record[0].is_empty()) {
            continue;
        }
        rows += 1;
        match parse_record(&record, columns, format) {
            Ok(entry) => entries.push(entry),
            Err(err) => warn!("skipping inflow record {:?}: {}", record, err),
        }
    }
    if rows > 0 && entries.is_empty() {
        error!("no inflow records could be parsed; treating inflow as empty");
    }
    entries.sort_by(|a, b| a.time.total_cmp(&b.time));
    Ok(entries)
}

fn parse_record(
    record: &csv::StringRecord,
    columns: &InflowColumns,
    format: TimeFormat,
) -> Result<MicroEntry, InflowFileError> {
    let cell = |column: usize| -> Result<&str, InflowFileError> {
        record
            .get(column - 1)
            .ok_or(InflowFileError::MissingColumn { column })
    };
    let optional = |column: Option<usize>| -> Result<Option<&str>, InflowFileError> {
        column.map(cell).transpose()
    };

    let time = parse_time(cell(columns.time)?, format)?;
    let label = cell(columns.label)?.to_owned();
    let lane = optional(columns.lane)?
        .map(|v| parse_field::<usize>("lane", v))
        .transpose()?;
    let route = optional(columns.route)?.map(str::to_owned);
    let speed = optional(columns.speed)?
        .map(|v| parse_field::<f64>("speed", v))
        .transpose()?;
    let length = optional(columns.length)?
        .map(|v| parse_field::<f64>("length", v))
        .transpose()?;
    let weight = optional(columns.weight)?
        .map(|v| parse_field::<f64>("weight", v))
        .transpose()?;

    Ok(MicroEntry {
        time,
        label,
        lane,
        route,
        speed,
        length,
        weight,
    })
}

fn parse_time(value: &str, format: TimeFormat) -> Result<f64, InflowFileError> {
    match format {
        TimeFormat::Seconds => parse_field("time", value),
        TimeFormat::HourMinSec { epoch } => {
            let mut parts = value.split(':');
            let mut seconds = 0.0;
            for _ in 0..3 {
                let part = parts.next().ok_or_else(|| InflowFileError::InvalidField {
                    field: "time",
                    value: value.to_owned(),
                })?;
                seconds = 60.0 * seconds + parse_field::<f64>("time", part)?;
            }
            if parts.next().is_some() {
                return Err(InflowFileError::InvalidField {
                    field: "time",
                    value: value.to_owned(),
                });
            }
            Ok(seconds - epoch)
        }
    }
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, InflowFileError> {
    value.parse().map_err(|_| InflowFileError::InvalidField {
        field,
        value: value.to_owned(),
    })
}
