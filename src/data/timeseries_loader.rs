use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV error in '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("time series '{0}' needs a header row")]
    MissingHeader(String),
    #[error("time series '{resource}' has an empty column name at position {position}")]
    EmptyColumnName { resource: String, position: usize },
    #[error("time series '{resource}' has no data rows")]
    NoRows { resource: String },
    #[error("cannot parse date '{value}' in '{resource}'")]
    UnparsableDate { resource: String, value: String },
    #[error("row {row} of '{resource}' does not match the date format of the first row")]
    MixedDateFormats { resource: String, row: usize },
    #[error("non-numeric value '{value}' in column '{column}' of '{resource}'")]
    NonNumericValue {
        resource: String,
        column: String,
        value: String,
    },
    #[error("dates in '{resource}' must be strictly increasing (row {row})")]
    DatesNotIncreasing { resource: String, row: usize },
    #[error("facility file '{resource}': {detail}")]
    InvalidFacilityFile { resource: String, detail: String },
}

/// Accepted first-column date formats. All rows of one file must share the
/// format; a time component in any row requires it in every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    IsoDate,
    IsoDateTime,
    DayFirstDate,
    DayFirstDateTime,
    YearOnly,
}

impl DateFormat {
    pub fn detect(value: &str) -> Option<(Self, NaiveDateTime)> {
        for (format, pattern) in [
            (DateFormat::IsoDateTime, "%Y-%m-%d %H:%M:%S"),
            (DateFormat::IsoDateTime, "%Y-%m-%dT%H:%M:%S"),
            (DateFormat::DayFirstDateTime, "%d.%m.%Y %H:%M:%S"),
        ] {
            if let Ok(instant) = NaiveDateTime::parse_from_str(value, pattern) {
                return Some((format, instant));
            }
        }
        for (format, pattern) in [
            (DateFormat::IsoDate, "%Y-%m-%d"),
            (DateFormat::DayFirstDate, "%d.%m.%Y"),
        ] {
            if let Ok(date) = NaiveDate::parse_from_str(value, pattern) {
                return Some((format, date.and_hms_opt(0, 0, 0).expect("midnight exists")));
            }
        }
        if value.len() == 4 {
            if let Ok(year) = value.parse::<i32>() {
                let date = NaiveDate::from_ymd_opt(year, 1, 1)?;
                return Some((
                    DateFormat::YearOnly,
                    date.and_hms_opt(0, 0, 0).expect("midnight exists"),
                ));
            }
        }
        None
    }

    fn parse(&self, value: &str) -> Option<NaiveDateTime> {
        match Self::detect(value) {
            Some((format, instant)) if format == *self => Some(instant),
            _ => None,
        }
    }
}

/// A loaded time-series resource: period-constant named columns over a
/// strictly increasing instant axis.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TimeSeriesResource {
    pub name: String,
    pub instants: Vec<NaiveDateTime>,
    pub columns: Vec<(String, Vec<f64>)>,
    /// Whether this resource's instants shape the global time vector
    pub influence_time_vector: bool,
}

impl TimeSeriesResource {
    /// Column value holding at an instant: the row with the greatest date
    /// at or before it. None before the first row or for unknown columns.
    pub fn value_at(&self, column: &str, instant: NaiveDateTime) -> Option<f64> {
        let values = &self
            .columns
            .iter()
            .find(|(name, _)| name == column)?
            .1;
        let index = self
            .instants
            .iter()
            .rposition(|row_instant| *row_instant <= instant)?;
        Some(values[index])
    }

}

pub fn load_time_series(
    path: &Path,
    name: &str,
    influence_time_vector: bool,
) -> Result<TimeSeriesResource, ResourceError> {
    let mut file = File::open(path).map_err(|source| ResourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|source| ResourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
    parse_time_series(&contents, name, influence_time_vector, path)
}

fn parse_time_series(
    contents: &str,
    name: &str,
    influence_time_vector: bool,
    path: &Path,
) -> Result<TimeSeriesResource, ResourceError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| ResourceError::Csv {
            path: path.display().to_string(),
            source,
        })?
        .clone();
    if headers.len() < 2 {
        return Err(ResourceError::MissingHeader(name.to_string()));
    }
    for (position, header) in headers.iter().enumerate().skip(1) {
        if header.is_empty() {
            return Err(ResourceError::EmptyColumnName {
                resource: name.to_string(),
                position,
            });
        }
    }

    let column_names: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();
    let mut instants: Vec<NaiveDateTime> = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); column_names.len()];
    let mut format: Option<DateFormat> = None;

    for (row_index, record) in reader.records().enumerate() {
        let record = record.map_err(|source| ResourceError::Csv {
            path: path.display().to_string(),
            source,
        })?;
        let date_value = record.get(0).unwrap_or("");

        let instant = match format {
            None => {
                let (detected, instant) =
                    DateFormat::detect(date_value).ok_or_else(|| ResourceError::UnparsableDate {
                        resource: name.to_string(),
                        value: date_value.to_string(),
                    })?;
                format = Some(detected);
                instant
            }
            Some(expected) => {
                expected
                    .parse(date_value)
                    .ok_or(ResourceError::MixedDateFormats {
                        resource: name.to_string(),
                        row: row_index + 2,
                    })?
            }
        };
        if let Some(last) = instants.last() {
            if instant <= *last {
                return Err(ResourceError::DatesNotIncreasing {
                    resource: name.to_string(),
                    row: row_index + 2,
                });
            }
        }
        instants.push(instant);

        for (column_index, column_name) in column_names.iter().enumerate() {
            let raw = record.get(column_index + 1).unwrap_or("");
            let value = raw
                .parse::<f64>()
                .map_err(|_| ResourceError::NonNumericValue {
                    resource: name.to_string(),
                    column: column_name.clone(),
                    value: raw.to_string(),
                })?;
            columns[column_index].push(value);
        }
    }

    if instants.is_empty() {
        return Err(ResourceError::NoRows {
            resource: name.to_string(),
        });
    }

    Ok(TimeSeriesResource {
        name: name.to_string(),
        instants,
        columns: column_names.into_iter().zip(columns).collect(),
        influence_time_vector,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    fn parse(contents: &str) -> Result<TimeSeriesResource, ResourceError> {
        parse_time_series(contents, "SIM", true, &PathBuf::from("test.csv"))
    }

    #[test]
    fn iso_dates_and_lookup() {
        let resource = parse(
            "DATE,GAS_PROD,WATER_PROD\n\
             2024-01-01,1000,50\n\
             2025-01-01,2000,60\n",
        )
        .unwrap();
        let instant = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_relative_eq!(resource.value_at("GAS_PROD", instant).unwrap(), 1000.0);
        let later = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_relative_eq!(resource.value_at("WATER_PROD", later).unwrap(), 60.0);
        let before = NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(resource.value_at("GAS_PROD", before).is_none());
    }

    #[test]
    fn day_first_format_is_detected() {
        let resource = parse("DATE,X\n01.02.2024,1\n01.03.2024,2\n").unwrap();
        assert_eq!(
            resource.instants[0],
            NaiveDate::from_ymd_opt(2024, 2, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn year_only_format_is_detected() {
        let resource = parse("DATE,X\n2024,1\n2025,2\n").unwrap();
        assert_eq!(
            resource.instants[1],
            NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn mixed_formats_are_rejected() {
        let err = parse("DATE,X\n2024-01-01,1\n01.02.2024,2\n").unwrap_err();
        assert!(matches!(err, ResourceError::MixedDateFormats { row: 3, .. }));
    }

    #[test]
    fn time_in_one_row_requires_time_everywhere() {
        let err = parse("DATE,X\n2024-01-01 06:00:00,1\n2024-02-01,2\n").unwrap_err();
        assert!(matches!(err, ResourceError::MixedDateFormats { .. }));
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let err = parse("DATE,X\n2024-01-01,abc\n").unwrap_err();
        assert!(matches!(err, ResourceError::NonNumericValue { .. }));
    }

    #[test]
    fn decreasing_dates_are_rejected() {
        let err = parse("DATE,X\n2025-01-01,1\n2024-01-01,2\n").unwrap_err();
        assert!(matches!(err, ResourceError::DatesNotIncreasing { .. }));
    }

    #[test]
    fn empty_header_is_rejected() {
        let err = parse("DATE,,X\n2024-01-01,1,2\n").unwrap_err();
        assert!(matches!(err, ResourceError::EmptyColumnName { .. }));
    }
}
