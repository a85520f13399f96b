// External crates
use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use polars::prelude::*;
use std::path::Path;

// Local modules
use crate::config::DataConfig;
use crate::constants::{DATETIME_FORMATS, DATE_FORMATS};
use crate::data::temporal_table::{is_numeric, TemporalTable};
use crate::error::{PipelineError, Result};

/// Loads a CSV file of daily bars into a time-indexed table
///
/// # Arguments
///
/// * `path` - Path to the CSV file
/// * `config` - Date column, required and nullable columns
///
/// # Returns
///
/// Returns the cleaned table: sorted by date, one row per date, numeric
/// columns only
pub fn load_csv(path: &Path, config: &DataConfig) -> Result<TemporalTable> {
    info!("Loading data from: {}", path.display());

    if !path.exists() {
        return Err(PipelineError::DataError(format!("File not found: {}", path.display())));
    }

    let file = std::fs::File::open(path)?;
    let df = CsvReader::new(file).finish()?;
    info!("Loaded {} rows, {} columns", df.height(), df.width());

    prepare_frame(df, config)
}

fn parse_with<F>(values: &[&str], parse: F) -> Option<Vec<NaiveDateTime>>
where
    F: Fn(&str) -> Option<NaiveDateTime>,
{
    values.iter().map(|v| parse(v.trim())).collect()
}

/// Parse every date string with the first format that accepts all of them
pub fn parse_dates(values: &[&str]) -> Result<Vec<NaiveDateTime>> {
    for format in DATE_FORMATS {
        let parsed = parse_with(values, |v| {
            NaiveDate::parse_from_str(v, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });
        if let Some(dates) = parsed {
            return Ok(dates);
        }
    }
    for format in DATETIME_FORMATS {
        if let Some(dates) = parse_with(values, |v| NaiveDateTime::parse_from_str(v, format).ok()) {
            return Ok(dates);
        }
    }

    let sample = values.first().copied().unwrap_or_default();
    Err(PipelineError::DataError(format!(
        "Could not parse dates (first value '{}') with any supported format",
        sample
    )))
}

/// Cleans an in-memory frame into a time-indexed table
///
/// Drops nullable columns holding nulls, non-numeric and entirely empty
/// columns, sorts by date and keeps the first row of each date.
pub fn prepare_frame(df: DataFrame, config: &DataConfig) -> Result<TemporalTable> {
    let date_column = config.date_column.as_str();
    let available: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();

    let mut missing: Vec<String> = config
        .required_columns
        .iter()
        .filter(|c| !available.contains(c))
        .cloned()
        .collect();
    if !available.iter().any(|c| c == date_column) && !missing.iter().any(|c| c == date_column) {
        missing.insert(0, date_column.to_string());
    }
    if !missing.is_empty() {
        return Err(PipelineError::ColumnNotFound { missing, available });
    }

    let dates_text = df.column(date_column)?.cast(&DataType::String)?;
    let raw_dates: Vec<&str> = dates_text
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| PipelineError::DataError(format!("Missing date in '{}' at row {}", date_column, row)))
        })
        .collect::<Result<_>>()?;
    let timestamps = parse_dates(&raw_dates)?;

    let mut frame = df.drop(date_column)?;
    for column in frame.get_columns().to_vec() {
        let name = column.name().to_string();
        let reason = if config.nullable_columns.contains(&name) && column.null_count() > 0 {
            Some("contains missing values")
        } else if !is_numeric(column.dtype()) {
            Some("is not numeric")
        } else if column.null_count() == column.len() {
            Some("is empty")
        } else {
            None
        };
        if let Some(reason) = reason {
            info!("Dropped '{}' column: {}", name, reason);
            frame = frame.drop(&name)?;
        }
    }

    // Stable sort keeps the file order within a date
    let mut order: Vec<usize> = (0..timestamps.len()).collect();
    order.sort_by_key(|&i| timestamps[i]);
    let sorted_ts: Vec<NaiveDateTime> = order.iter().map(|&i| timestamps[i]).collect();
    let idx = IdxCa::from_vec("order".into(), order.iter().map(|&i| i as IdxSize).collect());
    let frame = frame.take(&idx)?;

    let keep: Vec<bool> = (0..sorted_ts.len())
        .map(|i| i == 0 || sorted_ts[i] != sorted_ts[i - 1])
        .collect();
    let duplicates = keep.iter().filter(|k| !**k).count();

    let table = TemporalTable::new(frame, sorted_ts)?;
    if duplicates == 0 {
        return Ok(table);
    }
    info!("Removed {} rows with duplicate dates", duplicates);
    table.filter_rows(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::temporal_table::RowKey;
    use crate::util::test_utils::{daily_bars_csv, day};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn minimal_config() -> DataConfig {
        DataConfig {
            required_columns: vec!["Date".to_string(), "VWAP".to_string()],
            ..DataConfig::default()
        }
    }

    #[test]
    fn test_load_nse_layout() {
        let file = write_csv(&daily_bars_csv(30, 3));
        let table = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(table.height(), 30);
        assert!(!table.has_column("Symbol"));
        assert!(!table.has_column("Series"));
        assert!(table.has_column("VWAP"));
        assert!(table.has_column("Trades"));
        assert_eq!(table.first_key(), Some(RowKey::Time(day(1))));
    }

    #[test]
    fn test_unsorted_duplicates_and_nullable_column() {
        let file = write_csv(
            "Date,VWAP,Trades\n\
             03-Jan-2023,3.0,10\n\
             01-Jan-2023,1.0,\n\
             02-Jan-2023,2.0,12\n\
             01-Jan-2023,9.0,13\n",
        );
        let table = load_csv(file.path(), &minimal_config()).unwrap();
        assert_eq!(table.height(), 3);
        assert_eq!(table.values_f64("VWAP").unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(!table.has_column("Trades"));
    }

    #[test]
    fn test_missing_required_columns() {
        let file = write_csv("Day,Close\n2023-01-01,1.0\n");
        let result = load_csv(file.path(), &minimal_config());
        match result {
            Err(PipelineError::ColumnNotFound { missing, .. }) => {
                assert_eq!(missing, vec!["Date".to_string(), "VWAP".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other.map(|t| t.height())),
        }
    }

    #[test]
    fn test_unparseable_dates() {
        let file = write_csv("Date,VWAP\nyesterday,1.0\n");
        assert!(matches!(
            load_csv(file.path(), &minimal_config()),
            Err(PipelineError::DataError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = load_csv(Path::new("/nonexistent/bars.csv"), &minimal_config());
        assert!(matches!(result, Err(PipelineError::DataError(_))));
    }

    #[test]
    fn test_parse_dates_formats() {
        assert_eq!(parse_dates(&["2023-01-02"]).unwrap(), vec![day(2)]);
        assert_eq!(parse_dates(&["01/03/2023"]).unwrap(), vec![day(3)]);
        assert_eq!(
            parse_dates(&["2023-01-01 12:30:00"]).unwrap()[0],
            day(1) + chrono::Duration::minutes(750)
        );
    }
}
