// External crates
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

// Internal modules
use crate::error::{PipelineError, Result};

/// Key of a single row: a timestamp for time-indexed tables, the original
/// row number otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Time(NaiveDateTime),
    Position(usize),
}

impl RowKey {
    /// The key that follows this one: the next calendar day, or the next position
    pub fn next(&self) -> RowKey {
        match self {
            RowKey::Time(ts) => RowKey::Time(*ts + Duration::days(1)),
            RowKey::Position(pos) => RowKey::Position(pos + 1),
        }
    }

    /// Whether two keys denote the same period. Timestamps may differ by up
    /// to `tolerance_secs`; positions must be equal.
    pub fn aligned_with(&self, other: &RowKey, tolerance_secs: i64) -> bool {
        match (self, other) {
            (RowKey::Time(a), RowKey::Time(b)) => (*a - *b).num_seconds().abs() <= tolerance_secs,
            (RowKey::Position(a), RowKey::Position(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Time(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            RowKey::Position(pos) => write!(f, "{}", pos),
        }
    }
}

impl Serialize for RowKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Row index of a [`TemporalTable`]
#[derive(Debug, Clone, PartialEq)]
pub enum TableIndex {
    /// Genuine time index, sorted ascending
    Time(Vec<NaiveDateTime>),
    /// No time information; rows are identified by their original position
    Positional(Vec<usize>),
}

impl TableIndex {
    fn len(&self) -> usize {
        match self {
            TableIndex::Time(ts) => ts.len(),
            TableIndex::Positional(rows) => rows.len(),
        }
    }

    fn key_at(&self, i: usize) -> RowKey {
        match self {
            TableIndex::Time(ts) => RowKey::Time(ts[i]),
            TableIndex::Positional(rows) => RowKey::Position(rows[i]),
        }
    }

    fn slice(&self, offset: usize, len: usize) -> TableIndex {
        let end = (offset + len).min(self.len());
        let offset = offset.min(end);
        match self {
            TableIndex::Time(ts) => TableIndex::Time(ts[offset..end].to_vec()),
            TableIndex::Positional(rows) => TableIndex::Positional(rows[offset..end].to_vec()),
        }
    }

    fn filter(&self, keep: &[bool]) -> TableIndex {
        fn retain<T: Copy>(values: &[T], keep: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(keep)
                .filter(|(_, &k)| k)
                .map(|(v, _)| *v)
                .collect()
        }
        match self {
            TableIndex::Time(ts) => TableIndex::Time(retain(ts, keep)),
            TableIndex::Positional(rows) => TableIndex::Positional(retain(rows, keep)),
        }
    }
}

/// One row of a table preview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    pub key: RowKey,
    pub values: BTreeMap<String, Option<f64>>,
}

/// First and last key of a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub start: RowKey,
    pub end: RowKey,
}

/// Shape and completeness summary of a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetInfo {
    pub total_rows: usize,
    pub total_columns: usize,
    pub columns: Vec<String>,
    pub time_indexed: bool,
    pub date_range: Option<DateRange>,
    /// Null or NaN count per column
    pub missing_values: BTreeMap<String, usize>,
}

/// Descriptive statistics of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// An ordered, keyed table of Float64 observations.
///
/// Invariants: the index is sorted ascending (time index only) and its length
/// equals the frame height; every column is Float64. Operations return new
/// tables and never mutate `self`.
#[derive(Debug, Clone)]
pub struct TemporalTable {
    frame: DataFrame,
    index: TableIndex,
}

pub(crate) fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::UInt64
            | DataType::UInt32
    )
}

/// Cast every column of the frame to Float64, rejecting non-numeric columns
fn cast_to_float(frame: DataFrame) -> Result<DataFrame> {
    let mut columns = Vec::with_capacity(frame.width());
    for column in frame.get_columns() {
        if !is_numeric(column.dtype()) {
            return Err(PipelineError::DataError(format!(
                "Column '{}' is not numeric ({})",
                column.name(),
                column.dtype()
            )));
        }
        columns.push(column.cast(&DataType::Float64)?);
    }
    Ok(DataFrame::new(columns)?)
}

impl TemporalTable {
    /// Create a time-indexed table
    ///
    /// # Arguments
    ///
    /// * `frame` - Numeric columns, one row per timestamp
    /// * `timestamps` - Row timestamps, sorted ascending
    pub fn new(frame: DataFrame, timestamps: Vec<NaiveDateTime>) -> Result<Self> {
        Self::with_index(frame, TableIndex::Time(timestamps))
    }

    /// Create a table without a time index
    pub fn positional(frame: DataFrame) -> Result<Self> {
        let rows = (0..frame.height()).collect();
        Self::with_index(frame, TableIndex::Positional(rows))
    }

    /// Create a table from an explicit index
    pub fn with_index(frame: DataFrame, index: TableIndex) -> Result<Self> {
        if frame.width() == 0 {
            return Err(PipelineError::DataError("Table has no columns".to_string()));
        }
        if index.len() != frame.height() {
            return Err(PipelineError::DataError(format!(
                "Index length ({}) does not match row count ({})",
                index.len(),
                frame.height()
            )));
        }
        if let TableIndex::Time(ts) = &index {
            if let Some(pos) = ts.windows(2).position(|w| w[0] > w[1]) {
                return Err(PipelineError::DataError(format!(
                    "Time index is not sorted ascending at row {}",
                    pos + 1
                )));
            }
        }

        Ok(Self {
            frame: cast_to_float(frame)?,
            index,
        })
    }

    /// Convenience constructor from named value vectors
    pub fn from_columns(timestamps: Vec<NaiveDateTime>, columns: Vec<(&str, Vec<f64>)>) -> Result<Self> {
        let columns: Vec<Column> = columns
            .into_iter()
            .map(|(name, values)| Series::new(name.into(), values).into_column())
            .collect();
        Self::new(DataFrame::new(columns)?, timestamps)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn index(&self) -> &TableIndex {
        &self.index
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }

    pub fn is_time_indexed(&self) -> bool {
        matches!(self.index, TableIndex::Time(_))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    /// Every name in `names` that is not a column of this table, in order
    pub fn missing_columns<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        names
            .iter()
            .map(|n| n.as_ref())
            .filter(|n| !self.has_column(n))
            .map(|n| n.to_string())
            .collect()
    }

    /// Fail with `ColumnNotFound` naming every absent column
    pub fn require_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let missing = self.missing_columns(names);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::ColumnNotFound {
                missing,
                available: self.column_names(),
            })
        }
    }

    pub fn key_at(&self, i: usize) -> Option<RowKey> {
        (i < self.height()).then(|| self.index.key_at(i))
    }

    pub fn row_keys(&self) -> Vec<RowKey> {
        (0..self.height()).map(|i| self.index.key_at(i)).collect()
    }

    pub fn first_key(&self) -> Option<RowKey> {
        self.key_at(0)
    }

    pub fn last_key(&self) -> Option<RowKey> {
        self.height().checked_sub(1).and_then(|i| self.key_at(i))
    }

    /// Column values, nulls as `None`
    pub fn values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        self.require_columns(&[name])?;
        Ok(self.frame.column(name)?.f64()?.into_iter().collect())
    }

    /// Column values with nulls mapped to NaN
    pub fn values_f64(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self
            .values(name)?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }

    /// Rows `offset..offset + len`, clamped to the table
    pub fn slice(&self, offset: usize, len: usize) -> TemporalTable {
        let index = self.index.slice(offset, len);
        let frame = self.frame.slice(offset as i64, index.len());
        TemporalTable { frame, index }
    }

    /// First `n` rows
    pub fn head(&self, n: usize) -> TemporalTable {
        self.slice(0, n)
    }

    /// Keep only the named columns, in the given order
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Result<TemporalTable> {
        self.require_columns(columns)?;
        let frame = self.frame.select(columns.iter().map(|c| c.as_ref()))?;
        Ok(TemporalTable {
            frame,
            index: self.index.clone(),
        })
    }

    /// Add or replace a column. Returns `true` when a column of the same name
    /// was replaced.
    pub fn with_column(&self, series: Series) -> Result<(TemporalTable, bool)> {
        if series.len() != self.height() {
            return Err(PipelineError::DataError(format!(
                "Column '{}' has {} values for a table of {} rows",
                series.name(),
                series.len(),
                self.height()
            )));
        }
        let replaced = self.has_column(series.name());
        let mut frame = self.frame.clone();
        frame.with_column(series.cast(&DataType::Float64)?)?;
        Ok((
            TemporalTable {
                frame,
                index: self.index.clone(),
            },
            replaced,
        ))
    }

    /// Keep the rows whose mask entry is `true`
    pub fn filter_rows(&self, keep: &[bool]) -> Result<TemporalTable> {
        if keep.len() != self.height() {
            return Err(PipelineError::DataError(format!(
                "Row mask has {} entries for a table of {} rows",
                keep.len(),
                self.height()
            )));
        }
        let mask = BooleanChunked::from_slice("keep".into(), keep);
        Ok(TemporalTable {
            frame: self.frame.filter(&mask)?,
            index: self.index.filter(keep),
        })
    }

    /// `true` for rows where every column holds a finite or infinite number
    /// (neither null nor NaN)
    pub fn complete_row_mask(&self) -> Result<Vec<bool>> {
        let mut keep = vec![true; self.height()];
        for column in self.frame.get_columns() {
            for (i, value) in column.f64()?.into_iter().enumerate() {
                if !matches!(value, Some(v) if !v.is_nan()) {
                    keep[i] = false;
                }
            }
        }
        Ok(keep)
    }

    /// Drop every row holding a missing value in any column. Returns the
    /// reduced table and the number of dropped rows.
    pub fn drop_incomplete_rows(&self) -> Result<(TemporalTable, usize)> {
        let keep = self.complete_row_mask()?;
        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return Ok((self.clone(), 0));
        }
        Ok((self.filter_rows(&keep)?, dropped))
    }

    /// First `n` rows as key/value records
    pub fn preview(&self, n: usize) -> Result<Vec<PreviewRow>> {
        let head = self.head(n);
        let names = head.column_names();
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            columns.push(head.values(name)?);
        }

        Ok((0..head.height())
            .map(|i| PreviewRow {
                key: head.index.key_at(i),
                values: names
                    .iter()
                    .zip(&columns)
                    .map(|(name, values)| (name.clone(), values[i]))
                    .collect(),
            })
            .collect())
    }

    /// Shape, key range and missing-value counts
    pub fn dataset_info(&self) -> Result<DatasetInfo> {
        let mut missing_values = BTreeMap::new();
        for column in self.frame.get_columns() {
            let missing = column
                .f64()?
                .into_iter()
                .filter(|v| !matches!(v, Some(x) if !x.is_nan()))
                .count();
            missing_values.insert(column.name().to_string(), missing);
        }

        let date_range = match (self.first_key(), self.last_key()) {
            (Some(start), Some(end)) => Some(DateRange { start, end }),
            _ => None,
        };

        Ok(DatasetInfo {
            total_rows: self.height(),
            total_columns: self.width(),
            columns: self.column_names(),
            time_indexed: self.is_time_indexed(),
            date_range,
            missing_values,
        })
    }

    /// Count, mean, sample standard deviation, min and max of every column
    pub fn describe(&self) -> Result<BTreeMap<String, ColumnStats>> {
        let mut stats = BTreeMap::new();
        for column in self.frame.get_columns() {
            let ca = column.f64()?;
            stats.insert(
                column.name().to_string(),
                ColumnStats {
                    count: ca.len() - ca.null_count(),
                    mean: ca.mean(),
                    std: ca.std(1),
                    min: ca.min(),
                    max: ca.max(),
                },
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample() -> TemporalTable {
        TemporalTable::from_columns(
            vec![day(1), day(2), day(3), day(4)],
            vec![
                ("Close", vec![10.0, 11.0, f64::NAN, 13.0]),
                ("Volume", vec![100.0, 200.0, 300.0, 400.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_unsorted_index_is_rejected() {
        let result = TemporalTable::from_columns(vec![day(2), day(1)], vec![("Close", vec![1.0, 2.0])]);
        assert!(matches!(result, Err(PipelineError::DataError(_))));
    }

    #[test]
    fn test_index_length_must_match_rows() {
        let result = TemporalTable::from_columns(vec![day(1)], vec![("Close", vec![1.0, 2.0])]);
        assert!(matches!(result, Err(PipelineError::DataError(_))));
    }

    #[test]
    fn test_integer_columns_are_cast_to_float() {
        let frame = DataFrame::new(vec![Series::new("Volume".into(), vec![1i64, 2, 3]).into_column()]).unwrap();
        let table = TemporalTable::positional(frame).unwrap();
        assert_eq!(table.values_f64("Volume").unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(table.row_keys(), vec![RowKey::Position(0), RowKey::Position(1), RowKey::Position(2)]);
    }

    #[test]
    fn test_require_columns_lists_all_missing() {
        let table = sample();
        match table.require_columns(&["Close", "VWAP", "High"]) {
            Err(PipelineError::ColumnNotFound { missing, .. }) => {
                assert_eq!(missing, vec!["VWAP".to_string(), "High".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_drop_incomplete_rows_treats_nan_as_missing() {
        let (clean, dropped) = sample().drop_incomplete_rows().unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(clean.height(), 3);
        assert_eq!(clean.row_keys(), vec![RowKey::Time(day(1)), RowKey::Time(day(2)), RowKey::Time(day(4))]);
        assert_eq!(clean.values_f64("Volume").unwrap(), vec![100.0, 200.0, 400.0]);
    }

    #[test]
    fn test_slice_keeps_keys_in_step() {
        let tail = sample().slice(2, 10);
        assert_eq!(tail.height(), 2);
        assert_eq!(tail.first_key(), Some(RowKey::Time(day(3))));
        assert_eq!(tail.last_key(), Some(RowKey::Time(day(4))));
    }

    #[test]
    fn test_dataset_info_counts_missing_values() {
        let info = sample().dataset_info().unwrap();
        assert_eq!(info.total_rows, 4);
        assert_eq!(info.missing_values["Close"], 1);
        assert_eq!(info.missing_values["Volume"], 0);
        assert_eq!(info.date_range.unwrap().end, RowKey::Time(day(4)));
    }

    #[test]
    fn test_row_key_next_and_alignment() {
        let key = RowKey::Time(day(1));
        assert_eq!(key.next(), RowKey::Time(day(2)));
        assert!(key.aligned_with(&RowKey::Time(day(1)), 0));
        assert!(!key.aligned_with(&RowKey::Time(day(2)), 3600));
        assert!(key.aligned_with(&RowKey::Time(day(2)), 86_400));
        assert!(!key.aligned_with(&RowKey::Position(0), 0));
        assert_eq!(RowKey::Position(4).next(), RowKey::Position(5));
        assert_eq!(key.to_string(), "2024-01-01 00:00:00");
    }
}
