// External crates
use log::info;
use serde::Serialize;

// Internal modules
use crate::data::temporal_table::{RowKey, TableIndex, TemporalTable};
use crate::error::{PipelineError, Result};

/// Training prefix and testing suffix of one table
#[derive(Debug, Clone)]
pub struct Split {
    pub training: TemporalTable,
    pub testing: TemporalTable,
    /// Key of the first testing row
    pub cut: RowKey,
}

/// Row counts of a split, for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitInfo {
    pub training_rows: usize,
    pub testing_rows: usize,
    pub cut: RowKey,
}

impl Split {
    pub fn info(&self) -> SplitInfo {
        SplitInfo {
            training_rows: self.training.height(),
            testing_rows: self.testing.height(),
            cut: self.cut,
        }
    }
}

/// Split a table into training and testing partitions by time order.
///
/// The cut position is `floor(rows * ratio)`. For a time index every row
/// sharing the cut timestamp lands in the testing partition; otherwise the
/// table is sliced positionally at the cut.
///
/// # Arguments
///
/// * `table` - Table to partition
/// * `ratio` - Fraction of rows for training, strictly between 0 and 1
///
/// # Returns
///
/// Both partitions, whose row counts sum to the input row count
pub fn split(table: &TemporalTable, ratio: f64) -> Result<Split> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(PipelineError::InvalidSplitRatio(ratio));
    }
    let rows = table.height();
    if rows == 0 {
        return Err(PipelineError::insufficient("split", 2, 0));
    }

    let cut_index = ((rows as f64) * ratio).floor() as usize;
    let boundary = match table.index() {
        TableIndex::Time(ts) if cut_index < rows => {
            let cut_ts = ts[cut_index];
            ts.partition_point(|t| *t < cut_ts)
        }
        _ => cut_index,
    };

    let training = table.slice(0, boundary);
    let testing = table.slice(boundary, rows - boundary);
    if training.is_empty() || testing.is_empty() {
        return Err(PipelineError::InsufficientData {
            context: format!(
                "split at ratio {} ({} training rows, {} testing rows)",
                ratio,
                training.height(),
                testing.height()
            ),
            required: 1,
            available: training.height().min(testing.height()),
        });
    }

    let cut = testing
        .first_key()
        .ok_or_else(|| PipelineError::insufficient("split", 1, 0))?;
    info!(
        "Split {} rows at {}: {} training, {} testing",
        rows,
        cut,
        training.height(),
        testing.height()
    );

    Ok(Split {
        training,
        testing,
        cut,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use polars::prelude::*;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn daily_table(n: u32) -> TemporalTable {
        TemporalTable::from_columns(
            (1..=n).map(day).collect(),
            vec![("Close", (1..=n).map(f64::from).collect())],
        )
        .unwrap()
    }

    #[test]
    fn test_split_sizes_sum_to_total() {
        let table = daily_table(10);
        let result = split(&table, 0.8).unwrap();
        assert_eq!(result.training.height(), 8);
        assert_eq!(result.testing.height(), 2);
        assert_eq!(result.cut, RowKey::Time(day(9)));
    }

    #[test]
    fn test_degenerate_ratios_are_rejected() {
        let table = daily_table(5);
        for ratio in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            assert!(matches!(split(&table, ratio), Err(PipelineError::InvalidSplitRatio(_))));
        }
    }

    #[test]
    fn test_rows_sharing_cut_timestamp_go_to_testing() {
        let table = TemporalTable::from_columns(
            vec![day(1), day(2), day(3), day(3), day(4)],
            vec![("Close", vec![1.0, 2.0, 3.0, 4.0, 5.0])],
        )
        .unwrap();
        // floor(5 * 0.6) = 3 points at the second row stamped day 3
        let result = split(&table, 0.6).unwrap();
        assert_eq!(result.training.height(), 2);
        assert_eq!(result.testing.height(), 3);
        assert_eq!(result.testing.values_f64("Close").unwrap(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_positional_fallback() {
        let frame = DataFrame::new(vec![Series::new("Close".into(), vec![1.0, 2.0, 3.0, 4.0]).into_column()]).unwrap();
        let table = TemporalTable::positional(frame).unwrap();
        let result = split(&table, 0.5).unwrap();
        assert_eq!(result.training.height(), 2);
        assert_eq!(result.cut, RowKey::Position(2));
    }

    #[test]
    fn test_empty_partition_is_insufficient_data() {
        let table = daily_table(3);
        assert!(matches!(split(&table, 0.2), Err(PipelineError::InsufficientData { .. })));
    }
}
