// External crates
use log::{info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Internal modules
use crate::constants::PREVIEW_ROWS;
use crate::data::temporal_table::{PreviewRow, TemporalTable};
use crate::error::{PipelineError, Result};

/// Aggregate computed over a trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollingOperation {
    Mean,
    /// Sample standard deviation (ddof = 1)
    Std,
    Min,
    Max,
}

impl RollingOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollingOperation::Mean => "mean",
            RollingOperation::Std => "std",
            RollingOperation::Min => "min",
            RollingOperation::Max => "max",
        }
    }

    /// Parse a list of operation names, failing on the first unknown one
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<RollingOperation>> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

impl FromStr for RollingOperation {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(RollingOperation::Mean),
            "std" => Ok(RollingOperation::Std),
            "min" => Ok(RollingOperation::Min),
            "max" => Ok(RollingOperation::Max),
            other => Err(PipelineError::InvalidParameter(format!(
                "Unknown rolling operation '{}' (expected mean, std, min or max)",
                other
            ))),
        }
    }
}

impl fmt::Display for RollingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one derived column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FeatureDescriptor {
    pub source_column: String,
    pub window: usize,
    pub operation: RollingOperation,
}

impl FeatureDescriptor {
    /// `{source}_rolling_{operation}_{window}`
    pub fn column_name(&self) -> String {
        format!("{}_rolling_{}_{}", self.source_column, self.operation, self.window)
    }
}

/// Every (column, window, operation) combination, columns outermost and
/// operations innermost. Repeated combinations appear once.
pub fn feature_descriptors<S: AsRef<str>>(
    columns: &[S],
    windows: &[usize],
    operations: &[RollingOperation],
) -> Vec<FeatureDescriptor> {
    let mut descriptors: Vec<FeatureDescriptor> = Vec::new();
    for column in columns {
        for &window in windows {
            for &operation in operations {
                let descriptor = FeatureDescriptor {
                    source_column: column.as_ref().to_string(),
                    window,
                    operation,
                };
                if !descriptors.contains(&descriptor) {
                    descriptors.push(descriptor);
                }
            }
        }
    }
    descriptors
}

/// Names of the columns `generate_rolling_features` would produce, without
/// computing anything
pub fn feature_names<S: AsRef<str>>(
    columns: &[S],
    windows: &[usize],
    operations: &[RollingOperation],
) -> Vec<String> {
    feature_descriptors(columns, windows, operations)
        .iter()
        .map(FeatureDescriptor::column_name)
        .collect()
}

/// Compute one trailing-window feature. Rows before the first full window
/// are null.
pub fn rolling_feature(table: &TemporalTable, descriptor: &FeatureDescriptor) -> Result<Series> {
    let name = descriptor.column_name();
    let window = descriptor.window;
    if window == 0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Window size for '{}' must be positive",
            name
        )));
    }

    let series = table
        .frame()
        .column(&descriptor.source_column)?
        .f64()?
        .clone()
        .into_series();
    if series.len() < window {
        return Ok(Series::full_null(name.into(), series.len(), &DataType::Float64));
    }

    let options = RollingOptionsFixedWindow {
        window_size: window,
        min_periods: window,
        center: false,
        weights: None,
        fn_params: None,
    };
    let rolled = match descriptor.operation {
        RollingOperation::Mean => series.rolling_mean(options)?,
        RollingOperation::Std => series.rolling_std(options)?,
        RollingOperation::Min => series.rolling_min(options)?,
        RollingOperation::Max => series.rolling_max(options)?,
    };
    Ok(rolled.with_name(name.into()))
}

/// Table augmented with rolling features
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub table: TemporalTable,
    pub feature_names: Vec<String>,
    pub skipped_columns: Vec<String>,
    pub dropped_rows: usize,
}

/// Summary of a feature generation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureInfo {
    pub feature_count: usize,
    pub feature_names: Vec<String>,
    pub rows: usize,
    pub columns: usize,
    pub preview: Vec<PreviewRow>,
}

impl FeatureSet {
    pub fn info(&self) -> Result<FeatureInfo> {
        Ok(FeatureInfo {
            feature_count: self.feature_names.len(),
            feature_names: self.feature_names.clone(),
            rows: self.table.height(),
            columns: self.table.width(),
            preview: self.table.preview(PREVIEW_ROWS)?,
        })
    }
}

/// Derive rolling-window features and drop every row left incomplete.
///
/// The input table is not modified. Source columns absent from the table
/// are skipped with a warning. A generated name that already exists in the
/// table replaces that column.
///
/// # Arguments
///
/// * `table` - Base table
/// * `columns` - Source column names
/// * `windows` - Trailing window sizes, all positive
/// * `operations` - Aggregates to compute per (column, window)
///
/// # Returns
///
/// The augmented table and the ordered list of generated feature names
pub fn generate_rolling_features<S: AsRef<str>>(
    table: &TemporalTable,
    columns: &[S],
    windows: &[usize],
    operations: &[RollingOperation],
) -> Result<FeatureSet> {
    if let Some(pos) = windows.iter().position(|&w| w == 0) {
        return Err(PipelineError::InvalidParameter(format!(
            "Window sizes must be positive (entry {} is 0)",
            pos
        )));
    }

    let mut skipped_columns = Vec::new();
    let mut present = Vec::new();
    for column in columns {
        let column = column.as_ref();
        if table.has_column(column) {
            if !present.iter().any(|c: &String| c == column) {
                present.push(column.to_string());
            }
        } else {
            warn!("Column '{}' not found in data, skipping rolling features", column);
            skipped_columns.push(column.to_string());
        }
    }

    // Every feature reads the base table so later features never see earlier ones
    let mut augmented = table.clone();
    let mut names = Vec::new();
    for descriptor in feature_descriptors(&present, windows, operations) {
        let series = rolling_feature(table, &descriptor)?;
        let (next, replaced) = augmented.with_column(series)?;
        if replaced {
            warn!(
                "Feature '{}' already exists in the table and was overwritten",
                descriptor.column_name()
            );
        }
        augmented = next;
        names.push(descriptor.column_name());
    }

    let (clean, dropped_rows) = augmented.drop_incomplete_rows()?;
    info!(
        "Generated {} rolling features; dropped {} incomplete rows, {} remain",
        names.len(),
        dropped_rows,
        clean.height()
    );

    Ok(FeatureSet {
        table: clean,
        feature_names: names,
        skipped_columns,
        dropped_rows,
    })
}
