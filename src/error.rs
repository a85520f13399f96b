//! Error types for the forecasting pipeline

use polars::prelude::PolarsError;
use thiserror::Error;

/// Every failure the pipeline can surface to its caller.
///
/// No stage swallows one of these; an operation either completes fully or
/// returns the error and leaves the session as it was.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Split ratio outside the open interval (0, 1)
    #[error("Invalid split ratio {0}: must lie strictly between 0 and 1")]
    InvalidSplitRatio(f64),

    /// One or more requested columns are absent from the table
    #[error("Columns not found: {missing:?} (available: {available:?})")]
    ColumnNotFound {
        missing: Vec<String>,
        available: Vec<String>,
    },

    /// Not enough rows for the requested operation
    #[error("Insufficient data for {context}: {available} rows available, {required} required")]
    InsufficientData {
        context: String,
        required: usize,
        available: usize,
    },

    /// No candidate order could be estimated
    #[error("ARIMA fit failed: {attempted} candidate orders attempted, none converged ({reason})")]
    FitFailed { attempted: usize, reason: String },

    /// The model was trained with exogenous features but the forecast has none (or too few)
    #[error("Missing exogenous features {features:?}: {available} rows available for a horizon of {required}")]
    MissingExogenousFeatures {
        features: Vec<String>,
        required: usize,
        available: usize,
    },

    /// A value could not be represented as f64
    #[error("Cannot convert {series} value at position {position} to a floating point number")]
    ConversionError { series: &'static str, position: usize },

    /// Every paired position holds a NaN or infinite value
    #[error(
        "No valid (finite) predictions and actual values available. Total values: {total}, \
         NaN in predictions: {nan_predicted}, NaN in actual: {nan_actual}, \
         Inf in predictions: {inf_predicted}, Inf in actual: {inf_actual}"
    )]
    NoValidData {
        total: usize,
        nan_predicted: usize,
        nan_actual: usize,
        inf_predicted: usize,
        inf_actual: usize,
    },

    /// Forecast and actual row keys diverge beyond the configured tolerance
    #[error("Forecast and actual series are misaligned at {mismatched} of {compared} positions (first at position {first_position})")]
    TimestampMisalignment {
        mismatched: usize,
        compared: usize,
        first_position: usize,
    },

    /// The order search was cancelled through its token
    #[error("Order search cancelled after {evaluated} candidate fits")]
    SearchCancelled { evaluated: usize },

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An operation ran before its prerequisite state existed
    #[error("{0}")]
    MissingState(&'static str),

    /// Error related to data validation or loading
    #[error("Data error: {0}")]
    DataError(String),

    /// Malformed configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn insufficient(context: impl Into<String>, required: usize, available: usize) -> Self {
        PipelineError::InsufficientData {
            context: context.into(),
            required,
            available,
        }
    }
}
