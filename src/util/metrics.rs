// External crates
use log::{info, warn};
use ndarray::{s, Array1};
use num_traits::ToPrimitive;
use serde::Serialize;
use std::fmt;

// Internal modules
use crate::constants::MAPE_ZERO_THRESHOLD;
use crate::error::{PipelineError, Result};

/// Accuracy of a forecast against observed values.
///
/// Computed over the positions where both series are finite. Undefined
/// metrics are `None` and serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Percent, over positions with a non-zero actual value
    pub mape: Option<f64>,
    /// Percent of consecutive moves whose direction was predicted correctly
    pub directional_accuracy: Option<f64>,
    /// Paired positions after truncation to the shorter series
    pub total: usize,
    /// Positions finite in both series
    pub valid: usize,
    pub nan_predicted: usize,
    pub nan_actual: usize,
    pub inf_predicted: usize,
    pub inf_actual: usize,
}

fn to_f64_vec<T: ToPrimitive>(values: &[T], series: &'static str) -> Result<Vec<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(position, v)| v.to_f64().ok_or(PipelineError::ConversionError { series, position }))
        .collect()
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Compare predicted with actual values, paired by position.
///
/// Both series are truncated to the shorter length. Positions where either
/// value is NaN or infinite are excluded and counted.
///
/// # Arguments
///
/// * `predicted` - Forecast values
/// * `actual` - Observed values
///
/// # Returns
///
/// MSE, RMSE, MAE, MAPE and directional accuracy with the exclusion counts
pub fn calculate_metrics<P: ToPrimitive, A: ToPrimitive>(predicted: &[P], actual: &[A]) -> Result<MetricsReport> {
    let total = predicted.len().min(actual.len());
    if total == 0 {
        return Err(PipelineError::insufficient("metrics", 1, 0));
    }
    if predicted.len() != actual.len() {
        warn!(
            "Predicted ({}) and actual ({}) lengths differ; comparing the first {} positions",
            predicted.len(),
            actual.len(),
            total
        );
    }

    let predicted = to_f64_vec(&predicted[..total], "predicted")?;
    let actual = to_f64_vec(&actual[..total], "actual")?;

    let nan_predicted = predicted.iter().filter(|v| v.is_nan()).count();
    let nan_actual = actual.iter().filter(|v| v.is_nan()).count();
    let inf_predicted = predicted.iter().filter(|v| v.is_infinite()).count();
    let inf_actual = actual.iter().filter(|v| v.is_infinite()).count();

    let (p, a): (Vec<f64>, Vec<f64>) = predicted
        .iter()
        .zip(&actual)
        .filter(|(p, a)| p.is_finite() && a.is_finite())
        .map(|(p, a)| (*p, *a))
        .unzip();
    let valid = p.len();
    if valid == 0 {
        return Err(PipelineError::NoValidData {
            total,
            nan_predicted,
            nan_actual,
            inf_predicted,
            inf_actual,
        });
    }
    if valid < total {
        warn!(
            "Excluded {} of {} positions with non-finite values (NaN: {} predicted, {} actual; Inf: {} predicted, {} actual)",
            total - valid,
            total,
            nan_predicted,
            nan_actual,
            inf_predicted,
            inf_actual
        );
    }

    let p = Array1::from(p);
    let a = Array1::from(a);
    let errors = &a - &p;

    let mse = errors.mapv(|e| e * e).mean().unwrap_or(f64::NAN);
    let rmse = mse.sqrt();
    let mae = errors.mapv(f64::abs).mean().unwrap_or(f64::NAN);

    let ratios: Vec<f64> = a
        .iter()
        .zip(errors.iter())
        .filter(|(a, _)| a.abs() > MAPE_ZERO_THRESHOLD)
        .map(|(a, e)| (e / a).abs())
        .collect();
    let mape = Array1::from(ratios).mean().map(|m| m * 100.0);

    let directional_accuracy = if valid < 2 {
        None
    } else {
        let actual_moves = &a.slice(s![1..]) - &a.slice(s![..-1]);
        let predicted_moves = &p.slice(s![1..]) - &p.slice(s![..-1]);
        let agreed = actual_moves
            .iter()
            .zip(predicted_moves.iter())
            .filter(|(x, y)| sign(**x) == sign(**y))
            .count();
        Some(agreed as f64 / actual_moves.len() as f64 * 100.0)
    };

    let report = MetricsReport {
        mse,
        rmse,
        mae,
        mape,
        directional_accuracy,
        total,
        valid,
        nan_predicted,
        nan_actual,
        inf_predicted,
        inf_actual,
    };
    info!("Metrics over {} of {} positions: RMSE {:.4}, MAE {:.4}", valid, total, rmse, mae);
    Ok(report)
}

fn optional(value: Option<f64>, suffix: &str) -> String {
    value.map_or_else(|| "undefined".to_string(), |v| format!("{:.4}{}", v, suffix))
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24}{:>16.6}", "MSE", self.mse)?;
        writeln!(f, "{:<24}{:>16.6}", "RMSE", self.rmse)?;
        writeln!(f, "{:<24}{:>16.6}", "MAE", self.mae)?;
        writeln!(f, "{:<24}{:>16}", "MAPE", optional(self.mape, "%"))?;
        writeln!(f, "{:<24}{:>16}", "Directional accuracy", optional(self.directional_accuracy, "%"))?;
        write!(f, "{:<24}{:>16}", "Valid positions", format!("{}/{}", self.valid, self.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_basic_errors() {
        let report = calculate_metrics(&[1.0, 2.0, 3.0], &[1.0, 2.0, 4.0]).unwrap();
        assert_relative_eq!(report.mae, 1.0 / 3.0);
        assert_relative_eq!(report.mse, 1.0 / 3.0);
        assert_relative_eq!(report.rmse, (1.0f64 / 3.0).sqrt());
        assert_relative_eq!(report.mape.unwrap(), 25.0 / 3.0);
        assert_eq!(report.valid, 3);
    }

    #[test]
    fn test_integer_inputs() {
        let report = calculate_metrics(&[1i32, 2, 3], &[1u64, 2, 4]).unwrap();
        assert_relative_eq!(report.mae, 1.0 / 3.0);
    }

    #[test]
    fn test_non_finite_actual_is_excluded() {
        let report = calculate_metrics(&[1.0, 2.0, 3.0, 4.0], &[1.0, f64::NAN, 3.0, 5.0]).unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.valid, 3);
        assert_eq!(report.nan_actual, 1);
        assert_eq!(report.nan_predicted + report.inf_predicted + report.inf_actual, 0);
        assert_relative_eq!(report.mae, 1.0 / 3.0);
    }

    #[test]
    fn test_directional_accuracy() {
        let report = calculate_metrics(&[1.0, 3.0, 0.0, 4.0], &[1.0, 2.0, 1.0, 3.0]).unwrap();
        assert_relative_eq!(report.directional_accuracy.unwrap(), 100.0);

        let flat = calculate_metrics(&[1.0, 2.0, 2.0], &[1.0, 1.0, 2.0]).unwrap();
        assert_relative_eq!(flat.directional_accuracy.unwrap(), 0.0);
    }

    #[test]
    fn test_undefined_metrics_are_none() {
        let report = calculate_metrics(&[0.5], &[0.0]).unwrap();
        assert!(report.mape.is_none());
        assert!(report.directional_accuracy.is_none());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["mape"].is_null());
        assert!(json["directional_accuracy"].is_null());
    }

    #[test]
    fn test_truncates_to_shorter_series() {
        let report = calculate_metrics(&[1.0, 2.0, 3.0, 100.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.mse, 0.0);
    }

    #[test]
    fn test_empty_and_all_invalid() {
        let empty: [f64; 0] = [];
        assert!(matches!(
            calculate_metrics(&empty, &[1.0]),
            Err(PipelineError::InsufficientData { .. })
        ));
        assert!(matches!(
            calculate_metrics(&[f64::NAN, 1.0], &[1.0, f64::INFINITY]),
            Err(PipelineError::NoValidData { total: 2, nan_predicted: 1, inf_actual: 1, .. })
        ));
    }
}
