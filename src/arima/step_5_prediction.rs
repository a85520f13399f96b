// External crates
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Internal modules
use crate::arima::step_1_differencing::{difference_continuation, integrate, level_tails};
use crate::arima::step_4_train_model::FittedModel;
use crate::data::temporal_table::{RowKey, TemporalTable};
use crate::error::{PipelineError, Result};

/// What to do when forecast and actual keys disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentPolicy {
    Warn,
    Fail,
}

impl FromStr for AlignmentPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(AlignmentPolicy::Warn),
            "fail" => Ok(AlignmentPolicy::Fail),
            other => Err(PipelineError::InvalidParameter(format!(
                "Unknown alignment policy '{}' (expected warn or fail)",
                other
            ))),
        }
    }
}

impl fmt::Display for AlignmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlignmentPolicy::Warn => "warn",
            AlignmentPolicy::Fail => "fail",
        })
    }
}

/// Observed values paired with a forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActualSeries {
    pub keys: Vec<RowKey>,
    pub values: Vec<f64>,
}

/// Result of comparing forecast keys with actual keys position by position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentReport {
    pub compared: usize,
    pub mismatched: usize,
    pub first_mismatch: Option<usize>,
}

impl AlignmentReport {
    pub fn is_aligned(&self) -> bool {
        self.mismatched == 0
    }
}

/// Point forecasts in chronological order, optionally paired with actuals.
///
/// Pairing with the actual series is positional: index 0 with index 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub keys: Vec<RowKey>,
    pub values: Vec<f64>,
    pub actual: Option<ActualSeries>,
}

/// Forecast as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionOutput {
    pub values: Vec<f64>,
    pub dates: Vec<String>,
    pub actual: Option<Vec<f64>>,
    pub n_periods: usize,
}

/// Columns for plotting predicted against actual values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub dates: Vec<String>,
    pub predicted: Vec<f64>,
    pub actual: Option<Vec<f64>>,
}

impl Forecast {
    /// Replace the paired actual series
    pub fn with_actual(mut self, actual: ActualSeries) -> Self {
        self.actual = Some(actual);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compare keys at each common position. `None` without an actual series.
    pub fn alignment_report(&self, tolerance_secs: i64) -> Option<AlignmentReport> {
        let actual = self.actual.as_ref()?;
        let compared = self.keys.len().min(actual.keys.len());
        let mismatches: Vec<usize> = (0..compared)
            .filter(|&i| !self.keys[i].aligned_with(&actual.keys[i], tolerance_secs))
            .collect();
        Some(AlignmentReport {
            compared,
            mismatched: mismatches.len(),
            first_mismatch: mismatches.first().copied(),
        })
    }

    /// Apply the alignment policy: log misalignment under `Warn`, fail with
    /// `TimestampMisalignment` under `Fail`
    pub fn check_alignment(&self, policy: AlignmentPolicy, tolerance_secs: i64) -> Result<()> {
        let Some(report) = self.alignment_report(tolerance_secs) else {
            return Ok(());
        };
        if report.is_aligned() {
            return Ok(());
        }
        let first_position = report.first_mismatch.unwrap_or(0);
        match policy {
            AlignmentPolicy::Warn => {
                warn!(
                    "Forecast and actual keys differ at {} of {} positions (first at {}); pairing stays positional",
                    report.mismatched, report.compared, first_position
                );
                Ok(())
            }
            AlignmentPolicy::Fail => Err(PipelineError::TimestampMisalignment {
                mismatched: report.mismatched,
                compared: report.compared,
                first_position,
            }),
        }
    }

    pub fn output(&self) -> PredictionOutput {
        PredictionOutput {
            values: self.values.clone(),
            dates: self.keys.iter().map(|k| k.to_string()).collect(),
            actual: self.actual.as_ref().map(|a| a.values.clone()),
            n_periods: self.values.len(),
        }
    }

    pub fn chart_data(&self) -> ChartData {
        ChartData {
            dates: self.keys.iter().map(|k| k.to_string()).collect(),
            predicted: self.values.clone(),
            actual: self.actual.as_ref().map(|a| a.values.clone()),
        }
    }
}

/// Recursive multi-step forecast of the target on its original scale.
///
/// Future innovations are zero. `future_exog` holds one column per model
/// feature with at least `n_periods` values.
pub fn forecast_values(model: &FittedModel, n_periods: usize, future_exog: &[Vec<f64>]) -> Result<Vec<f64>> {
    let features = model.history.exog_count();
    if future_exog.len() != features || future_exog.iter().any(|col| col.len() < n_periods) {
        return Err(PipelineError::MissingExogenousFeatures {
            features: model.feature_columns.clone(),
            required: n_periods,
            available: future_exog.iter().map(Vec::len).min().unwrap_or(0),
        });
    }

    let d = model.order.d;
    let exog: Vec<Vec<f64>> = model
        .history
        .exogenous
        .iter()
        .zip(future_exog)
        .map(|(past, future)| difference_continuation(past, &future[..n_periods], d))
        .collect();

    let mut w = model.differenced.clone();
    let mut e = model.residuals.clone();
    let mut forecast = Vec::with_capacity(n_periods);
    for h in 0..n_periods {
        let row: Vec<f64> = exog.iter().map(|col| col[h]).collect();
        let next = model.coefficients.one_step(&w, &e, &row);
        w.push(next);
        e.push(0.0);
        forecast.push(next);
    }

    Ok(integrate(&forecast, &level_tails(&model.history.target, d)))
}

/// Keys for an `n`-step horizon: testing keys first, then keys synthesized
/// one step after the last known key
fn horizon_keys(model: &FittedModel, testing: Option<&TemporalTable>, n: usize) -> Vec<RowKey> {
    let mut keys: Vec<RowKey> = testing
        .map(|t| t.row_keys().into_iter().take(n).collect())
        .unwrap_or_default();
    let mut last = keys
        .last()
        .copied()
        .or(model.last_key)
        .unwrap_or(RowKey::Position(model.training_rows.saturating_sub(1)));
    while keys.len() < n {
        last = last.next();
        keys.push(last);
    }
    keys
}

fn exogenous_rows(model: &FittedModel, source: Option<&TemporalTable>, n: usize) -> Result<Vec<Vec<f64>>> {
    if !model.uses_features() {
        return Ok(Vec::new());
    }
    let missing = |available| PipelineError::MissingExogenousFeatures {
        features: model.feature_columns.clone(),
        required: n,
        available,
    };
    let table = source.ok_or_else(|| missing(0))?;
    table.require_columns(&model.feature_columns)?;
    if table.height() < n {
        return Err(missing(table.height()));
    }

    let mut columns = Vec::with_capacity(model.feature_columns.len());
    for name in &model.feature_columns {
        let values: Vec<f64> = table.values_f64(name)?.into_iter().take(n).collect();
        let bad = values.iter().filter(|v| !v.is_finite()).count();
        if bad > 0 {
            return Err(PipelineError::DataError(format!(
                "Exogenous column '{}' has {} missing or non-finite values in the forecast horizon",
                name, bad
            )));
        }
        columns.push(values);
    }
    Ok(columns)
}

/// Produce a forecast from a fitted model.
///
/// # Arguments
///
/// * `model` - Fitted model
/// * `n_periods` - Horizon; defaults to the testing partition's row count
/// * `testing` - Testing partition, the source of keys, actual values and
///   (without `exog`) exogenous rows
/// * `exog` - Explicit exogenous rows for the horizon
/// * `policy` - Reaction to forecast/actual key mismatches
/// * `tolerance_secs` - Allowed key difference before a mismatch is counted
///
/// # Returns
///
/// Exactly `n_periods` forecasts, paired positionally with the testing
/// partition's target values when available
pub fn predict(
    model: &FittedModel,
    n_periods: Option<usize>,
    testing: Option<&TemporalTable>,
    exog: Option<&TemporalTable>,
    policy: AlignmentPolicy,
    tolerance_secs: i64,
) -> Result<Forecast> {
    let n = match n_periods {
        Some(0) => return Err(PipelineError::InvalidParameter("n_periods must be positive".to_string())),
        Some(n) => n,
        None => match testing.map(TemporalTable::height) {
            Some(rows) if rows > 0 => rows,
            _ => {
                return Err(PipelineError::MissingState(
                    "No forecast horizon given and no testing partition available",
                ))
            }
        },
    };

    let future_exog = exogenous_rows(model, exog.or(testing), n)?;
    let values = forecast_values(model, n, &future_exog)?;
    let keys = horizon_keys(model, testing, n);

    let actual = match testing {
        Some(table) if table.has_column(&model.target_column) && !table.is_empty() => {
            let count = n.min(table.height());
            Some(ActualSeries {
                keys: table.row_keys().into_iter().take(count).collect(),
                values: table
                    .values_f64(&model.target_column)?
                    .into_iter()
                    .take(count)
                    .collect(),
            })
        }
        _ => None,
    };

    let forecast = Forecast { keys, values, actual };
    forecast.check_alignment(policy, tolerance_secs)?;

    let nan_forecast = forecast.values.iter().filter(|v| v.is_nan()).count();
    let nan_actual = forecast
        .actual
        .as_ref()
        .map_or(0, |a| a.values.iter().filter(|v| v.is_nan()).count());
    info!(
        "Forecast {} periods with ARIMA{} ({} NaN forecasts, {} NaN actual values)",
        n, model.order, nan_forecast, nan_actual
    );

    Ok(forecast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arima::step_2_estimation::ArimaOrder;
    use crate::arima::step_3_order_search::SearchBounds;
    use crate::arima::step_4_train_model::fit_order;
    use crate::util::test_utils::{daily_bars, day};
    use approx::assert_abs_diff_eq;

    fn linear_table(n: u32) -> TemporalTable {
        TemporalTable::from_columns(
            (1..=n).map(day).collect(),
            vec![("VWAP", (1..=n).map(|t| 10.0 + 2.0 * f64::from(t) + f64::from(t % 2) * 0.01).collect())],
        )
        .unwrap()
    }

    #[test]
    fn test_drift_model_extends_trend() {
        let table = linear_table(40);
        let model = fit_order(&table, "VWAP", &[] as &[&str], ArimaOrder::new(0, 1, 0), &SearchBounds::default()).unwrap();
        let forecast = predict(&model, Some(3), None, None, AlignmentPolicy::Warn, 0).unwrap();
        assert_eq!(forecast.len(), 3);
        let last = 10.0 + 2.0 * 40.0;
        assert_abs_diff_eq!(forecast.values[0], last + 2.0, epsilon = 0.05);
        assert_abs_diff_eq!(forecast.values[2], last + 6.0, epsilon = 0.1);
        assert_eq!(forecast.keys, vec![RowKey::Time(day(41)), RowKey::Time(day(42)), RowKey::Time(day(43))]);
        assert!(forecast.actual.is_none());
    }

    #[test]
    fn test_horizon_defaults_to_testing_rows() {
        let table = daily_bars(100, 5);
        let training = table.slice(0, 80);
        let testing = table.slice(80, 20);
        let model = fit_order(&training, "VWAP", &["Volume"], ArimaOrder::new(1, 1, 0), &SearchBounds::default()).unwrap();
        let forecast = predict(&model, None, Some(&testing), None, AlignmentPolicy::Fail, 0).unwrap();
        assert_eq!(forecast.len(), 20);
        assert_eq!(forecast.keys, testing.row_keys());
        let actual = forecast.actual.as_ref().unwrap();
        assert_eq!(actual.values, testing.values_f64("VWAP").unwrap());
    }

    #[test]
    fn test_horizon_beyond_testing_synthesizes_keys() {
        let table = linear_table(50);
        let training = table.slice(0, 45);
        let testing = table.slice(45, 5);
        let model = fit_order(&training, "VWAP", &[] as &[&str], ArimaOrder::new(0, 1, 0), &SearchBounds::default()).unwrap();
        let forecast = predict(&model, Some(7), Some(&testing), None, AlignmentPolicy::Warn, 0).unwrap();
        assert_eq!(forecast.keys.len(), 7);
        assert_eq!(forecast.keys[5], RowKey::Time(day(51)));
        assert_eq!(forecast.actual.as_ref().unwrap().values.len(), 5);
        assert_eq!(forecast.output().dates[6], "2023-02-21 00:00:00");
    }

    #[test]
    fn test_missing_exogenous_rows() {
        let table = daily_bars(80, 9);
        let model = fit_order(&table, "VWAP", &["Volume"], ArimaOrder::new(1, 0, 0), &SearchBounds::default()).unwrap();
        let result = predict(&model, Some(5), None, None, AlignmentPolicy::Warn, 0);
        assert!(matches!(result, Err(PipelineError::MissingExogenousFeatures { available: 0, .. })));

        let short = daily_bars(3, 10);
        let result = predict(&model, Some(5), None, Some(&short), AlignmentPolicy::Warn, 0);
        assert!(matches!(result, Err(PipelineError::MissingExogenousFeatures { available: 3, .. })));
    }

    #[test]
    fn test_zero_horizon_and_no_horizon() {
        let table = linear_table(30);
        let model = fit_order(&table, "VWAP", &[] as &[&str], ArimaOrder::new(0, 1, 0), &SearchBounds::default()).unwrap();
        assert!(matches!(
            predict(&model, Some(0), None, None, AlignmentPolicy::Warn, 0),
            Err(PipelineError::InvalidParameter(_))
        ));
        assert!(matches!(
            predict(&model, None, None, None, AlignmentPolicy::Warn, 0),
            Err(PipelineError::MissingState(_))
        ));
    }

    #[test]
    fn test_alignment_policies() {
        let forecast = Forecast {
            keys: vec![RowKey::Time(day(1)), RowKey::Time(day(2))],
            values: vec![1.0, 2.0],
            actual: None,
        }
        .with_actual(ActualSeries {
            keys: vec![RowKey::Time(day(1)), RowKey::Time(day(3))],
            values: vec![1.0, 2.5],
        });

        let report = forecast.alignment_report(0).unwrap();
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.first_mismatch, Some(1));
        assert!(forecast.check_alignment(AlignmentPolicy::Warn, 0).is_ok());
        assert!(matches!(
            forecast.check_alignment(AlignmentPolicy::Fail, 0),
            Err(PipelineError::TimestampMisalignment { mismatched: 1, compared: 2, first_position: 1 })
        ));
        assert!(forecast.check_alignment(AlignmentPolicy::Fail, 86_400).is_ok());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("FAIL".parse::<AlignmentPolicy>().unwrap(), AlignmentPolicy::Fail);
        assert!("ignore".parse::<AlignmentPolicy>().is_err());
    }
}
