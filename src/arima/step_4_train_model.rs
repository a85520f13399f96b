// External crates
use log::info;
use serde::Serialize;
use std::fmt;

// Internal modules
use crate::arima::step_2_estimation::{estimate, ArimaOrder, Coefficients, Estimate, SeriesData};
use crate::arima::step_3_order_search::{stepwise_search, CancellationToken, InformationCriterion, SearchBounds};
use crate::build_info;
use crate::data::temporal_table::{RowKey, TemporalTable};
use crate::error::{PipelineError, Result};

/// Fit quality and search bookkeeping. Values that could not be computed
/// are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitDiagnostics {
    pub aic: f64,
    pub bic: f64,
    pub aicc: Option<f64>,
    pub log_likelihood: f64,
    pub sigma2: f64,
    pub n_obs: usize,
    pub candidates_evaluated: usize,
    pub candidates_failed: usize,
    pub search_truncated: bool,
}

/// A fitted ARIMA model together with the training history it forecasts from
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub order: ArimaOrder,
    pub target_column: String,
    pub feature_columns: Vec<String>,
    pub criterion: InformationCriterion,
    pub criterion_value: f64,
    pub diagnostics: FitDiagnostics,
    pub coefficients: Coefficients,
    pub summary_text: String,
    pub training_rows: usize,
    /// Key of the last training row
    pub last_key: Option<RowKey>,
    pub(crate) history: SeriesData,
    pub(crate) differenced: Vec<f64>,
    pub(crate) residuals: Vec<f64>,
}

/// Serializable description of a trained model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub order: ArimaOrder,
    pub criterion: InformationCriterion,
    pub criterion_value: f64,
    pub diagnostics: FitDiagnostics,
    pub coefficients: Coefficients,
    pub training_rows: usize,
    pub testing_rows: Option<usize>,
    pub features_used: Vec<String>,
    pub target_column: String,
    pub summary_text: String,
}

/// Extract the target and feature columns of a training table.
///
/// Fails with `ColumnNotFound` listing every absent name, or `DataError` when
/// a column holds missing or non-finite values.
pub fn training_data<S: AsRef<str>>(table: &TemporalTable, target: &str, features: &[S]) -> Result<SeriesData> {
    let mut wanted = vec![target.to_string()];
    wanted.extend(features.iter().map(|f| f.as_ref().to_string()));
    table.require_columns(&wanted)?;

    let mut columns = Vec::with_capacity(wanted.len());
    for name in &wanted {
        let values = table.values_f64(name)?;
        let bad = values.iter().filter(|v| !v.is_finite()).count();
        if bad > 0 {
            return Err(PipelineError::DataError(format!(
                "Column '{}' has {} missing or non-finite values in the training data",
                name, bad
            )));
        }
        columns.push(values);
    }

    let target_values = columns.remove(0);
    SeriesData::new(target_values, columns)
}

/// Search for the best order on a training table and fit it.
///
/// # Arguments
///
/// * `training` - Training partition
/// * `target` - Column to forecast
/// * `features` - Exogenous regressor columns, possibly empty
/// * `bounds` - Order limits and search budget
/// * `cancel` - Token that aborts the search
///
/// # Returns
///
/// The fitted model; nothing partial is returned on failure
pub fn train_model<S: AsRef<str>>(
    training: &TemporalTable,
    target: &str,
    features: &[S],
    bounds: &SearchBounds,
    cancel: &CancellationToken,
) -> Result<FittedModel> {
    let data = training_data(training, target, features)?;
    info!(
        "Training ARIMA on '{}' with {} rows and {} exogenous features",
        target,
        data.len(),
        data.exog_count()
    );
    let outcome = stepwise_search(&data, bounds, cancel)?;
    let diagnostics = diagnostics_of(&outcome.best, outcome.evaluated, outcome.failed, outcome.truncated);
    Ok(assemble(
        training,
        target,
        features,
        data,
        outcome.best,
        bounds.criterion,
        outcome.criterion_value,
        diagnostics,
    ))
}

/// Fit a single fixed order without searching.
///
/// The order is scored with `bounds.criterion` over the same rows a search
/// within `bounds` would use, so its criterion value is comparable with the
/// searched model's.
pub fn fit_order<S: AsRef<str>>(
    training: &TemporalTable,
    target: &str,
    features: &[S],
    order: ArimaOrder,
    bounds: &SearchBounds,
) -> Result<FittedModel> {
    let criterion = bounds.criterion;
    let data = training_data(training, target, features)?;
    let fit = estimate(&data, order, bounds.conditioning())?;
    let value = fit.criterion_value(criterion).ok_or_else(|| PipelineError::FitFailed {
        attempted: 1,
        reason: format!("{} is undefined for ARIMA{} on {} observations", criterion, order, fit.n_obs),
    })?;
    let diagnostics = diagnostics_of(&fit, 1, 0, false);
    Ok(assemble(training, target, features, data, fit, criterion, value, diagnostics))
}

fn diagnostics_of(fit: &Estimate, evaluated: usize, failed: usize, truncated: bool) -> FitDiagnostics {
    FitDiagnostics {
        aic: fit.aic,
        bic: fit.bic,
        aicc: fit.aicc,
        log_likelihood: fit.log_likelihood,
        sigma2: fit.sigma2,
        n_obs: fit.n_obs,
        candidates_evaluated: evaluated,
        candidates_failed: failed,
        search_truncated: truncated,
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble<S: AsRef<str>>(
    training: &TemporalTable,
    target: &str,
    features: &[S],
    history: SeriesData,
    fit: Estimate,
    criterion: InformationCriterion,
    criterion_value: f64,
    diagnostics: FitDiagnostics,
) -> FittedModel {
    let feature_columns: Vec<String> = features.iter().map(|f| f.as_ref().to_string()).collect();
    let summary_text = Summary {
        target,
        features: &feature_columns,
        fit: &fit,
        criterion,
        diagnostics: &diagnostics,
    }
    .to_string();
    FittedModel {
        order: fit.order,
        target_column: target.to_string(),
        feature_columns,
        criterion,
        criterion_value,
        diagnostics,
        coefficients: fit.coefficients,
        summary_text,
        training_rows: training.height(),
        last_key: training.last_key(),
        history,
        differenced: fit.differenced,
        residuals: fit.residuals,
    }
}

struct Summary<'a> {
    target: &'a str,
    features: &'a [String],
    fit: &'a Estimate,
    criterion: InformationCriterion,
    diagnostics: &'a FitDiagnostics,
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        let diagnostics = self.diagnostics;
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:^60}", format!("ARIMA{} Results", self.fit.order))?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:<24}{}", "Dep. Variable:", self.target)?;
        writeln!(f, "{:<24}{}", "No. Observations:", diagnostics.n_obs)?;
        writeln!(f, "{:<24}{:.3}", "Log Likelihood:", diagnostics.log_likelihood)?;
        writeln!(f, "{:<24}{:.3}", "AIC:", diagnostics.aic)?;
        writeln!(f, "{:<24}{:.3}", "BIC:", diagnostics.bic)?;
        match diagnostics.aicc {
            Some(aicc) => writeln!(f, "{:<24}{:.3}", "AICc:", aicc)?,
            None => writeln!(f, "{:<24}unavailable", "AICc:")?,
        }
        writeln!(f, "{:<24}{:.6}", "sigma2:", diagnostics.sigma2)?;
        writeln!(f, "{:<24}{}", "Selected by:", self.criterion)?;
        writeln!(
            f,
            "{:<24}{} ({} failed{})",
            "Candidates:",
            diagnostics.candidates_evaluated,
            diagnostics.candidates_failed,
            if diagnostics.search_truncated { ", truncated" } else { "" }
        )?;
        writeln!(f, "{}", "-".repeat(60))?;

        let coefficients = &self.fit.coefficients;
        if let Some(c) = coefficients.intercept {
            writeln!(f, "{:<24}{:>14.6}", "intercept", c)?;
        }
        for (name, beta) in self.features.iter().zip(&coefficients.exogenous) {
            writeln!(f, "{:<24}{:>14.6}", name, beta)?;
        }
        for (i, phi) in coefficients.ar.iter().enumerate() {
            writeln!(f, "{:<24}{:>14.6}", format!("ar.L{}", i + 1), phi)?;
        }
        for (j, theta) in coefficients.ma.iter().enumerate() {
            writeln!(f, "{:<24}{:>14.6}", format!("ma.L{}", j + 1), theta)?;
        }
        writeln!(f, "{}", rule)?;
        write!(f, "{} {}", build_info::PKG_NAME, build_info::PKG_VERSION)
    }
}

impl FittedModel {
    /// Description of the model for callers, with the testing partition size
    /// when one exists
    pub fn info(&self, testing_rows: Option<usize>) -> ModelInfo {
        ModelInfo {
            order: self.order,
            criterion: self.criterion,
            criterion_value: self.criterion_value,
            diagnostics: self.diagnostics.clone(),
            coefficients: self.coefficients.clone(),
            training_rows: self.training_rows,
            testing_rows,
            features_used: self.feature_columns.clone(),
            target_column: self.target_column.clone(),
            summary_text: self.summary_text.clone(),
        }
    }

    pub fn uses_features(&self) -> bool {
        !self.feature_columns.is_empty()
    }
}
