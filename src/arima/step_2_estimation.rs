// External crates
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;

// Internal modules
use crate::arima::step_1_differencing::difference_n;
use crate::arima::step_3_order_search::InformationCriterion;
use crate::error::{PipelineError, Result};

/// Non-seasonal ARIMA order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl ArimaOrder {
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }

    /// An intercept (a drift term once differenced) is estimated when d < 2
    pub fn has_intercept(&self) -> bool {
        self.d < 2
    }
}

impl fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.p, self.d, self.q)
    }
}

/// Target series with its exogenous regressors, stored column by column
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    pub target: Vec<f64>,
    pub exogenous: Vec<Vec<f64>>,
}

impl SeriesData {
    pub fn new(target: Vec<f64>, exogenous: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(pos) = exogenous.iter().position(|col| col.len() != target.len()) {
            return Err(PipelineError::DataError(format!(
                "Exogenous column {} has {} values for a target of {}",
                pos,
                exogenous[pos].len(),
                target.len()
            )));
        }
        Ok(Self { target, exogenous })
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn exog_count(&self) -> usize {
        self.exogenous.len()
    }
}

/// Estimated coefficients of one order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficients {
    pub intercept: Option<f64>,
    pub exogenous: Vec<f64>,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
}

impl Coefficients {
    /// Conditional mean of the next differenced value given its history.
    ///
    /// `w` and `e` hold the differenced series and innovations strictly
    /// before the predicted step; lags reaching before the start count as 0.
    pub fn one_step(&self, w: &[f64], e: &[f64], exog_row: &[f64]) -> f64 {
        let lag = |values: &[f64], i: usize| values.len().checked_sub(i).map_or(0.0, |j| values[j]);

        let mut mean = self.intercept.unwrap_or(0.0);
        mean += self.exogenous.iter().zip(exog_row).map(|(b, x)| b * x).sum::<f64>();
        mean += self.ar.iter().enumerate().map(|(i, phi)| phi * lag(w, i + 1)).sum::<f64>();
        mean += self.ma.iter().enumerate().map(|(j, theta)| theta * lag(e, j + 1)).sum::<f64>();
        mean
    }
}

/// Result of fitting one fixed order
#[derive(Debug, Clone)]
pub struct Estimate {
    pub order: ArimaOrder,
    pub coefficients: Coefficients,
    pub sigma2: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub aicc: Option<f64>,
    /// Observations entering the likelihood
    pub n_obs: usize,
    /// `Δ^d` of the target
    pub differenced: Vec<f64>,
    /// In-sample innovations on the differenced scale, zero before index p
    pub residuals: Vec<f64>,
}

impl Estimate {
    pub fn criterion_value(&self, criterion: InformationCriterion) -> Option<f64> {
        match criterion {
            InformationCriterion::Aic => Some(self.aic),
            InformationCriterion::Bic => Some(self.bic),
            InformationCriterion::Aicc => self.aicc,
        }
    }
}

/// Rows needed to fit every order within the bounds, assuming an intercept
pub fn required_observations(max_p: usize, max_d: usize, max_q: usize, exog: usize) -> usize {
    max_d + rows_after_differencing(max_p, max_q, exog, 1)
}

fn rows_after_differencing(p: usize, q: usize, exog: usize, intercept: usize) -> usize {
    let base = intercept + exog;
    if q == 0 {
        2 * p + base + 1
    } else {
        (2 * p + 2 * q + 5 + base).max(2 * p + 3 * q + 3 + base)
    }
}

fn non_convergence(order: ArimaOrder, reason: impl fmt::Display) -> PipelineError {
    PipelineError::FitFailed {
        attempted: 1,
        reason: format!("ARIMA{} {}", order, reason),
    }
}

// Smallest admissible ratio between Cholesky diagonal entries of the
// column-normalised normal matrix
const SINGULARITY_TOLERANCE: f64 = 1e-7;

/// Least squares by Cholesky factorisation of the normal equations, with
/// columns scaled to unit norm first. `None` when the system is singular or
/// the solution is not finite.
fn ols(rows: &[Vec<f64>], y: &[f64]) -> Option<Vec<f64>> {
    let cols = rows.first().map_or(0, Vec::len);
    if cols == 0 {
        return Some(Vec::new());
    }
    let mut x = DMatrix::from_row_slice(rows.len(), cols, &rows.concat());
    let scales: Vec<f64> = x.column_iter().map(|c| c.norm()).collect();
    if scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        return None;
    }
    for (j, s) in scales.iter().enumerate() {
        x.column_mut(j).unscale_mut(*s);
    }

    let y = DVector::from_column_slice(y);
    let xt = x.transpose();
    let cholesky = (&xt * &x).cholesky()?;
    let (lo, hi) = cholesky
        .l()
        .diagonal()
        .iter()
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), v| (lo.min(v.abs()), hi.max(v.abs())));
    if lo <= hi * SINGULARITY_TOLERANCE {
        return None;
    }

    let beta: Vec<f64> = cholesky
        .solve(&(&xt * y))
        .iter()
        .zip(&scales)
        .map(|(b, s)| b / s)
        .collect();
    beta.iter().all(|b| b.is_finite()).then_some(beta)
}

/// Fit one fixed order by Hannan-Rissanen regression followed by a
/// conditional-sum-of-squares residual pass.
///
/// Estimates compared against each other must share `conditioning`, so that
/// their likelihoods sum over the same rows.
///
/// # Arguments
///
/// * `data` - Undifferenced target and exogenous columns
/// * `order` - Order to fit
/// * `conditioning` - Leading rows of the undifferenced series left out of
///   the likelihood; raised to `d + p` when smaller
///
/// # Returns
///
/// The estimate with its likelihood and information criteria, or
/// `FitFailed` when a linear system is singular or a value is not finite
pub fn estimate(data: &SeriesData, order: ArimaOrder, conditioning: usize) -> Result<Estimate> {
    let ArimaOrder { p, d, q } = order;
    let intercept = usize::from(order.has_intercept());
    let e = data.exog_count();
    let conditioning = conditioning.max(d + p);

    let required = (d + rows_after_differencing(p, q, e, intercept)).max(conditioning + 1);
    if data.len() < required {
        return Err(PipelineError::insufficient(format!("ARIMA{}", order), required, data.len()));
    }

    let w = difference_n(&data.target, d);
    let exog: Vec<Vec<f64>> = data.exogenous.iter().map(|col| difference_n(col, d)).collect();
    let n = w.len();
    let exog_row = |t: usize| -> Vec<f64> { exog.iter().map(|col| col[t]).collect() };

    // Stage 1: long autoregression for innovation estimates
    let mut innovations = vec![0.0; n];
    if q > 0 {
        let m = p + q + 2;
        let mut rows = Vec::with_capacity(n - m);
        for t in m..n {
            let mut row = Vec::with_capacity(intercept + e + m);
            if intercept == 1 {
                row.push(1.0);
            }
            row.extend(exog_row(t));
            row.extend((1..=m).map(|i| w[t - i]));
            rows.push(row);
        }
        let beta = ols(&rows, &w[m..]).ok_or_else(|| non_convergence(order, "singular long autoregression"))?;
        for (t, row) in (m..n).zip(&rows) {
            let fitted: f64 = row.iter().zip(&beta).map(|(x, b)| x * b).sum();
            innovations[t] = w[t] - fitted;
        }
    }

    // Stage 2: regression on lags and lagged innovations
    let start = if q == 0 { p } else { p + 2 * q + 2 };
    let mut rows = Vec::with_capacity(n - start);
    for t in start..n {
        let mut row = Vec::with_capacity(intercept + e + p + q);
        if intercept == 1 {
            row.push(1.0);
        }
        row.extend(exog_row(t));
        row.extend((1..=p).map(|i| w[t - i]));
        row.extend((1..=q).map(|j| innovations[t - j]));
        rows.push(row);
    }
    let beta = ols(&rows, &w[start..]).ok_or_else(|| non_convergence(order, "singular regression"))?;

    let mut split = beta.into_iter();
    let coefficients = Coefficients {
        intercept: if intercept == 1 { split.next() } else { None },
        exogenous: split.by_ref().take(e).collect(),
        ar: split.by_ref().take(p).collect(),
        ma: split.take(q).collect(),
    };

    // Stage 3: conditional residual recursion over the whole sample
    let mut residuals = vec![0.0; n];
    for t in p..n {
        let mean = coefficients.one_step(&w[..t], &residuals[..t], &exog_row(t));
        residuals[t] = w[t] - mean;
        if !residuals[t].is_finite() {
            return Err(non_convergence(order, format!("produced a non-finite residual at {}", t)));
        }
    }

    // Likelihood over the common window only
    let skip = conditioning - d;
    let n_obs = n - skip;
    let rss: f64 = residuals[skip..].iter().map(|r| r * r).sum();
    let nf = n_obs as f64;
    let sigma2 = (rss / nf).max(f64::MIN_POSITIVE);
    let log_likelihood = -nf / 2.0 * ((2.0 * PI * sigma2).ln() + 1.0);
    let k = (intercept + e + p + q + 1) as f64;
    let aic = -2.0 * log_likelihood + 2.0 * k;
    let bic = -2.0 * log_likelihood + k * nf.ln();
    let aicc = (nf - k - 1.0 > 0.0).then(|| aic + 2.0 * k * (k + 1.0) / (nf - k - 1.0));

    if !(aic.is_finite() && bic.is_finite()) {
        return Err(non_convergence(order, "produced a non-finite likelihood"));
    }

    Ok(Estimate {
        order,
        coefficients,
        sigma2,
        log_likelihood,
        aic,
        bic,
        aicc,
        n_obs,
        differenced: w,
        residuals,
    })
}
