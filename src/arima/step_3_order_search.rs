// External crates
use log::{debug, info, log, Level};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Internal modules
use crate::arima::step_2_estimation::{estimate, required_observations, ArimaOrder, Estimate, SeriesData};
use crate::constants::{CRITERION_TIE_TOLERANCE, DEFAULT_MAX_CANDIDATES, DEFAULT_MAX_D, DEFAULT_MAX_P, DEFAULT_MAX_Q};
use crate::error::{PipelineError, Result};

/// Penalised goodness-of-fit score used to rank orders; lower is better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationCriterion {
    Aic,
    Bic,
    Aicc,
}

impl FromStr for InformationCriterion {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aic" => Ok(InformationCriterion::Aic),
            "bic" => Ok(InformationCriterion::Bic),
            "aicc" => Ok(InformationCriterion::Aicc),
            other => Err(PipelineError::InvalidParameter(format!(
                "Unknown information criterion '{}' (expected aic, bic or aicc)",
                other
            ))),
        }
    }
}

impl fmt::Display for InformationCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InformationCriterion::Aic => "AIC",
            InformationCriterion::Bic => "BIC",
            InformationCriterion::Aicc => "AICc",
        })
    }
}

/// Limits of the order search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchBounds {
    pub max_p: usize,
    pub max_d: usize,
    pub max_q: usize,
    pub criterion: InformationCriterion,
    /// Maximum number of distinct orders fitted
    pub max_candidates: usize,
    pub time_budget: Option<Duration>,
    /// Log every candidate at info level instead of debug
    pub trace: bool,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            max_p: DEFAULT_MAX_P,
            max_d: DEFAULT_MAX_D,
            max_q: DEFAULT_MAX_Q,
            criterion: InformationCriterion::Aic,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            time_budget: None,
            trace: false,
        }
    }
}

impl SearchBounds {
    pub fn contains(&self, p: usize, d: usize, q: usize) -> bool {
        p <= self.max_p && d <= self.max_d && q <= self.max_q
    }

    /// Leading rows left out of every candidate's likelihood, enough for the
    /// deepest differencing plus the longest AR lag
    pub fn conditioning(&self) -> usize {
        self.max_d + self.max_p
    }
}

/// Shared flag that aborts a running search
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One evaluated order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRecord {
    pub order: ArimaOrder,
    pub criterion_value: Option<f64>,
    pub error: Option<String>,
}

/// Winning estimate plus search bookkeeping
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: Estimate,
    pub criterion_value: f64,
    pub evaluated: usize,
    pub failed: usize,
    pub truncated: bool,
    pub candidates: Vec<CandidateRecord>,
}

/// `true` when `a` ranks strictly before `b`: lower criterion, or a tie
/// within tolerance and a simpler order (lower p, then d, then q)
pub fn ranks_before(a: (f64, ArimaOrder), b: (f64, ArimaOrder)) -> bool {
    let width = CRITERION_TIE_TOLERANCE * 1f64.max(a.0.abs()).max(b.0.abs());
    if (a.0 - b.0).abs() <= width {
        a.1 < b.1
    } else {
        a.0 < b.0
    }
}

fn starting_orders(d: usize, bounds: &SearchBounds) -> Vec<ArimaOrder> {
    let mut orders: Vec<ArimaOrder> = Vec::new();
    for (p, q) in [(2, 2), (0, 0), (1, 0), (0, 1)] {
        let order = ArimaOrder::new(p.min(bounds.max_p), d, q.min(bounds.max_q));
        if !orders.contains(&order) {
            orders.push(order);
        }
    }
    orders
}

fn neighbours(order: ArimaOrder, bounds: &SearchBounds) -> Vec<ArimaOrder> {
    let mut out = Vec::new();
    for dp in [-1i64, 0, 1] {
        for dq in [-1i64, 0, 1] {
            if dp == 0 && dq == 0 {
                continue;
            }
            let p = order.p as i64 + dp;
            let q = order.q as i64 + dq;
            if p < 0 || q < 0 || !bounds.contains(p as usize, order.d, q as usize) {
                continue;
            }
            out.push(ArimaOrder::new(p as usize, order.d, q as usize));
        }
    }
    out.sort();
    out
}

struct SearchState<'a> {
    data: &'a SeriesData,
    bounds: &'a SearchBounds,
    cache: BTreeMap<ArimaOrder, Option<(f64, Estimate)>>,
    candidates: Vec<CandidateRecord>,
    failed: usize,
    last_failure: Option<String>,
}

impl SearchState<'_> {
    /// Fit the uncached orders of a batch in parallel. Returns `false` once
    /// the candidate budget is exhausted.
    fn evaluate(&mut self, batch: &[ArimaOrder]) -> bool {
        let mut pending: Vec<ArimaOrder> = batch
            .iter()
            .copied()
            .filter(|o| !self.cache.contains_key(o))
            .collect();
        let remaining = self.bounds.max_candidates.saturating_sub(self.cache.len());
        let exhausted = pending.len() > remaining;
        pending.truncate(remaining);

        let criterion = self.bounds.criterion;
        let conditioning = self.bounds.conditioning();
        let data = self.data;
        let results: Vec<(ArimaOrder, Result<Estimate>)> = pending
            .par_iter()
            .map(|&order| (order, estimate(data, order, conditioning)))
            .collect();

        let level = if self.bounds.trace { Level::Info } else { Level::Debug };
        for (order, result) in results {
            let scored = result.and_then(|fit| match fit.criterion_value(criterion) {
                Some(value) => Ok((value, fit)),
                None => Err(PipelineError::FitFailed {
                    attempted: 1,
                    reason: format!("ARIMA{} has no {} for {} observations", order, criterion, fit.n_obs),
                }),
            });
            match scored {
                Ok((value, fit)) => {
                    log!(level, " ARIMA{} : {}={:.3}", order, criterion, value);
                    self.candidates.push(CandidateRecord {
                        order,
                        criterion_value: Some(value),
                        error: None,
                    });
                    self.cache.insert(order, Some((value, fit)));
                }
                Err(err) => {
                    log!(level, " ARIMA{} : failed ({})", order, err);
                    self.failed += 1;
                    self.last_failure = Some(err.to_string());
                    self.candidates.push(CandidateRecord {
                        order,
                        criterion_value: None,
                        error: Some(err.to_string()),
                    });
                    self.cache.insert(order, None);
                }
            }
        }
        !exhausted
    }

    fn score(&self, order: &ArimaOrder) -> Option<f64> {
        self.cache.get(order).and_then(|c| c.as_ref()).map(|(value, _)| *value)
    }

    /// Best scored order of a batch, scanned in order for a deterministic result
    fn best_of(&self, batch: &[ArimaOrder]) -> Option<(f64, ArimaOrder)> {
        let mut sorted = batch.to_vec();
        sorted.sort();
        sorted
            .into_iter()
            .filter_map(|o| self.score(&o).map(|v| (v, o)))
            .fold(None, |best, cand| match best {
                Some(b) if !ranks_before(cand, b) => Some(b),
                _ => Some(cand),
            })
    }
}

/// Stepwise search for the order minimising the information criterion.
///
/// For every differencing degree the search starts from a small set of
/// orders and walks to neighbouring (p, q) pairs while the criterion
/// improves. Each step's candidates are fitted in parallel; no order is
/// fitted twice.
///
/// # Arguments
///
/// * `data` - Undifferenced target and exogenous columns
/// * `bounds` - Order limits, criterion and search budget
/// * `cancel` - Aborts the search with `SearchCancelled` when set
///
/// # Returns
///
/// The best estimate with the number of candidates evaluated and failed
pub fn stepwise_search(data: &SeriesData, bounds: &SearchBounds, cancel: &CancellationToken) -> Result<SearchOutcome> {
    let required = required_observations(bounds.max_p, bounds.max_d, bounds.max_q, data.exog_count());
    if data.len() < required {
        return Err(PipelineError::insufficient(
            format!(
                "order search up to ({}, {}, {}) with {} exogenous columns",
                bounds.max_p,
                bounds.max_d,
                bounds.max_q,
                data.exog_count()
            ),
            required,
            data.len(),
        ));
    }

    let started = Instant::now();
    let mut state = SearchState {
        data,
        bounds,
        cache: BTreeMap::new(),
        candidates: Vec::new(),
        failed: 0,
        last_failure: None,
    };
    let mut best: Option<(f64, ArimaOrder)> = None;
    let mut truncated = false;

    'levels: for d in 0..=bounds.max_d {
        let mut incumbent: Option<(f64, ArimaOrder)> = None;
        let mut batch = starting_orders(d, bounds);
        let mut visited = BTreeSet::new();

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::SearchCancelled {
                    evaluated: state.cache.len(),
                });
            }
            if bounds.time_budget.is_some_and(|budget| started.elapsed() >= budget) {
                info!("Order search time budget elapsed after {} candidates", state.cache.len());
                truncated = true;
            } else if !state.evaluate(&batch) {
                info!("Order search reached its limit of {} candidates", bounds.max_candidates);
                truncated = true;
            }

            let step_best = state.best_of(&batch);
            let improved = match (step_best, incumbent) {
                (Some(cand), Some(inc)) => ranks_before(cand, inc),
                (Some(_), None) => true,
                (None, _) => false,
            };
            if improved {
                incumbent = step_best;
            }
            // Ties within tolerance are not transitive; never walk back to an earlier incumbent
            let revisited = improved && incumbent.is_some_and(|(_, order)| !visited.insert(order));

            if truncated || !improved || revisited {
                break;
            }
            if let Some((_, order)) = incumbent {
                batch = neighbours(order, bounds);
            }
        }

        if let Some(candidate) = incumbent {
            debug!("Best order for d={}: ARIMA{} ({:.3})", d, candidate.1, candidate.0);
            if best.map_or(true, |b| ranks_before(candidate, b)) {
                best = Some(candidate);
            }
        }
        if truncated {
            break 'levels;
        }
    }

    let evaluated = state.cache.len();
    let (value, order) = best.ok_or_else(|| PipelineError::FitFailed {
        attempted: evaluated,
        reason: state
            .last_failure
            .clone()
            .unwrap_or_else(|| "no candidate order was evaluated".to_string()),
    })?;
    let estimate = state
        .cache
        .remove(&order)
        .flatten()
        .map(|(_, fit)| fit)
        .ok_or_else(|| PipelineError::FitFailed {
            attempted: evaluated,
            reason: format!("estimate for ARIMA{} missing from cache", order),
        })?;

    info!(
        "Best model: ARIMA{} {}={:.3} ({} fits, {} failed, {:.2?})",
        order,
        bounds.criterion,
        value,
        evaluated,
        state.failed,
        started.elapsed()
    );

    Ok(SearchOutcome {
        best: estimate,
        criterion_value: value,
        evaluated,
        failed: state.failed,
        truncated,
        candidates: state.candidates,
    })
}
