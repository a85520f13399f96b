//! Differencing and integration of series

/// First difference, one element shorter than the input
pub fn difference(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Apply `d` rounds of first differencing
pub fn difference_n(values: &[f64], d: usize) -> Vec<f64> {
    let mut out = values.to_vec();
    for _ in 0..d {
        out = difference(&out);
    }
    out
}

/// Last value of every differencing level `0..d`, taken from the end of the
/// series. Level `k` holds the tail of `Δ^k values`.
pub fn level_tails(values: &[f64], d: usize) -> Vec<f64> {
    let mut tails = Vec::with_capacity(d);
    let mut level = values.to_vec();
    for _ in 0..d {
        if let Some(&last) = level.last() {
            tails.push(last);
        }
        level = difference(&level);
    }
    tails
}

/// Undo `d` rounds of differencing on a forecast of `Δ^d y`.
///
/// `tails` is the output of [`level_tails`] for the training series; each
/// level is cumulatively summed starting from its tail value, innermost
/// level first.
pub fn integrate(forecast: &[f64], tails: &[f64]) -> Vec<f64> {
    let mut out = forecast.to_vec();
    for &tail in tails.iter().rev() {
        let mut acc = tail;
        for v in out.iter_mut() {
            acc += *v;
            *v = acc;
        }
    }
    out
}

/// Difference future exogenous rows by prefixing the last `d` training rows,
/// so the first future row is differenced against training data.
pub fn difference_continuation(history: &[f64], future: &[f64], d: usize) -> Vec<f64> {
    if d == 0 {
        return future.to_vec();
    }
    let start = history.len().saturating_sub(d);
    let joined: Vec<f64> = history[start..].iter().chain(future).copied().collect();
    let mut out = difference_n(&joined, d);
    // Fewer than d history rows leaves extra leading values
    let excess = out.len().saturating_sub(future.len());
    out.drain(..excess);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difference_n() {
        let y = vec![1.0, 4.0, 9.0, 16.0, 25.0];
        assert_eq!(difference_n(&y, 1), vec![3.0, 5.0, 7.0, 9.0]);
        assert_eq!(difference_n(&y, 2), vec![2.0, 2.0, 2.0]);
        assert_eq!(difference_n(&y, 0), y);
    }

    #[test]
    fn test_integrate_restores_continuation() {
        let y = vec![1.0, 4.0, 9.0, 16.0, 25.0];
        let tails = level_tails(&y, 2);
        assert_eq!(tails, vec![25.0, 9.0]);
        // Second differences of the squares stay at 2
        assert_eq!(integrate(&[2.0, 2.0], &tails), vec![36.0, 49.0]);
    }

    #[test]
    fn test_difference_continuation() {
        let history = vec![1.0, 2.0, 4.0];
        let future = vec![7.0, 11.0];
        assert_eq!(difference_continuation(&history, &future, 1), vec![3.0, 4.0]);
        assert_eq!(difference_continuation(&history, &future, 2), vec![1.0, 1.0]);
        assert_eq!(difference_continuation(&history, &future, 0), future);
    }
}
