#[cfg(test)]
mod tests {
    use crate::arima::step_2_estimation::ArimaOrder;
    use crate::arima::step_3_order_search::{CancellationToken, InformationCriterion, SearchBounds};
    use crate::arima::step_4_train_model::{fit_order, train_model, FittedModel};
    use crate::data::splitter::split;
    use crate::data::temporal_table::{RowKey, TemporalTable};
    use crate::util::feature_engineering::{generate_rolling_features, RollingOperation};
    use crate::util::metrics::calculate_metrics;
    use crate::util::test_utils::{daily_bars, day, integrated_series};
    use approx::assert_relative_eq;

    const ALL_OPERATIONS: [RollingOperation; 4] = [
        RollingOperation::Mean,
        RollingOperation::Std,
        RollingOperation::Min,
        RollingOperation::Max,
    ];

    #[test]
    fn test_split_preserves_rows_and_order() {
        for rows in [2usize, 7, 50, 101] {
            let table = daily_bars(rows, rows as u64);
            for ratio in [0.5, 0.66, 0.8, 0.95] {
                let Ok(parts) = split(&table, ratio) else {
                    // Only tiny tables may leave a partition empty
                    assert!(rows < 20, "split of {} rows at {} failed", rows, ratio);
                    continue;
                };
                assert_eq!(parts.training.height() + parts.testing.height(), rows);
                let last_training = parts.training.last_key().expect("training row");
                assert!(parts.testing.row_keys().iter().all(|k| *k > last_training));
            }
        }
    }

    #[test]
    fn test_rolling_value_at_first_full_window() {
        let table = daily_bars(40, 11);
        let source = table.values_f64("Close").expect("close");
        for window in [2usize, 5, 9] {
            let set = generate_rolling_features(&table, &["Close"], &[window], &ALL_OPERATIONS).expect("features");
            assert_eq!(set.table.height(), 40 - (window - 1));
            assert_eq!(set.table.first_key(), Some(RowKey::Time(day(window as u32))));

            let head = &source[..window];
            let mean = head.iter().sum::<f64>() / window as f64;
            let var = head.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window as f64 - 1.0);
            let min = head.iter().copied().fold(f64::INFINITY, f64::min);
            let max = head.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            let first = |op: &str| set.table.values_f64(&format!("Close_rolling_{}_{}", op, window)).expect("feature")[0];
            assert_relative_eq!(first("mean"), mean, max_relative = 1e-10);
            assert_relative_eq!(first("std"), var.sqrt(), max_relative = 1e-8);
            assert_eq!(first("min"), min);
            assert_eq!(first("max"), max);
        }
    }

    #[test]
    fn test_generation_is_idempotent_on_fresh_copies() {
        let operations = [RollingOperation::Mean, RollingOperation::Std];
        let columns = ["High", "Low", "Volume", "Turnover"];
        let first = generate_rolling_features(&daily_bars(60, 5), &columns, &[3, 7], &operations).expect("first");
        let second = generate_rolling_features(&daily_bars(60, 5), &columns, &[3, 7], &operations).expect("second");

        assert_eq!(first.feature_names, second.feature_names);
        assert_eq!(first.table.height(), second.table.height());
        for name in &first.feature_names {
            assert_eq!(
                first.table.values_f64(name).expect("first column"),
                second.table.values_f64(name).expect("second column")
            );
        }
    }

    fn search_and_baseline(seed: u64) -> (FittedModel, FittedModel) {
        let values = integrated_series(160, seed);
        let table = TemporalTable::from_columns((1..=160).map(day).collect(), vec![("VWAP", values)]).expect("table");
        let no_features: [&str; 0] = [];
        let bounds = SearchBounds {
            max_p: 2,
            max_d: 2,
            max_q: 2,
            criterion: InformationCriterion::Aic,
            ..SearchBounds::default()
        };
        let found = train_model(&table, "VWAP", &no_features, &bounds, &CancellationToken::new()).expect("search");
        let baseline = fit_order(&table, "VWAP", &no_features, ArimaOrder::new(2, 0, 0), &bounds).expect("baseline");
        (found, baseline)
    }

    #[test]
    fn test_search_matches_forced_ar2_baseline() {
        for seed in (1..=9).chain([17]) {
            let (found, baseline) = search_and_baseline(seed);
            assert_eq!(found.diagnostics.n_obs, baseline.diagnostics.n_obs);
            // A stepwise walk may stop in a local minimum a fraction of a unit above
            assert!(
                found.criterion_value <= baseline.criterion_value + 0.5,
                "seed {}: search found ARIMA{} with AIC {:.3}, baseline AIC {:.3}",
                seed,
                found.order,
                found.criterion_value,
                baseline.criterion_value
            );
        }
    }

    #[test]
    fn test_search_beats_forced_ar2_baseline() {
        let (found, baseline) = search_and_baseline(17);
        assert_ne!(found.order, ArimaOrder::new(2, 0, 0));
        assert!(
            found.criterion_value < baseline.criterion_value,
            "search found ARIMA{} with AIC {:.3}, baseline AIC {:.3}",
            found.order,
            found.criterion_value,
            baseline.criterion_value
        );
    }

    #[test]
    fn test_search_is_repeatable() {
        let table = daily_bars(120, 23);
        let no_features: [&str; 0] = [];
        let bounds = SearchBounds {
            max_p: 3,
            max_d: 1,
            max_q: 2,
            ..SearchBounds::default()
        };
        let first = train_model(&table, "VWAP", &no_features, &bounds, &CancellationToken::new()).expect("first");
        let second = train_model(&table, "VWAP", &no_features, &bounds, &CancellationToken::new()).expect("second");
        assert_eq!(first.order, second.order);
        assert_eq!(first.criterion_value, second.criterion_value);
    }

    #[test]
    fn test_metrics_reference_values() {
        let report = calculate_metrics(&[1.0, 2.0, 3.0], &[1.0, 2.0, 4.0]).expect("metrics");
        assert_relative_eq!(report.mae, 1.0 / 3.0);
        assert_relative_eq!(report.mse, 1.0 / 3.0);
        assert_relative_eq!(report.rmse, (1.0f64 / 3.0).sqrt());
        assert_relative_eq!(report.mape.expect("mape"), (0.0 + 0.0 + 25.0) / 3.0);
    }

    #[test]
    fn test_single_infinite_actual_is_dropped() {
        let report = calculate_metrics(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, f64::INFINITY, 4.0]).expect("metrics");
        assert_eq!(report.valid, 3);
        assert_eq!(report.inf_actual, 1);
        assert_eq!(report.total - report.valid, 1);
        assert_eq!(report.mse, 0.0);
    }

    #[test]
    fn test_directional_accuracy_reference() {
        let report = calculate_metrics(&[1.0, 3.0, 0.0, 4.0], &[1.0, 2.0, 1.0, 3.0]).expect("metrics");
        assert_relative_eq!(report.directional_accuracy.expect("direction"), 100.0);
    }
}
