#[cfg(test)]
mod tests {
    use crate::config::PipelineConfig;
    use crate::data::temporal_table::RowKey;
    use crate::session::{Session, TrainRequest};
    use crate::util::test_utils::{daily_bars_csv, day};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn small_search_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.model.max_p = 2;
        config.model.max_d = 1;
        config.model.max_q = 2;
        config.model.trace = false;
        config
    }

    fn csv_fixture(rows: usize, seed: u64) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(daily_bars_csv(rows, seed).as_bytes()).expect("write csv");
        file.flush().expect("flush csv");
        file
    }

    #[test]
    fn test_csv_to_metrics() {
        let file = csv_fixture(150, 42);
        let session = Session::new(small_search_config());

        let (session, dataset) = session.load_csv(file.path()).expect("load");
        assert_eq!(dataset.total_rows, 150);
        assert!(dataset.columns.contains(&"VWAP".to_string()));

        let (session, features) = session.generate_features(None, None, None).expect("features");
        // Four default columns, two windows, mean and std
        assert_eq!(features.feature_count, 16);
        assert_eq!(features.rows, 144, "rows before the 7-day window fills are dropped");
        assert_eq!(features.preview.len(), 5);
        assert_eq!(features.preview[0].key, RowKey::Time(day(7)));

        let request = TrainRequest {
            feature_columns: Some(vec!["High_rolling_mean_3".to_string(), "Volume_rolling_mean_7".to_string()]),
            ..TrainRequest::default()
        };
        let (session, model) = session.train(request).expect("train");
        assert_eq!(model.target_column, "VWAP");
        assert_eq!(model.training_rows, 115);
        assert_eq!(model.testing_rows, Some(29));
        assert_eq!(model.features_used.len(), 2);
        assert!(model.criterion_value.is_finite());
        assert!(model.order.p <= 2 && model.order.d <= 1 && model.order.q <= 2);

        let (session, prediction) = session.predict(None, None).expect("predict");
        assert_eq!(prediction.n_periods, 29);
        assert_eq!(prediction.values.len(), 29);
        assert_eq!(prediction.actual.as_ref().map(Vec::len), Some(29));
        assert_eq!(prediction.dates[0], RowKey::Time(day(122)).to_string());
        assert!(prediction.values.iter().all(|v| v.is_finite()));

        let metrics = session.metrics().expect("metrics");
        assert_eq!(metrics.valid, 29);
        assert!(metrics.rmse >= metrics.mae);
        assert!(metrics.mape.is_some());
        assert!(metrics.directional_accuracy.is_some());

        let chart = session.chart_data().expect("chart data");
        assert_eq!(chart.predicted, prediction.values);
    }

    #[test]
    fn test_explicit_horizon_without_features() {
        let file = csv_fixture(80, 7);
        let session = Session::new(small_search_config());
        let (session, _) = session.load_csv(file.path()).expect("load");

        let request = TrainRequest {
            feature_columns: Some(Vec::new()),
            split_ratio: Some(0.75),
            ..TrainRequest::default()
        };
        let (session, model) = session.train(request).expect("train");
        assert_eq!(model.training_rows, 60);
        assert!(model.features_used.is_empty());

        // Longer than the 20-row testing partition: keys continue day by day
        let (session, prediction) = session.predict(Some(25), None).expect("predict");
        assert_eq!(prediction.values.len(), 25);
        assert_eq!(prediction.dates[24], RowKey::Time(day(85)).to_string());
        assert_eq!(prediction.actual.as_ref().map(Vec::len), Some(20));

        let metrics = session.metrics().expect("metrics");
        assert_eq!(metrics.total, 20);
    }

    #[test]
    fn test_model_info_serializes() {
        let file = csv_fixture(90, 3);
        let session = Session::new(small_search_config());
        let (session, _) = session.load_csv(file.path()).expect("load");
        let request = TrainRequest {
            feature_columns: Some(Vec::new()),
            ..TrainRequest::default()
        };
        let (_, model) = session.train(request).expect("train");

        let json = serde_json::to_value(&model).expect("serialize");
        assert_eq!(json["target_column"], "VWAP");
        assert_eq!(json["criterion"], "aic");
        assert!(json["order"]["p"].is_u64());
        assert!(json["summary_text"].as_str().unwrap_or_default().contains("Results"));
    }
}
