//! Pipeline session: one dataset, one trained model and one forecast.
//!
//! A [`Session`] is an immutable value. Every operation that changes state
//! returns a new session alongside its result, so a failed operation leaves
//! the caller's session exactly as it was. [`SessionStore`] publishes new
//! values for callers that share one session across threads.

// External crates
use log::info;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

// Internal modules
use crate::arima::step_3_order_search::CancellationToken;
use crate::arima::step_4_train_model::{train_model, FittedModel, ModelInfo};
use crate::arima::step_5_prediction::{predict, ActualSeries, ChartData, Forecast, PredictionOutput};
use crate::config::PipelineConfig;
use crate::constants::DEFAULT_OPERATIONS;
use crate::data::splitter::{split, Split};
use crate::data::temporal_table::{ColumnStats, DatasetInfo, TemporalTable};
use crate::error::{PipelineError, Result};
use crate::util::feature_engineering::{generate_rolling_features, FeatureInfo, RollingOperation};
use crate::util::metrics::{calculate_metrics, MetricsReport};
use crate::util::pre_processor::load_csv;

/// A fitted model with the partitions it was trained and evaluated on
#[derive(Debug, Clone)]
pub struct TrainedState {
    pub model: FittedModel,
    pub training: TemporalTable,
    pub testing: Option<TemporalTable>,
}

/// Options of a training run. Absent values fall back to the session
/// configuration and generated features.
#[derive(Debug, Clone, Default)]
pub struct TrainRequest {
    pub target_column: Option<String>,
    pub feature_columns: Option<Vec<String>>,
    pub split_ratio: Option<f64>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    config: Arc<PipelineConfig>,
    raw: Option<Arc<TemporalTable>>,
    table: Option<Arc<TemporalTable>>,
    features: Arc<Vec<String>>,
    trained: Option<Arc<TrainedState>>,
    forecast: Option<Arc<Forecast>>,
}

impl Session {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Base table as loaded, before any feature generation
    pub fn raw_table(&self) -> Option<&TemporalTable> {
        self.raw.as_deref()
    }

    /// Working table, possibly augmented with features
    pub fn table(&self) -> Option<&TemporalTable> {
        self.table.as_deref()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.features
    }

    pub fn trained(&self) -> Option<&TrainedState> {
        self.trained.as_deref()
    }

    pub fn model(&self) -> Option<&FittedModel> {
        self.trained().map(|t| &t.model)
    }

    pub fn forecast(&self) -> Option<&Forecast> {
        self.forecast.as_deref()
    }

    fn require_table(&self) -> Result<&TemporalTable> {
        self.table().ok_or(PipelineError::MissingState("No data loaded. Please load data first."))
    }

    fn require_raw(&self) -> Result<&TemporalTable> {
        self.raw_table()
            .ok_or(PipelineError::MissingState("No data loaded. Please load data first."))
    }

    fn require_trained(&self) -> Result<&TrainedState> {
        self.trained()
            .ok_or(PipelineError::MissingState("No trained model. Please train a model first."))
    }

    /// Replace the dataset, discarding features, model and forecast
    pub fn load(&self, table: TemporalTable) -> Result<(Session, DatasetInfo)> {
        let info = table.dataset_info()?;
        info!("Data loaded: {} rows, {} columns", info.total_rows, info.total_columns);
        let table = Arc::new(table);
        let next = Session {
            config: Arc::clone(&self.config),
            raw: Some(Arc::clone(&table)),
            table: Some(table),
            ..Session::default()
        };
        Ok((next, info))
    }

    /// Load a CSV file with the session's data configuration
    pub fn load_csv(&self, path: &Path) -> Result<(Session, DatasetInfo)> {
        let table = load_csv(path, &self.config.data)?;
        self.load(table)
    }

    pub fn dataset_info(&self) -> Result<DatasetInfo> {
        self.require_table()?.dataset_info()
    }

    pub fn describe(&self) -> Result<BTreeMap<String, ColumnStats>> {
        self.require_table()?.describe()
    }

    /// Derive rolling features from the raw table. Any previous features,
    /// model and forecast are discarded.
    ///
    /// # Arguments
    ///
    /// * `columns` - Source columns, defaulting to the configured lag features
    /// * `windows` - Window sizes, defaulting to the configured sizes
    /// * `operations` - Operation names, defaulting to mean and std
    pub fn generate_features(
        &self,
        columns: Option<&[String]>,
        windows: Option<&[usize]>,
        operations: Option<&[String]>,
    ) -> Result<(Session, FeatureInfo)> {
        let raw = self.require_raw()?;
        let columns = columns.unwrap_or(self.config.features.lag_features.as_slice());
        let windows = windows.unwrap_or(self.config.features.window_sizes.as_slice());
        let operations = match operations {
            Some(names) => RollingOperation::parse_list(names)?,
            None => RollingOperation::parse_list(&DEFAULT_OPERATIONS)?,
        };

        let set = generate_rolling_features(raw, columns, windows, &operations)?;
        let info = set.info()?;
        let next = Session {
            config: Arc::clone(&self.config),
            raw: self.raw.clone(),
            table: Some(Arc::new(set.table)),
            features: Arc::new(set.feature_names),
            trained: None,
            forecast: None,
        };
        Ok((next, info))
    }

    /// Split the working table; the session is unchanged
    pub fn split(&self, ratio: Option<f64>) -> Result<Split> {
        split(self.require_table()?, ratio.unwrap_or(self.config.model.default_train_split))
    }

    /// Split the working table and train on its training partition
    pub fn train(&self, request: TrainRequest) -> Result<(Session, ModelInfo)> {
        let parts = self.split(request.split_ratio)?;
        self.train_on(
            request.target_column.as_deref(),
            request.feature_columns.as_deref(),
            parts.training,
            Some(parts.testing),
            &request.cancel,
        )
    }

    /// Train on explicit partitions, replacing any model and forecast.
    ///
    /// Features default to the generated feature columns. On failure the
    /// previous model stays in place in `self`.
    pub fn train_on(
        &self,
        target: Option<&str>,
        features: Option<&[String]>,
        training: TemporalTable,
        testing: Option<TemporalTable>,
        cancel: &CancellationToken,
    ) -> Result<(Session, ModelInfo)> {
        let target = target.unwrap_or(self.config.model.target_column.as_str());
        let features = features.unwrap_or(self.features.as_slice());

        let model = train_model(&training, target, features, &self.config.model.search_bounds(), cancel)?;
        let info = model.info(testing.as_ref().map(TemporalTable::height));

        let next = Session {
            config: Arc::clone(&self.config),
            raw: self.raw.clone(),
            table: self.table.clone(),
            features: Arc::clone(&self.features),
            trained: Some(Arc::new(TrainedState {
                model,
                training,
                testing,
            })),
            forecast: None,
        };
        Ok((next, info))
    }

    /// Forecast with the live model, replacing any previous forecast
    ///
    /// # Arguments
    ///
    /// * `n_periods` - Horizon, defaulting to the testing partition's size
    /// * `exog` - Exogenous rows for the horizon when the testing partition
    ///   should not supply them
    pub fn predict(&self, n_periods: Option<usize>, exog: Option<&TemporalTable>) -> Result<(Session, PredictionOutput)> {
        let trained = self.require_trained()?;
        let model = &self.config.model;
        let forecast = predict(
            &trained.model,
            n_periods,
            trained.testing.as_ref(),
            exog,
            model.alignment_policy,
            model.alignment_tolerance_secs,
        )?;
        let output = forecast.output();
        Ok((self.with_forecast(forecast), output))
    }

    /// Pair the live forecast with externally observed values, checking key
    /// alignment under the configured policy
    pub fn attach_actual(&self, actual: ActualSeries) -> Result<Session> {
        let current = self
            .forecast()
            .ok_or(PipelineError::MissingState("No predictions available. Please run prediction first."))?;
        let forecast = current.clone().with_actual(actual);
        let model = &self.config.model;
        forecast.check_alignment(model.alignment_policy, model.alignment_tolerance_secs)?;
        Ok(self.with_forecast(forecast))
    }

    fn with_forecast(&self, forecast: Forecast) -> Session {
        Session {
            forecast: Some(Arc::new(forecast)),
            ..self.clone()
        }
    }

    /// Accuracy of the live forecast against its paired actual values
    pub fn metrics(&self) -> Result<MetricsReport> {
        let forecast = self
            .forecast()
            .ok_or(PipelineError::MissingState("No predictions available. Please run prediction first."))?;
        let actual = forecast
            .actual
            .as_ref()
            .ok_or(PipelineError::MissingState("No actual values available for metrics calculation"))?;
        calculate_metrics(&forecast.values, &actual.values)
    }

    pub fn chart_data(&self) -> Result<ChartData> {
        self.forecast()
            .map(Forecast::chart_data)
            .ok_or(PipelineError::MissingState("No predictions available. Please run prediction first."))
    }
}

/// Shared, serialised access to one session
#[derive(Debug, Default)]
pub struct SessionStore {
    current: Mutex<Arc<Session>>,
}

impl SessionStore {
    pub fn new(session: Session) -> Self {
        Self {
            current: Mutex::new(Arc::new(session)),
        }
    }

    /// The session as of now; later mutations do not affect it
    pub fn snapshot(&self) -> Arc<Session> {
        let guard = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Run a state-changing operation while holding the store lock and
    /// publish its new session. On error the stored session is unchanged.
    pub fn apply<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<(Session, T)>,
    {
        let mut guard = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let (next, out) = op(&guard)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    /// Run a read-only operation against a snapshot
    pub fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        op(&self.snapshot())
    }
}
