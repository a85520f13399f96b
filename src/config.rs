//! Pipeline configuration, read from environment variables with defaults
//! from [`crate::constants`].

// External crates
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// Internal modules
use crate::arima::step_3_order_search::{InformationCriterion, SearchBounds};
use crate::arima::step_5_prediction::AlignmentPolicy;
use crate::constants::*;
use crate::error::{PipelineError, Result};

/// Feature engineering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub lag_features: Vec<String>,
    pub window_sizes: Vec<usize>,
}

/// Model training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub default_train_split: f64,
    pub target_column: String,
    pub max_p: usize,
    pub max_d: usize,
    pub max_q: usize,
    pub trace: bool,
    pub information_criterion: InformationCriterion,
    pub max_candidates: usize,
    pub time_budget_secs: Option<u64>,
    pub alignment_policy: AlignmentPolicy,
    pub alignment_tolerance_secs: i64,
}

/// Data loading configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub date_column: String,
    pub required_columns: Vec<String>,
    pub nullable_columns: Vec<String>,
}

/// Main pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub data: DataConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lag_features: DEFAULT_LAG_FEATURES.iter().map(|s| s.to_string()).collect(),
            window_sizes: DEFAULT_WINDOW_SIZES.to_vec(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_train_split: DEFAULT_TRAIN_SPLIT,
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            max_p: DEFAULT_MAX_P,
            max_d: DEFAULT_MAX_D,
            max_q: DEFAULT_MAX_Q,
            trace: true,
            information_criterion: InformationCriterion::Aic,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            time_budget_secs: None,
            alignment_policy: AlignmentPolicy::Warn,
            alignment_tolerance_secs: 0,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            required_columns: DEFAULT_REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect(),
            nullable_columns: DEFAULT_NULLABLE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ModelConfig {
    /// Search bounds for the order search derived from this configuration
    pub fn search_bounds(&self) -> SearchBounds {
        SearchBounds {
            max_p: self.max_p,
            max_d: self.max_d,
            max_q: self.max_q,
            criterion: self.information_criterion,
            max_candidates: self.max_candidates,
            time_budget: self.time_budget_secs.map(Duration::from_secs),
            trace: self.trace,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup, falling back to defaults for
    /// absent keys. A present but malformed value is a `Config` error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PipelineConfig::default();

        let features = FeatureConfig {
            lag_features: list_or(&lookup, "LAG_FEATURES", defaults.features.lag_features),
            window_sizes: parsed_list_or(&lookup, "WINDOW_SIZES", defaults.features.window_sizes)?,
        };

        let model = ModelConfig {
            default_train_split: parsed_or(&lookup, "DEFAULT_TRAIN_SPLIT", defaults.model.default_train_split)?,
            target_column: lookup("TARGET_COLUMN")
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.model.target_column),
            max_p: parsed_or(&lookup, "ARIMA_MAX_P", defaults.model.max_p)?,
            max_d: parsed_or(&lookup, "ARIMA_MAX_D", defaults.model.max_d)?,
            max_q: parsed_or(&lookup, "ARIMA_MAX_Q", defaults.model.max_q)?,
            trace: match lookup("ARIMA_TRACE") {
                Some(v) => v.trim().eq_ignore_ascii_case("true"),
                None => defaults.model.trace,
            },
            information_criterion: parsed_or(&lookup, "ARIMA_CRITERION", defaults.model.information_criterion)?,
            max_candidates: parsed_or(&lookup, "ARIMA_MAX_CANDIDATES", defaults.model.max_candidates)?,
            time_budget_secs: match lookup("ARIMA_TIME_BUDGET_SECS") {
                Some(v) => Some(parse_value("ARIMA_TIME_BUDGET_SECS", &v)?),
                None => defaults.model.time_budget_secs,
            },
            alignment_policy: parsed_or(&lookup, "ALIGNMENT_POLICY", defaults.model.alignment_policy)?,
            alignment_tolerance_secs: parsed_or(
                &lookup,
                "ALIGNMENT_TOLERANCE_SECS",
                defaults.model.alignment_tolerance_secs,
            )?,
        };

        let data = DataConfig {
            date_column: lookup("DATE_COLUMN")
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.data.date_column),
            required_columns: list_or(&lookup, "REQUIRED_COLUMNS", defaults.data.required_columns),
            nullable_columns: list_or(&lookup, "NULLABLE_COLUMNS", defaults.data.nullable_columns),
        };

        let config = PipelineConfig { features, model, data };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make later stages fail in confusing ways
    pub fn validate(&self) -> Result<()> {
        let split = self.model.default_train_split;
        if !(split > 0.0 && split < 1.0) {
            return Err(PipelineError::Config(format!(
                "DEFAULT_TRAIN_SPLIT must lie strictly between 0 and 1, got {}",
                split
            )));
        }
        if self.features.window_sizes.iter().any(|&w| w == 0) {
            return Err(PipelineError::Config("WINDOW_SIZES must be positive".to_string()));
        }
        if self.model.max_candidates == 0 {
            return Err(PipelineError::Config("ARIMA_MAX_CANDIDATES must be positive".to_string()));
        }
        if self.model.alignment_tolerance_secs < 0 {
            return Err(PipelineError::Config(
                "ALIGNMENT_TOLERANCE_SECS must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| PipelineError::Config(format!("{} has malformed value '{}'", key, raw)))
}

fn parsed_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn list_or<F>(lookup: &F, key: &str, default: Vec<String>) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|raw| split_list(&raw)).unwrap_or(default)
}

fn parsed_list_or<T, F>(lookup: &F, key: &str, default: Vec<T>) -> Result<Vec<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => split_list(&raw).iter().map(|v| parse_value(key, v)).collect(),
        None => Ok(default),
    }
}
