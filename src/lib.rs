pub mod config;
pub mod constants;
pub mod error;
pub mod session;
#[cfg(test)]
pub mod test;
pub mod arima {
    pub mod step_1_differencing;
    pub mod step_2_estimation;
    pub mod step_3_order_search;
    pub mod step_4_train_model;
    pub mod step_5_prediction;
}
pub mod data {
    pub mod splitter;
    pub mod temporal_table;
}
pub mod util {
    pub mod feature_engineering;
    pub mod metrics;
    pub mod pre_processor;
    #[cfg(test)]
    pub mod test_utils;
}
pub mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub use config::PipelineConfig;
pub use data::splitter::{split, Split};
pub use data::temporal_table::{RowKey, TableIndex, TemporalTable};
pub use error::{PipelineError, Result};
pub use session::{Session, SessionStore};
