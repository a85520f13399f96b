// Feature engineering defaults
pub const DEFAULT_LAG_FEATURES: [&str; 4] = ["High", "Low", "Volume", "Turnover"];
pub const DEFAULT_WINDOW_SIZES: [usize; 2] = [3, 7];
pub const DEFAULT_OPERATIONS: [&str; 2] = ["mean", "std"];
pub const PREVIEW_ROWS: usize = 5;

// Model parameters
pub const DEFAULT_TRAIN_SPLIT: f64 = 0.8; // 80% of rows for training
pub const DEFAULT_TARGET_COLUMN: &str = "VWAP";
pub const DEFAULT_MAX_P: usize = 5;
pub const DEFAULT_MAX_D: usize = 2;
pub const DEFAULT_MAX_Q: usize = 5;
pub const DEFAULT_MAX_CANDIDATES: usize = 94;

// Relative width inside which two criterion values count as a tie
pub const CRITERION_TIE_TOLERANCE: f64 = 1e-9;

// Metrics
pub const MAPE_ZERO_THRESHOLD: f64 = 1e-10;

// Data loading
pub const DEFAULT_DATE_COLUMN: &str = "Date";
pub const DEFAULT_REQUIRED_COLUMNS: [&str; 12] = [
    "Date",
    "Symbol",
    "Series",
    "Prev Close",
    "Open",
    "High",
    "Low",
    "Last",
    "Close",
    "VWAP",
    "Volume",
    "Turnover",
];
pub const DEFAULT_NULLABLE_COLUMNS: [&str; 1] = ["Trades"];
pub const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d-%b-%Y", "%d-%m-%Y", "%m/%d/%Y", "%Y/%m/%d"];
pub const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
