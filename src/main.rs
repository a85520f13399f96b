// External crates
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

// Local modules
use vwap_forecast::build_info;
use vwap_forecast::session::{Session, TrainRequest};
use vwap_forecast::PipelineConfig;

#[derive(Parser, Debug)]
#[command(
    author,
    version = build_info::PKG_VERSION,
    about = "Forecast daily VWAP with rolling features and a stepwise ARIMA search"
)]
struct Args {
    /// Input CSV file with daily bars
    #[arg(short, long)]
    file: PathBuf,

    /// Column to forecast (default: TARGET_COLUMN or VWAP)
    #[arg(short, long)]
    target: Option<String>,

    /// Source columns for rolling features, comma separated
    #[arg(short, long, value_delimiter = ',')]
    columns: Option<Vec<String>>,

    /// Rolling window sizes, comma separated
    #[arg(short, long, value_delimiter = ',')]
    windows: Option<Vec<usize>>,

    /// Rolling operations (mean, std, min, max), comma separated
    #[arg(short, long, value_delimiter = ',')]
    operations: Option<Vec<String>>,

    /// Fraction of rows used for training
    #[arg(short, long)]
    split: Option<f64>,

    /// Exogenous feature columns (default: every generated feature)
    #[arg(long, value_delimiter = ',')]
    features: Option<Vec<String>>,

    /// Forecast horizon (default: size of the testing partition)
    #[arg(short = 'H', long)]
    horizon: Option<usize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PipelineConfig::from_env().context("Failed to read configuration from the environment")?;
    let session = Session::new(config);

    let (session, dataset) = session
        .load_csv(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;

    let (session, features) = session
        .generate_features(args.columns.as_deref(), args.windows.as_deref(), args.operations.as_deref())
        .context("Feature generation failed")?;

    let request = TrainRequest {
        target_column: args.target.clone(),
        feature_columns: args.features.clone(),
        split_ratio: args.split,
        ..TrainRequest::default()
    };
    let (session, model) = session.train(request).context("Training failed")?;

    let (session, prediction) = session.predict(args.horizon, None).context("Prediction failed")?;
    let metrics = match session.metrics() {
        Ok(report) => Some(report),
        Err(err) => {
            log::warn!("Metrics unavailable: {}", err);
            None
        }
    };

    if args.json {
        let report = json!({
            "dataset": dataset,
            "features": features,
            "model": model,
            "prediction": prediction,
            "metrics": metrics,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "=".repeat(60));
    println!(
        "Loaded {} rows x {} columns; generated {} features, {} rows remain",
        dataset.total_rows, dataset.total_columns, features.feature_count, features.rows
    );
    println!(
        "Training rows: {} | Testing rows: {}",
        model.training_rows,
        model.testing_rows.unwrap_or(0)
    );
    println!("{}", model.summary_text);
    println!();
    println!("{:<22}{:>14}{:>14}", "Date", "Forecast", "Actual");
    for (i, (date, value)) in prediction.dates.iter().zip(&prediction.values).enumerate() {
        let actual = prediction
            .actual
            .as_ref()
            .and_then(|a| a.get(i))
            .map_or_else(|| "-".to_string(), |v| format!("{:.4}", v));
        println!("{:<22}{:>14.4}{:>14}", date, value, actual);
    }
    println!();
    match metrics {
        Some(report) => println!("{}", report),
        None => println!("Metrics unavailable"),
    }

    Ok(())
}
