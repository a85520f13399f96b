// External imports
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// Internal imports
use crate::data::temporal_table::TemporalTable;

/// Midnight of the `i`-th day of the synthetic calendar, starting 2023-01-01 for `i = 1`
pub fn day(i: u32) -> NaiveDateTime {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid start date");
    start + Duration::days(i64::from(i) - 1)
}

/// Synthetic daily bars: a random walk in price with realistic OHLC
/// relationships and random volume
pub struct DailyBars {
    pub dates: Vec<NaiveDateTime>,
    pub prev_close: Vec<f64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub last: Vec<f64>,
    pub close: Vec<f64>,
    pub vwap: Vec<f64>,
    pub volume: Vec<f64>,
    pub turnover: Vec<f64>,
    pub trades: Vec<f64>,
}

pub fn generate_daily_bars(num_rows: usize, seed: u64) -> DailyBars {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = DailyBars {
        dates: Vec::with_capacity(num_rows),
        prev_close: Vec::with_capacity(num_rows),
        open: Vec::with_capacity(num_rows),
        high: Vec::with_capacity(num_rows),
        low: Vec::with_capacity(num_rows),
        last: Vec::with_capacity(num_rows),
        close: Vec::with_capacity(num_rows),
        vwap: Vec::with_capacity(num_rows),
        volume: Vec::with_capacity(num_rows),
        turnover: Vec::with_capacity(num_rows),
        trades: Vec::with_capacity(num_rows),
    };

    // Start with a base price around 100
    let mut prev_close = 100.0 + rng.random::<f64>() * 50.0;
    for i in 0..num_rows {
        // Random price movement between -2% and +2%
        let movement = (rng.random::<f64>() * 2.0 - 1.0) * 0.02;
        let close = prev_close * (1.0 + movement);
        let open = prev_close * (1.0 + (rng.random::<f64>() * 0.01 - 0.005));
        let high = close.max(open) * (1.0 + rng.random::<f64>() * 0.01);
        let low = close.min(open) * (1.0 - rng.random::<f64>() * 0.01);
        let vwap = low + (high - low) * (0.3 + 0.4 * rng.random::<f64>());
        let volume = f64::from(rng.random_range(10_000u32..200_000));

        bars.dates.push(day(i as u32 + 1));
        bars.prev_close.push(prev_close);
        bars.open.push(open);
        bars.high.push(high);
        bars.low.push(low);
        bars.last.push(close * (1.0 + (rng.random::<f64>() - 0.5) * 0.001));
        bars.close.push(close);
        bars.vwap.push(vwap);
        bars.volume.push(volume);
        bars.turnover.push(volume * vwap);
        bars.trades.push(f64::from(rng.random_range(500u32..5_000)));
        prev_close = close;
    }
    bars
}

/// Synthetic daily bars as a time-indexed table
pub fn daily_bars(num_rows: usize, seed: u64) -> TemporalTable {
    let bars = generate_daily_bars(num_rows, seed);
    TemporalTable::from_columns(
        bars.dates,
        vec![
            ("Prev Close", bars.prev_close),
            ("Open", bars.open),
            ("High", bars.high),
            ("Low", bars.low),
            ("Last", bars.last),
            ("Close", bars.close),
            ("VWAP", bars.vwap),
            ("Volume", bars.volume),
            ("Turnover", bars.turnover),
            ("Trades", bars.trades),
        ],
    )
    .expect("synthetic bars form a valid table")
}

/// Synthetic bars rendered as CSV text in the NSE layout, dates as `%Y-%m-%d`
pub fn daily_bars_csv(num_rows: usize, seed: u64) -> String {
    let bars = generate_daily_bars(num_rows, seed);
    let mut csv = String::from("Date,Symbol,Series,Prev Close,Open,High,Low,Last,Close,VWAP,Volume,Turnover,Trades\n");
    for i in 0..num_rows {
        csv.push_str(&format!(
            "{},TEST,EQ,{},{},{},{},{},{},{},{},{},{}\n",
            bars.dates[i].format("%Y-%m-%d"),
            bars.prev_close[i],
            bars.open[i],
            bars.high[i],
            bars.low[i],
            bars.last[i],
            bars.close[i],
            bars.vwap[i],
            bars.volume[i],
            bars.turnover[i],
            bars.trades[i],
        ));
    }
    csv
}

/// `y[t] = 2 y[t-1] - y[t-2] + noise`, a doubly integrated noise process
pub fn integrated_series(num_rows: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut y = vec![100.0, 101.0];
    while y.len() < num_rows {
        let t = y.len();
        let noise = rng.random::<f64>() - 0.5;
        y.push(2.0 * y[t - 1] - y[t - 2] + noise);
    }
    y.truncate(num_rows);
    y
}
