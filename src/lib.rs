pub mod data;
pub mod periods;
pub mod split;
pub mod window;

use clap::Parser;
use std::path::PathBuf;

/// Coins used by the period diagnostic when `--coins` is not given.
pub const DEFAULT_COINS: &[&str] = &[
    "BTC", "ETH", "BNB", "XRP", "ADA", "SOL", "DOGE", "TRX", "LINK", "LTC", "DOT", "AVAX",
];

/// Prints the walk-forward window offsets for a series length.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct WindowArgs {
    /// Series length
    #[arg(long)]
    pub len: Option<usize>,

    /// Share of each period used for testing, in (0, 1)
    #[arg(long)]
    pub test_fraction: Option<f64>,

    /// Share of the training window carved out for validation, in [0, 1)
    #[arg(long)]
    pub val_fraction: Option<f64>,

    /// Number of rolling periods
    #[arg(long)]
    pub n_periods: Option<usize>,

    /// Print JSON instead of a table
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub json: Option<bool>,
}

/// Splits one coin's column into rolling train/test/full sets and writes them as CSVs.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct SplitArgs {
    /// Root holding coins/{symbol}/{symbol}USDT_{timeframe}.csv (or set COIN_DATA_DIR env)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Coin symbol, e.g. BTC
    #[arg(long)]
    pub coin: Option<String>,

    /// Candle timeframe, e.g. 1d, 4h
    #[arg(long)]
    pub timeframe: Option<String>,

    /// Column to split
    #[arg(long)]
    pub column: Option<String>,

    #[arg(long)]
    pub n_periods: Option<usize>,

    #[arg(long)]
    pub test_fraction: Option<f64>,

    /// Output directory
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Averages a column across coins and maps every period's train/validation/test bands onto dates.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct PeriodsArgs {
    /// Root holding coins/{symbol}/{symbol}USDT_{timeframe}.csv (or set COIN_DATA_DIR env)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Coin symbols to include
    #[arg(long, num_args=1..)]
    pub coins: Option<Vec<String>>,

    #[arg(long)]
    pub timeframe: Option<String>,

    /// Column to average, e.g. volatility
    #[arg(long)]
    pub column: Option<String>,

    #[arg(long)]
    pub n_periods: Option<usize>,

    #[arg(long)]
    pub test_fraction: Option<f64>,

    #[arg(long)]
    pub val_fraction: Option<f64>,

    /// Output directory
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Width of the printed timeline in characters
    #[arg(long)]
    pub width: Option<usize>,
}
