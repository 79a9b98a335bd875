use std::{env, path::PathBuf};

use anyhow::Result;
use crypto_walkforward::{
    DEFAULT_COINS, PeriodsArgs, SplitArgs, WindowArgs, periods, split, window::WindowParams,
};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Windows(WindowArgs),
    Split(SplitArgs),
    Periods(PeriodsArgs),
}

/// Length of the mock series used when no subcommand is given.
const MOCK_LEN: usize = 999;

fn default_data_dir() -> PathBuf {
    env::var("COIN_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data"))
}

fn apply_window_defaults(args: &mut WindowArgs) {
    if args.len.is_none() {
        args.len = Some(MOCK_LEN);
    }
    if args.test_fraction.is_none() {
        args.test_fraction = Some(0.25);
    }
    if args.val_fraction.is_none() {
        args.val_fraction = Some(0.1);
    }
    if args.n_periods.is_none() {
        args.n_periods = Some(5);
    }
    if args.json.is_none() {
        args.json = Some(false);
    }
}

fn apply_split_defaults(args: &mut SplitArgs) {
    if args.data_dir.is_none() {
        args.data_dir = Some(default_data_dir());
    }
    if args.coin.is_none() {
        args.coin = Some("BTC".to_string());
    }
    if args.timeframe.is_none() {
        args.timeframe = Some("1d".to_string());
    }
    if args.column.is_none() {
        args.column = Some("log returns".to_string());
    }
    if args.n_periods.is_none() {
        args.n_periods = Some(5);
    }
    if args.test_fraction.is_none() {
        args.test_fraction = Some(0.25);
    }
    if args.out.is_none() {
        args.out = Some(PathBuf::from("./out/splits"));
    }
}

fn apply_periods_defaults(args: &mut PeriodsArgs) {
    if args.data_dir.is_none() {
        args.data_dir = Some(default_data_dir());
    }
    if args.coins.as_ref().is_none_or(|c| c.is_empty()) {
        args.coins = Some(DEFAULT_COINS.iter().map(|c| c.to_string()).collect());
    }
    if args.timeframe.is_none() {
        args.timeframe = Some("1d".to_string());
    }
    if args.column.is_none() {
        args.column = Some("volatility".to_string());
    }
    if args.n_periods.is_none() {
        args.n_periods = Some(5);
    }
    if args.test_fraction.is_none() {
        args.test_fraction = Some(0.25);
    }
    if args.val_fraction.is_none() {
        args.val_fraction = Some(0.1);
    }
    if args.out.is_none() {
        args.out = Some(PathBuf::from("./out/periods"));
    }
    if args.width.is_none() {
        args.width = Some(80);
    }
}

fn print_windows(args: &WindowArgs) -> Result<()> {
    let params = WindowParams::new(
        args.len.unwrap_or(MOCK_LEN),
        args.test_fraction.unwrap_or(0.25),
        args.val_fraction.unwrap_or(0.1),
        args.n_periods.unwrap_or(5),
    );
    let plan = params.plan()?;
    if args.json.unwrap_or(false) {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", plan);
    }
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();
    match args.command {
        Some(Command::Windows(mut window_args)) => {
            apply_window_defaults(&mut window_args);
            print_windows(&window_args)?;
        }
        Some(Command::Split(mut split_args)) => {
            apply_split_defaults(&mut split_args);
            split::execute(&split_args)?;
        }
        Some(Command::Periods(mut periods_args)) => {
            apply_periods_defaults(&mut periods_args);
            periods::execute(&periods_args)?;
        }
        None => {
            println!("No command given; windows of the {}-row mock series:", MOCK_LEN);
            let mut window_args = WindowArgs::default();
            apply_window_defaults(&mut window_args);
            print_windows(&window_args)?;
        }
    }
    Ok(())
}
