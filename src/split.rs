use anyhow::{Context, Result};
use serde::Serialize;
use std::{fs, ops::Range, path::Path};
use tracing::info;

use crate::SplitArgs;
use crate::data::{Series, format_date, read_csv, write_atomic, write_series_csv};
use crate::window::{WindowParams, WindowSizes};

/// One rolling fold of a single series.
#[derive(Debug, Clone)]
pub struct TrainTestSet {
    pub period: usize,
    pub train_range: Range<usize>,
    pub test_range: Range<usize>,
    pub train: Series,
    pub test: Series,
    /// Training start through test end.
    pub full: Series,
}

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub sizes: WindowSizes,
    pub sets: Vec<TrainTestSet>,
}

/// Rolling train/test sets with no validation carve-out. Ranges are
/// half-open and clamped to the series length.
pub fn train_test_sets(series: &Series, n_periods: usize, test_fraction: f64) -> Result<TrainTestSplit> {
    let len = series.len();
    let sizes = WindowParams::new(len, test_fraction, 0.0, n_periods).sizes()?;

    let sets = (0..n_periods)
        .map(|period| {
            let train_start = period * sizes.test;
            let train_end = (train_start + sizes.train).min(len);
            let test_end = (train_end + sizes.test).min(len);
            TrainTestSet {
                period,
                train_range: train_start..train_end,
                test_range: train_end..test_end,
                train: series.slice(train_start..train_end),
                test: series.slice(train_end..test_end),
                full: series.slice(train_start..test_end),
            }
        })
        .collect();

    Ok(TrainTestSplit { sizes, sets })
}

#[derive(Debug, Serialize)]
struct SetBounds {
    start: usize,
    end: usize,
    first_date: Option<String>,
    last_date: Option<String>,
}

impl SetBounds {
    fn new(range: &Range<usize>, set: &Series) -> Self {
        Self {
            start: range.start,
            end: range.end,
            first_date: set.dates().first().map(format_date),
            last_date: set.dates().last().map(format_date),
        }
    }
}

#[derive(Debug, Serialize)]
struct PeriodManifest {
    period: usize,
    train: SetBounds,
    test: SetBounds,
}

#[derive(Debug, Serialize)]
struct SplitManifest<'a> {
    coin: &'a str,
    timeframe: &'a str,
    column: &'a str,
    len: usize,
    test_fraction: f64,
    sizes: WindowSizes,
    periods: Vec<PeriodManifest>,
}

/// Write `train_{i}.csv`, `test_{i}.csv`, `full_{i}.csv` and `windows.json`
/// into `out_dir`.
pub fn write_split(
    out_dir: &Path,
    series: &Series,
    column: &str,
    timeframe: &str,
    test_fraction: f64,
    split: &TrainTestSplit,
) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;

    for set in &split.sets {
        write_series_csv(&out_dir.join(format!("train_{}.csv", set.period)), &set.train, column)?;
        write_series_csv(&out_dir.join(format!("test_{}.csv", set.period)), &set.test, column)?;
        write_series_csv(&out_dir.join(format!("full_{}.csv", set.period)), &set.full, column)?;
    }

    let manifest = SplitManifest {
        coin: series.symbol(),
        timeframe,
        column,
        len: series.len(),
        test_fraction,
        sizes: split.sizes,
        periods: split
            .sets
            .iter()
            .map(|s| PeriodManifest {
                period: s.period,
                train: SetBounds::new(&s.train_range, &s.train),
                test: SetBounds::new(&s.test_range, &s.test),
            })
            .collect(),
    };
    write_atomic(
        &out_dir.join("windows.json"),
        serde_json::to_string_pretty(&manifest)?.as_bytes(),
    )?;
    Ok(())
}

pub fn execute(args: &SplitArgs) -> Result<()> {
    let data_dir = args.data_dir.as_ref().context("missing --data-dir")?;
    let coin = args.coin.as_deref().context("missing --coin")?;
    let timeframe = args.timeframe.as_deref().context("missing --timeframe")?;
    let column = args.column.as_deref().context("missing --column")?;
    let n_periods = args.n_periods.context("missing --n-periods")?;
    let test_fraction = args.test_fraction.context("missing --test-fraction")?;
    let out = args.out.as_ref().context("missing --out")?;

    let series = read_csv(data_dir, coin, timeframe, &[column])?;
    let split = train_test_sets(&series, n_periods, test_fraction)
        .with_context(|| format!("split {} {}", coin, timeframe))?;
    info!(
        "{}: train size {}, test size {}",
        coin, split.sizes.train, split.sizes.test
    );

    let out_dir = out.join(format!("{}_{}", coin, timeframe));
    write_split(&out_dir, &series, column, timeframe, test_fraction, &split)?;

    println!(
        "Split {} {} '{}' into {} periods (train {}, test {}) -> {}",
        coin,
        timeframe,
        column,
        split.sets.len(),
        split.sizes.train,
        split.sizes.test,
        out_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn daily_series(len: usize) -> Series {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let dates: Vec<NaiveDateTime> = (0..len).map(|i| start + Duration::days(i as i64)).collect();
        let values: Vec<f64> = (0..len).map(|i| i as f64).collect();
        Series::from_column("BTC", dates, "log returns", values).unwrap()
    }

    #[test]
    fn test_sets_follow_window_sizes() {
        let series = daily_series(999);
        let split = train_test_sets(&series, 5, 0.25).unwrap();
        assert_eq!(split.sizes.test, 124);
        assert_eq!(split.sizes.train, 372);
        assert_eq!(split.sets.len(), 5);

        for set in &split.sets {
            assert_eq!(set.train.len(), 372);
            assert_eq!(set.test.len(), 124);
            assert_eq!(set.full.len(), 372 + 124);
            // test directly follows train
            assert_eq!(set.train_range.end, set.test_range.start);
            let first_test = set.test.value_at("log returns", 0).unwrap();
            assert_eq!(first_test, set.train_range.end as f64);
        }
        assert_eq!(split.sets[1].train_range.start, 124);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let series = daily_series(100);
        assert!(train_test_sets(&series, 5, 1.0).is_err());
        assert!(train_test_sets(&series, 0, 0.25).is_err());
    }

    #[test]
    fn test_write_split_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let series = daily_series(60);
        let split = train_test_sets(&series, 2, 0.5).unwrap();
        write_split(dir.path(), &series, "log returns", "1d", 0.5, &split).unwrap();

        for i in 0..2 {
            for kind in ["train", "test", "full"] {
                assert!(dir.path().join(format!("{}_{}.csv", kind, i)).exists());
            }
        }
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("windows.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["coin"], "BTC");
        assert_eq!(manifest["sizes"]["test"], 20);
        assert_eq!(manifest["periods"][1]["train"]["start"], 20);
        assert_eq!(manifest["periods"][0]["train"]["first_date"], "2020-01-01");
    }

    #[test]
    fn test_execute_reads_coin_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let series = daily_series(40);
        write_series_csv(
            &crate::data::coin_csv_path(&data_dir, "BTC", "1d"),
            &series,
            "log returns",
        )
        .unwrap();

        let args = SplitArgs {
            data_dir: Some(data_dir),
            coin: Some("BTC".into()),
            timeframe: Some("1d".into()),
            column: Some("log returns".into()),
            n_periods: Some(3),
            test_fraction: Some(0.25),
            out: Some(dir.path().join("out")),
        };
        execute(&args).unwrap();
        assert!(dir.path().join("out/BTC_1d/test_2.csv").exists());
        assert!(dir.path().join("out/BTC_1d/windows.json").exists());
    }
}
