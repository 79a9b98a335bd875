use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::{fs, path::Path};
use tracing::{info, warn};

use crate::PeriodsArgs;
use crate::data::{Series, format_date, intersect_dates, read_csv, write_csv_atomic};
use crate::window::{Window, WindowParams, WindowSizes};

/// Train/validation/test boundaries of one period on the shared date axis.
/// The `*_pos` fields are relative positions in `[0, 1]` between the first
/// and last aligned date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodBand {
    pub period: usize,
    pub train_start: NaiveDateTime,
    pub train_end: NaiveDateTime,
    pub val_end: NaiveDateTime,
    pub test_end: NaiveDateTime,
    pub train_start_pos: f64,
    pub train_end_pos: f64,
    pub val_end_pos: f64,
    pub test_end_pos: f64,
}

/// Column of every coin on common dates, their per-date average and the
/// period bands laid over them.
#[derive(Debug, Clone)]
pub struct PeriodOverview {
    pub column: String,
    pub dates: Vec<NaiveDateTime>,
    pub coins: Vec<String>,
    /// One vector per coin, aligned with `dates`.
    pub values: Vec<Vec<f64>>,
    pub average: Vec<f64>,
    pub overall_average: f64,
    pub sizes: WindowSizes,
    pub bands: Vec<PeriodBand>,
}

pub fn build_overview(
    series: &[Series],
    column: &str,
    n_periods: usize,
    test_fraction: f64,
    val_fraction: f64,
) -> Result<PeriodOverview> {
    if series.is_empty() {
        bail!("no series to compare");
    }
    let dates = intersect_dates(series);
    if dates.is_empty() {
        bail!("series share no dates");
    }

    let values: Vec<Vec<f64>> = series
        .iter()
        .map(|s| s.align(&dates, column))
        .collect::<Result<_>>()?;
    let average: Vec<f64> = (0..dates.len())
        .map(|i| values.iter().map(|v| v[i]).mean())
        .collect();
    let overall_average = average.iter().mean();

    let plan = WindowParams::new(dates.len(), test_fraction, val_fraction, n_periods).plan()?;
    let bands = plan.windows.iter().map(|w| band(&dates, w)).collect();

    Ok(PeriodOverview {
        column: column.to_string(),
        dates,
        coins: series.iter().map(|s| s.symbol().to_string()).collect(),
        values,
        average,
        overall_average,
        sizes: plan.sizes,
        bands,
    })
}

fn band(dates: &[NaiveDateTime], w: &Window) -> PeriodBand {
    let pos = |idx: usize| axis_position(dates, idx);
    PeriodBand {
        period: w.period,
        train_start: dates[w.train_start],
        train_end: dates[w.train_end],
        val_end: dates[w.val_end],
        test_end: dates[w.test_end],
        train_start_pos: pos(w.train_start),
        train_end_pos: pos(w.train_end),
        val_end_pos: pos(w.val_end),
        test_end_pos: pos(w.test_end),
    }
}

/// Relative position of `dates[idx]` on the time axis.
#[allow(clippy::cast_precision_loss)]
pub fn axis_position(dates: &[NaiveDateTime], idx: usize) -> f64 {
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        return 0.0;
    };
    let span = (*last - *first).num_seconds();
    if span <= 0 {
        return 0.0;
    }
    (dates[idx] - *first).num_seconds() as f64 / span as f64
}

/// Text rendering of the period bands: `=` train, `~` validation, `#` test.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn render_timeline(overview: &PeriodOverview, width: usize) -> String {
    let width = width.max(10);
    let col = |pos: f64| ((pos * width as f64).round() as usize).min(width);

    let mut out = String::new();
    if let (Some(first), Some(last)) = (overview.dates.first(), overview.dates.last()) {
        out.push_str(&format!(
            "{:>4} {}{:>w$}\n",
            "",
            format_date(first),
            format_date(last),
            w = (width + 2).saturating_sub(format_date(first).len())
        ));
    }
    for b in &overview.bands {
        let mut line = vec![' '; width];
        let spans = [
            (b.train_start_pos, b.train_end_pos, '='),
            (b.train_end_pos, b.val_end_pos, '~'),
            (b.val_end_pos, b.test_end_pos, '#'),
        ];
        for (from, to, ch) in spans {
            for cell in line.iter_mut().take(col(to)).skip(col(from)) {
                *cell = ch;
            }
        }
        out.push_str(&format!(
            "P{:<3} |{}|\n",
            b.period,
            line.into_iter().collect::<String>()
        ));
    }
    out
}

fn column_slug(column: &str) -> String {
    column.split_whitespace().join("_")
}

/// Write `average_{column}.csv` and `periods.csv` into `out_dir`.
pub fn write_overview(out_dir: &Path, overview: &PeriodOverview) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;

    let avg_header = format!("average {}", overview.column);
    let mut header: Vec<&str> = vec!["date"];
    header.extend(overview.coins.iter().map(String::as_str));
    header.push(&avg_header);
    let rows = overview.dates.iter().enumerate().map(|(i, d)| {
        let mut row = vec![format_date(d)];
        row.extend(overview.values.iter().map(|v| format!("{:.8}", v[i])));
        row.push(format!("{:.8}", overview.average[i]));
        row
    });
    write_csv_atomic(
        &out_dir.join(format!("average_{}.csv", column_slug(&overview.column))),
        &header,
        rows,
    )?;

    let band_rows = overview.bands.iter().map(|b| {
        vec![
            b.period.to_string(),
            format_date(&b.train_start),
            format_date(&b.train_end),
            format_date(&b.val_end),
            format_date(&b.test_end),
            format!("{:.6}", b.train_start_pos),
            format!("{:.6}", b.train_end_pos),
            format!("{:.6}", b.val_end_pos),
            format!("{:.6}", b.test_end_pos),
        ]
    });
    write_csv_atomic(
        &out_dir.join("periods.csv"),
        &[
            "period",
            "train_start",
            "train_end",
            "val_end",
            "test_end",
            "train_start_pos",
            "train_end_pos",
            "val_end_pos",
            "test_end_pos",
        ],
        band_rows,
    )
}

pub fn execute(args: &PeriodsArgs) -> Result<()> {
    let data_dir = args.data_dir.as_ref().context("missing --data-dir")?;
    let coins = args.coins.as_ref().context("missing --coins")?;
    let timeframe = args.timeframe.as_deref().context("missing --timeframe")?;
    let column = args.column.as_deref().context("missing --column")?;
    let n_periods = args.n_periods.context("missing --n-periods")?;
    let test_fraction = args.test_fraction.context("missing --test-fraction")?;
    let val_fraction = args.val_fraction.unwrap_or(0.0);
    let out = args.out.as_ref().context("missing --out")?;

    let mut series = Vec::with_capacity(coins.len());
    for coin in coins {
        match read_csv(data_dir, coin, timeframe, &[column]) {
            Ok(s) => series.push(s),
            Err(e) => warn!("skipping {}: {:#}", coin, e),
        }
    }
    info!("using {} of {} coins", series.len(), coins.len());

    let overview = build_overview(&series, column, n_periods, test_fraction, val_fraction)?;
    write_overview(out, &overview)?;

    println!(
        "{} coins, {} common dates, overall average {}: {:.6}",
        overview.coins.len(),
        overview.dates.len(),
        column,
        overview.overall_average
    );
    println!(
        "Train size: {}  Test size: {}",
        overview.sizes.train, overview.sizes.test
    );
    print!("{}", render_timeline(&overview, args.width.unwrap_or(80)));
    println!("Length of validation set: {}", overview.sizes.val);
    Ok(())
}
