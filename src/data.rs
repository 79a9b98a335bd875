use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use itertools::Itertools;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::Write,
    ops::Range,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Date-indexed numeric columns of one coin.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    symbol: String,
    dates: Vec<NaiveDateTime>,
    names: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl Series {
    /// Build a single-column series, checking lengths and date order.
    pub fn from_column(
        symbol: &str,
        dates: Vec<NaiveDateTime>,
        name: &str,
        values: Vec<f64>,
    ) -> Result<Self> {
        if dates.len() != values.len() {
            bail!(
                "{}: {} dates but {} values for {}",
                symbol,
                dates.len(),
                values.len(),
                name
            );
        }
        check_increasing(symbol, &dates)?;
        Ok(Self {
            symbol: symbol.to_string(),
            dates,
            names: vec![name.to_string()],
            values: vec![values],
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn dates(&self) -> &[NaiveDateTime] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i].as_slice())
    }

    pub fn require_column(&self, name: &str) -> Result<&[f64]> {
        self.column(name)
            .with_context(|| format!("{}: no column '{}'", self.symbol, name))
    }

    pub fn value_at(&self, name: &str, idx: usize) -> Option<f64> {
        self.column(name).and_then(|c| c.get(idx).copied())
    }

    /// Sub-series over `range`, clamped to the series bounds.
    pub fn slice(&self, range: Range<usize>) -> Series {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        Series {
            symbol: self.symbol.clone(),
            dates: self.dates[start..end].to_vec(),
            names: self.names.clone(),
            values: self.values.iter().map(|v| v[start..end].to_vec()).collect(),
        }
    }

    /// Values of `column` on exactly `dates`; every date must be present.
    pub fn align(&self, dates: &[NaiveDateTime], column: &str) -> Result<Vec<f64>> {
        let col = self.require_column(column)?;
        let idx: BTreeMap<NaiveDateTime, usize> =
            self.dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
        dates
            .iter()
            .map(|d| {
                idx.get(d)
                    .map(|&i| col[i])
                    .with_context(|| format!("{}: missing date {}", self.symbol, d))
            })
            .collect()
    }
}

/// `{data_dir}/coins/{coin}/{coin}USDT_{timeframe}.csv`
pub fn coin_csv_path(data_dir: &Path, coin: &str, timeframe: &str) -> PathBuf {
    data_dir
        .join("coins")
        .join(coin)
        .join(format!("{}USDT_{}.csv", coin, timeframe))
}

/// Load `col_names` of one coin from the data directory.
pub fn read_csv(data_dir: &Path, coin: &str, timeframe: &str, col_names: &[&str]) -> Result<Series> {
    let path = coin_csv_path(data_dir, coin, timeframe);
    let series =
        read_series(&path, coin, col_names).with_context(|| format!("read {}", path.display()))?;
    info!(
        "loaded {} {} ({} rows, columns: {})",
        coin,
        timeframe,
        series.len(),
        col_names.iter().join(", ")
    );
    Ok(series)
}

/// Read a date-indexed CSV, keeping only rows where every requested column
/// holds a number.
pub fn read_series(path: &Path, symbol: &str, col_names: &[&str]) -> Result<Series> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let headers = rdr.headers()?.clone();
    let date_idx = header_index(&headers, "date")?;
    let col_idx: Vec<usize> = col_names
        .iter()
        .map(|c| header_index(&headers, c))
        .collect::<Result<_>>()?;

    let mut dates = Vec::new();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); col_names.len()];
    let mut dropped = 0usize;

    for (row, rec) in rdr.records().enumerate() {
        let r = rec?;
        let raw_date = r.get(date_idx).unwrap_or_default();
        // header is line 1
        let date = parse_date(raw_date)
            .with_context(|| format!("bad date '{}' on line {}", raw_date, row + 2))?;
        let parsed: Option<Vec<f64>> = col_idx
            .iter()
            .map(|&i| parse_value(r.get(i).unwrap_or_default()))
            .collect();
        match parsed {
            Some(vs) => {
                dates.push(date);
                for (col, v) in values.iter_mut().zip(vs) {
                    col.push(v);
                }
            }
            None => dropped += 1,
        }
    }

    if dates.is_empty() {
        bail!("{}: no complete rows", symbol);
    }
    check_increasing(symbol, &dates)?;
    if dropped > 0 {
        debug!("{}: dropped {} incomplete rows", symbol, dropped);
    }

    Ok(Series {
        symbol: symbol.to_string(),
        dates,
        names: col_names.iter().map(|c| c.to_string()).collect(),
        values,
    })
}

fn header_index(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .with_context(|| format!("missing column '{}'", name))
}

fn check_increasing(symbol: &str, dates: &[NaiveDateTime]) -> Result<()> {
    if let Some((a, b)) = dates.iter().tuple_windows().find(|(a, b)| a >= b) {
        bail!("{}: dates not strictly increasing ({} then {})", symbol, a, b);
    }
    Ok(())
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_date(s: &str) -> Result<NaiveDateTime> {
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    let d = NaiveDate::parse_from_str(s, "%Y-%m-%d").context("unrecognised date format")?;
    Ok(d.and_time(NaiveTime::MIN))
}

fn parse_value(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| !v.is_nan())
}

/// Dates present in every series, ascending.
pub fn intersect_dates(series: &[Series]) -> Vec<NaiveDateTime> {
    let mut sets = series
        .iter()
        .map(|s| s.dates.iter().copied().collect::<BTreeSet<_>>());
    let Some(mut base) = sets.next() else {
        return vec![];
    };
    for s in sets {
        base = base.intersection(&s).copied().collect();
    }
    base.into_iter().collect()
}

/// Format a date the way the input files carry it: date only at midnight.
pub fn format_date(d: &NaiveDateTime) -> String {
    if d.time() == NaiveTime::MIN {
        d.format("%Y-%m-%d").to_string()
    } else {
        d.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn temp_file_beside(path: &Path) -> Result<NamedTempFile> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(NamedTempFile::new_in(dir)?)
}

/// Write `bytes` to `path` through a temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = temp_file_beside(path)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Write CSV rows to `path` atomically, like [`write_atomic`].
pub fn write_csv_atomic<I>(path: &Path, header: &[&str], rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut tmp = temp_file_beside(path)?;
    {
        let mut wtr = WriterBuilder::new().from_writer(tmp.as_file_mut());
        wtr.write_record(header)?;
        for row in rows {
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
    }
    tmp.persist(path)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Write one column of a series as `date,<column>`.
pub fn write_series_csv(path: &Path, series: &Series, column: &str) -> Result<()> {
    let values = series.require_column(column)?;
    let rows = series
        .dates()
        .iter()
        .zip(values)
        .map(|(d, v)| vec![format_date(d), format!("{:.8}", v)]);
    write_csv_atomic(path, &["date", column], rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_coin(dir: &Path, coin: &str, timeframe: &str, body: &str) -> PathBuf {
        let path = coin_csv_path(dir, coin, timeframe);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_time(NaiveTime::MIN)
    }

    #[test]
    fn test_coin_csv_path() {
        let p = coin_csv_path(Path::new("data"), "BTC", "1d");
        assert_eq!(p, PathBuf::from("data/coins/BTC/BTCUSDT_1d.csv"));
    }

    #[test]
    fn test_read_csv_selects_columns() {
        let dir = tempfile::tempdir().unwrap();
        write_coin(
            dir.path(),
            "ETH",
            "1d",
            "date,close,volatility,log returns\n\
             2021-01-01,730.1,0.05,\n\
             2021-01-02,774.5,0.06,0.059\n\
             2021-01-03,975.5,0.07,0.230\n",
        );

        let s = read_csv(dir.path(), "ETH", "1d", &["volatility"]).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.symbol(), "ETH");
        assert_eq!(s.column("volatility").unwrap(), &[0.05, 0.06, 0.07]);
        assert!(s.column("close").is_none());
        assert_eq!(s.dates()[0], day(2021, 1, 1));
    }

    #[test]
    fn test_read_csv_drops_missing_values() {
        let dir = tempfile::tempdir().unwrap();
        write_coin(
            dir.path(),
            "ETH",
            "1d",
            "date,close,log returns\n\
             2021-01-01,730.1,\n\
             2021-01-02,774.5,0.059\n\
             2021-01-03,975.5,NaN\n\
             2021-01-04,1040.2,0.064\n",
        );

        let s = read_csv(dir.path(), "ETH", "1d", &["log returns"]).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.dates(), &[day(2021, 1, 2), day(2021, 1, 4)]);
        assert_eq!(s.value_at("log returns", 1), Some(0.064));
    }

    #[test]
    fn test_read_csv_datetime_index() {
        let dir = tempfile::tempdir().unwrap();
        write_coin(
            dir.path(),
            "SOL",
            "4h",
            "date,close\n\
             2022-03-01 00:00:00,100.0\n\
             2022-03-01 04:00:00,101.5\n",
        );

        let s = read_csv(dir.path(), "SOL", "4h", &["close"]).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(format_date(&s.dates()[0]), "2022-03-01");
        assert_eq!(format_date(&s.dates()[1]), "2022-03-01 04:00:00");
    }

    #[test]
    fn test_read_csv_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_csv(dir.path(), "NOPE", "1d", &["close"]).is_err());

        write_coin(dir.path(), "A", "1d", "date,close\n2021-01-01,1.0\n");
        let err = read_csv(dir.path(), "A", "1d", &["volatility"]).unwrap_err();
        assert!(format!("{:#}", err).contains("missing column 'volatility'"));

        write_coin(
            dir.path(),
            "B",
            "1d",
            "date,close\n2021-01-02,1.0\n2021-01-01,2.0\n",
        );
        let err = read_csv(dir.path(), "B", "1d", &["close"]).unwrap_err();
        assert!(format!("{:#}", err).contains("not strictly increasing"));

        write_coin(dir.path(), "C", "1d", "date,close\n2021-01-01,\n");
        assert!(read_csv(dir.path(), "C", "1d", &["close"]).is_err());
    }

    #[test]
    fn test_intersect_and_align() {
        let a = Series::from_column(
            "A",
            vec![day(2021, 1, 1), day(2021, 1, 2), day(2021, 1, 3)],
            "v",
            vec![1.0, 2.0, 3.0],
        )
        .unwrap();
        let b = Series::from_column(
            "B",
            vec![day(2021, 1, 2), day(2021, 1, 3), day(2021, 1, 4)],
            "v",
            vec![20.0, 30.0, 40.0],
        )
        .unwrap();

        let dates = intersect_dates(&[a.clone(), b.clone()]);
        assert_eq!(dates, vec![day(2021, 1, 2), day(2021, 1, 3)]);
        assert_eq!(a.align(&dates, "v").unwrap(), vec![2.0, 3.0]);
        assert_eq!(b.align(&dates, "v").unwrap(), vec![20.0, 30.0]);
        assert!(a.align(&[day(2021, 1, 4)], "v").is_err());
        assert!(intersect_dates(&[]).is_empty());
    }

    #[test]
    fn test_slice_clamps() {
        let s = Series::from_column(
            "A",
            vec![day(2021, 1, 1), day(2021, 1, 2), day(2021, 1, 3)],
            "v",
            vec![1.0, 2.0, 3.0],
        )
        .unwrap();
        assert_eq!(s.slice(1..10).column("v").unwrap(), &[2.0, 3.0]);
        assert!(s.slice(5..10).is_empty());
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("windows.json");
        write_atomic(&path, b"{\"old\": true}").unwrap();
        write_atomic(&path, b"{\"new\": true}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"new\": true}");
        // no temp files left behind
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_write_series_csv() {
        let dir = tempfile::tempdir().unwrap();
        let s = Series::from_column("A", vec![day(2021, 1, 1)], "v", vec![1.5]).unwrap();
        let path = dir.path().join("nested").join("a.csv");
        write_series_csv(&path, &s, "v").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["date,v", "2021-01-01,1.50000000"]);
    }
}
