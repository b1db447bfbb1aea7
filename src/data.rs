//! Data loading and validation for daily OHLCV series.

use crate::error::{RegimeError, Result};
use crate::types::Bar;
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw CSV row with flexible header names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(alias = "Open", alias = "open", alias = "o")]
    open: f64,
    #[serde(alias = "High", alias = "high", alias = "h")]
    high: f64,
    #[serde(alias = "Low", alias = "low", alias = "l")]
    low: f64,
    #[serde(alias = "Close", alias = "close", alias = "c")]
    close: f64,
    #[serde(
        rename = "Adj Close",
        alias = "adj_close",
        alias = "Adj_Close",
        alias = "adjclose",
        default
    )]
    adj_close: Option<f64>,
    #[serde(
        alias = "Volume",
        alias = "volume",
        alias = "v",
        alias = "vol",
        alias = "Vol",
        default
    )]
    volume: f64,
}

/// Data source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Date format string for parsing (e.g. "%Y-%m-%d").
    pub date_format: Option<String>,
    /// Whether the CSV has headers.
    pub has_headers: bool,
    /// CSV delimiter character. If None, the delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
    /// Validate bar data (high >= low, positive prices).
    pub validate_bars: bool,
    /// Use the `Adj Close` column as the close when a row has one.
    pub use_adjusted_close: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: None,
            skip_invalid: true,
            validate_bars: true,
            use_adjusted_close: false,
        }
    }
}

/// Candidate field separators, in order of preference on ties.
const DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

/// Minimum fields per line: date and close plus three of open/high/low/volume.
const MIN_FIELDS: usize = 5;

/// Calendar date layouts tried when no explicit format is configured.
const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
];

/// Timestamp layouts whose time part is discarded.
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S%:z",
];

/// Pick the separator that splits the first lines into the same, largest
/// number of fields. Falls back to a comma.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let sample: Vec<String> = BufReader::new(File::open(path)?)
        .lines()
        .take(5)
        .map_while(|l| l.ok())
        .collect();

    let fields = |line: &str, delim: u8| line.bytes().filter(|&b| b == delim).count() + 1;

    let detected = DELIMITERS
        .iter()
        .filter_map(|&delim| {
            let first = fields(sample.first()?.as_str(), delim);
            let consistent = sample.iter().all(|line| fields(line.as_str(), delim) == first);
            (consistent && first >= MIN_FIELDS).then_some((delim, first))
        })
        .fold(None, |best: Option<(u8, usize)>, (delim, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((delim, n)),
        });

    let delimiter = detected.map_or(b',', |(d, _)| d);
    debug!("Using delimiter {:?} ({:?})", delimiter as char, detected.map(|(_, n)| n));
    Ok(delimiter)
}

/// Parse a calendar date, accepting datetime strings by keeping their date part.
///
/// An explicit `format` is tried first, then the built-in layouts.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();

    let as_date = |fmt: &str| NaiveDate::parse_from_str(s, fmt).ok();
    let as_datetime = |fmt: &str| NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date());

    format
        .and_then(|fmt| as_date(fmt).or_else(|| as_datetime(fmt)))
        .or_else(|| DATE_FORMATS.iter().find_map(|fmt| as_date(*fmt)))
        .or_else(|| DATETIME_FORMATS.iter().find_map(|fmt| as_datetime(*fmt)))
        .ok_or_else(|| RegimeError::DataError(format!("Could not parse date: '{}'", s)))
}

/// Load daily OHLCV bars from a CSV file.
///
/// Rows are sorted ascending by date and duplicate dates are removed, keeping
/// the first occurrence. An empty result is reported as [`RegimeError::NoData`].
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut bars = Vec::new();
    let mut skipped = 0;
    let mut row_num = 0;

    for result in reader.deserialize() {
        row_num += 1;
        let row: CsvRow = match result {
            Ok(r) => r,
            Err(e) => {
                if config.skip_invalid {
                    debug!("Skipping row {}: {}", row_num, e);
                    skipped += 1;
                    continue;
                }
                return Err(RegimeError::CsvError(e));
            }
        };

        let date = match parse_date(&row.date, config.date_format.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                if config.skip_invalid {
                    debug!("Skipping row {} due to date parse error: {}", row_num, e);
                    skipped += 1;
                    continue;
                }
                return Err(e);
            }
        };

        let mut bar = Bar::new(date, row.open, row.high, row.low, row.close, row.volume);

        if config.validate_bars && !bar.validate() {
            if config.skip_invalid {
                debug!("Skipping row {} due to invalid bar data: {:?}", row_num, bar);
                skipped += 1;
                continue;
            }
            return Err(RegimeError::DataError(format!(
                "Invalid bar data at row {}: {:?}",
                row_num, bar
            )));
        }

        // OHLC consistency is checked on the raw close
        if let Some(adjusted) = row.adj_close.filter(|_| config.use_adjusted_close) {
            bar.close = adjusted;
        }

        bars.push(bar);
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    // Stable sort keeps the first row of a duplicated date.
    bars.sort_by_key(|b| b.date);

    let original_len = bars.len();
    bars.dedup_by_key(|b| b.date);
    if bars.len() < original_len {
        warn!("Removed {} duplicate dates", original_len - bars.len());
    }

    if bars.is_empty() {
        return Err(RegimeError::NoData);
    }

    info!(
        "Loaded {} bars from {} to {}",
        bars.len(),
        bars[0].date,
        bars[bars.len() - 1].date
    );

    Ok(bars)
}

/// Check that a bar series is usable: non-empty, strictly increasing dates,
/// positive finite closes.
pub fn validate_series(bars: &[Bar]) -> Result<()> {
    if bars.is_empty() {
        return Err(RegimeError::NoData);
    }

    for (i, bar) in bars.iter().enumerate() {
        if !bar.close.is_finite() || bar.close <= 0.0 {
            return Err(RegimeError::InvalidInput(format!(
                "Close price at {} must be positive and finite, got {}",
                bar.date, bar.close
            )));
        }
        if i > 0 && bar.date <= bars[i - 1].date {
            return Err(RegimeError::InvalidInput(format!(
                "Dates must be strictly increasing: {} follows {}",
                bar.date,
                bars[i - 1].date
            )));
        }
    }

    Ok(())
}

/// Summary statistics of a loaded series, used by the `validate` command.
#[derive(Debug, Clone, Serialize)]
pub struct DataSummary {
    pub rows: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub min_close: f64,
    pub max_close: f64,
    pub avg_close: f64,
    pub avg_volume: f64,
}

impl DataSummary {
    /// Summarize a non-empty bar series.
    pub fn from_bars(bars: &[Bar]) -> Result<Self> {
        let (first, last) = match (bars.first(), bars.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Err(RegimeError::NoData),
        };

        let n = bars.len() as f64;
        let min_close = bars.iter().map(|b| b.close).fold(f64::INFINITY, f64::min);
        let max_close = bars.iter().map(|b| b.close).fold(f64::NEG_INFINITY, f64::max);
        let avg_close = bars.iter().map(|b| b.close).sum::<f64>() / n;
        let avg_volume = bars.iter().map(|b| b.volume).sum::<f64>() / n;

        Ok(Self {
            rows: bars.len(),
            start: first.date,
            end: last.date,
            min_close,
            max_close,
            avg_close,
            avg_volume,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_date("2024-01-15", None).unwrap(), expected);
        assert_eq!(parse_date("2024/01/15", None).unwrap(), expected);
        assert_eq!(parse_date("15-Jan-2024", None).unwrap(), expected);
        assert_eq!(parse_date("2024-01-15 00:00:00", None).unwrap(), expected);
        assert_eq!(parse_date("2024-01-15T09:30:00", None).unwrap(), expected);
        assert!(parse_date("not a date", None).is_err());
    }

    #[test]
    fn test_load_csv_sorts_and_dedups() {
        let file = write_csv(
            "date,open,high,low,close,volume\n\
             2024-01-03,101,103,100,102,1000\n\
             2024-01-02,100,102,99,101,1000\n\
             2024-01-03,999,999,999,999,1\n\
             2024-01-04,102,104,101,103,1000\n",
        );

        let bars = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].close, 102.0);
        assert!(validate_series(&bars).is_ok());
    }

    #[test]
    fn test_load_csv_semicolon_delimiter() {
        let file = write_csv(
            "Date;Open;High;Low;Close;Volume\n\
             2024-01-02;100;102;99;101;1000\n\
             2024-01-03;101;103;100;102;1000\n",
        );

        let bars = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 102.0);
    }

    #[test]
    fn test_load_csv_yahoo_layout() {
        let file = write_csv(
            "Date,Open,High,Low,Close,Adj Close,Volume\n\
             2024-01-02,100,102,99,101,100.5,1000\n\
             2024-01-03,101,103,100,102,101.5,1200\n",
        );

        let bars = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 101.0);
        assert_eq!(bars[1].volume, 1200.0);

        let strict = DataConfig {
            skip_invalid: false,
            ..Default::default()
        };
        assert_eq!(load_csv(file.path(), &strict).unwrap().len(), 2);

        let adjusted = DataConfig {
            use_adjusted_close: true,
            ..Default::default()
        };
        let bars = load_csv(file.path(), &adjusted).unwrap();
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[1].close, 101.5);
    }

    #[test]
    fn test_load_csv_skips_invalid_rows() {
        let file = write_csv(
            "date,open,high,low,close,volume\n\
             2024-01-02,100,102,99,101,1000\n\
             garbage,1,1,1,1,1\n\
             2024-01-04,100,90,110,101,1000\n\
             2024-01-05,101,103,100,102,1000\n",
        );

        let bars = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(bars.len(), 2);

        let strict = DataConfig {
            skip_invalid: false,
            ..Default::default()
        };
        assert!(load_csv(file.path(), &strict).is_err());
    }

    #[test]
    fn test_load_csv_empty_is_no_data() {
        let file = write_csv("date,open,high,low,close,volume\n");
        let err = load_csv(file.path(), &DataConfig::default()).unwrap_err();
        assert!(matches!(err, RegimeError::NoData));
    }

    #[test]
    fn test_validate_series_rejects_unordered() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let bars = vec![
            Bar::new(d(3), 1.0, 1.0, 1.0, 1.0, 0.0),
            Bar::new(d(2), 1.0, 1.0, 1.0, 1.0, 0.0),
        ];
        assert!(matches!(
            validate_series(&bars),
            Err(RegimeError::InvalidInput(_))
        ));
        assert!(matches!(validate_series(&[]), Err(RegimeError::NoData)));
    }

    #[test]
    fn test_data_summary() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let bars = vec![
            Bar::new(d(2), 10.0, 11.0, 9.0, 10.0, 100.0),
            Bar::new(d(3), 10.0, 13.0, 9.0, 12.0, 300.0),
        ];
        let summary = DataSummary::from_bars(&bars).unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.min_close, 10.0);
        assert_eq!(summary.max_close, 12.0);
        assert_eq!(summary.avg_volume, 200.0);
    }
}
