//! Bar retrieval
//!
//! The engine consumes bars through [`BarSource`]. `CsvBarSource` reads
//! `timestamp,open,high,low,close,volume` files, plain or zstd-compressed.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::BarSourceError;
use crate::types::{Bar, Subject};

/// Unix timestamps above this are taken to be milliseconds
const MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Bar-retrieval collaborator
pub trait BarSource: Send + Sync {
    fn fetch(&self, subject: &Subject) -> Result<Vec<Bar>, BarSourceError>;
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// CSV files, either registered per subject or found as
/// `<dir>/<storage_key>.csv[.zst]`
#[derive(Debug, Clone, Default)]
pub struct CsvBarSource {
    files: BTreeMap<Subject, PathBuf>,
    dir: Option<PathBuf>,
}

impl CsvBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            files: BTreeMap::new(),
            dir: Some(dir.into()),
        }
    }

    pub fn with_file(mut self, subject: Subject, path: impl Into<PathBuf>) -> Self {
        self.files.insert(subject, path.into());
        self
    }

    fn resolve(&self, subject: &Subject) -> Option<PathBuf> {
        if let Some(path) = self.files.get(subject) {
            return Some(path.clone());
        }
        let dir = self.dir.as_ref()?;
        let key = subject.storage_key();
        [format!("{}.csv", key), format!("{}.csv.zst", key)]
            .into_iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists())
    }
}

impl BarSource for CsvBarSource {
    fn fetch(&self, subject: &Subject) -> Result<Vec<Bar>, BarSourceError> {
        if subject.instrument.trim().is_empty() {
            return Err(BarSourceError::InvalidTicker(subject.instrument.clone()));
        }
        let path = self
            .resolve(subject)
            .filter(|p| p.exists())
            .ok_or_else(|| BarSourceError::NoData(subject.to_string()))?;

        let bars = read_csv_bars(&path)?;
        if bars.is_empty() {
            return Err(BarSourceError::NoData(subject.to_string()));
        }
        debug!("loaded {} bars for {} from {}", bars.len(), subject, path.display());
        Ok(bars)
    }
}

/// Read bars from a CSV file; `.zst` files are decompressed on the fly
pub fn read_csv_bars(path: &Path) -> Result<Vec<Bar>, BarSourceError> {
    let provider = |what: String| BarSourceError::Provider(format!("{}: {}", path.display(), what));

    let file = File::open(path).map_err(|e| provider(e.to_string()))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "zst") {
        Box::new(zstd::stream::Decoder::new(file).map_err(|e| provider(e.to_string()))?)
    } else {
        Box::new(file)
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(reader));

    let mut bars = Vec::new();
    for (line, result) in csv_reader.deserialize::<CsvRow>().enumerate() {
        let row = result.map_err(|e| provider(format!("row {}: {}", line + 1, e)))?;
        let timestamp = parse_timestamp(&row.timestamp)
            .ok_or_else(|| provider(format!("row {}: bad timestamp '{}'", line + 1, row.timestamp)))?;
        bars.push(Bar::new(timestamp, row.open, row.high, row.low, row.close, row.volume));
    }
    Ok(bars)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, or unix seconds/millis
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }
    let unix: i64 = raw.parse().ok()?;
    if unix.abs() >= MILLIS_CUTOFF {
        Utc.timestamp_millis_opt(unix).single()
    } else {
        Utc.timestamp_opt(unix, 0).single()
    }
}
