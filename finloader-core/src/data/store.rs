//! Parquet store, one file per series.
//!
//! Layout: `{data_dir}/{provider}/{SYMBOL}/{provider}_{SYMBOL}_{timeframe}.parquet`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Watermark lookup from a metadata sidecar (hash, time range, bar count)
//! - Integrity validation on load (schema check, sorted unique timestamps)
//! - Quarantine for corrupt files ({filename}.quarantined)

use super::provider::{DataError, ProviderKind};
use super::schema::{validate_series, BarSchema, TIME_COLUMN};
use crate::domain::{Bar, ForexSymbol, Timeframe};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Identifies one stored series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub provider: ProviderKind,
    pub symbol: ForexSymbol,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(provider: ProviderKind, symbol: ForexSymbol, timeframe: Timeframe) -> Self {
        Self {
            provider,
            symbol,
            timeframe,
        }
    }

    /// `{provider}_{SYMBOL}_{timeframe}`, shared by the data file and its sidecar.
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.provider, self.symbol, self.timeframe)
    }

    /// Name of the Parquet file, as used in log messages.
    pub fn file_name(&self) -> String {
        format!("{}.parquet", self.file_stem())
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.provider, self.symbol, self.timeframe)
    }
}

/// Metadata sidecar for a stored series.
///
/// `data_hash` is the blake3 hash of the Parquet file bytes, so a sidecar can
/// be checked against the file it claims to describe without decoding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub provider: ProviderKind,
    pub symbol: String,
    pub timeframe: String,
    pub first_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
    pub bar_count: usize,
    pub data_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl SeriesMeta {
    fn describes(&self, key: &SeriesKey) -> bool {
        self.provider == key.provider
            && self.symbol == key.symbol.to_string()
            && self.timeframe == key.timeframe.to_string()
    }
}

/// One row of `finloader status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStatus {
    pub meta: SeriesMeta,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// The Parquet store.
pub struct ParquetStore {
    data_dir: PathBuf,
}

impl ParquetStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory for a series: `{data_dir}/{provider}/{SYMBOL}/`
    fn series_dir(&self, key: &SeriesKey) -> PathBuf {
        self.data_dir
            .join(key.provider.as_str())
            .join(key.symbol.to_string())
    }

    pub fn parquet_path(&self, key: &SeriesKey) -> PathBuf {
        self.series_dir(key).join(key.file_name())
    }

    fn meta_path(&self, key: &SeriesKey) -> PathBuf {
        self.series_dir(key)
            .join(format!("{}.meta.json", key.file_stem()))
    }

    pub fn exists(&self, key: &SeriesKey) -> bool {
        self.parquet_path(key).exists()
    }

    /// Replace the stored series with `bars`.
    ///
    /// The data file and the sidecar are each written to a temp file and
    /// renamed into place, so readers see either the old or the new series.
    pub fn write(&self, key: &SeriesKey, bars: &[Bar]) -> Result<SeriesMeta, DataError> {
        let (first, last) = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => (first.time, last.time),
            _ => return Err(DataError::Store("no bars to store".into())),
        };
        validate_series(bars)?;

        let dir = self.series_dir(key);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Store(format!("failed to create {}: {e}", dir.display())))?;

        let mut df = bars_to_dataframe(bars)?;
        let path = self.parquet_path(key);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;
        let data_hash = hash_file(&tmp_path)?;
        rename_into_place(&tmp_path, &path)?;

        let meta = SeriesMeta {
            provider: key.provider,
            symbol: key.symbol.to_string(),
            timeframe: key.timeframe.to_string(),
            first_time: first,
            last_time: last,
            bar_count: bars.len(),
            data_hash,
            updated_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Store(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(key);
        let meta_tmp = meta_path.with_extension("json.tmp");
        fs::write(&meta_tmp, meta_json)
            .map_err(|e| DataError::Store(format!("meta write: {e}")))?;
        rename_into_place(&meta_tmp, &meta_path)?;

        Ok(meta)
    }

    /// Load the stored series, sorted ascending. A missing series is empty.
    ///
    /// A file that fails to decode or validate is quarantined and reported as
    /// an error, so a later partial fetch never silently replaces history.
    /// A file that cannot be read at all is reported and left in place.
    pub fn load(&self, key: &SeriesKey) -> Result<Vec<Bar>, DataError> {
        if !self.exists(key) {
            return Ok(Vec::new());
        }
        let bytes = read_file(&self.parquet_path(key))?;
        self.decode(key, bytes)
    }

    fn decode(&self, key: &SeriesKey, bytes: Vec<u8>) -> Result<Vec<Bar>, DataError> {
        decode_parquet(bytes).map_err(|e| {
            self.quarantine(key);
            DataError::Store(format!(
                "corrupt file {} quarantined: {e}",
                self.parquet_path(key).display()
            ))
        })
    }

    fn quarantine(&self, key: &SeriesKey) {
        let path = self.parquet_path(key);
        let target = path.with_extension("parquet.quarantined");
        warn!("quarantining corrupt file {}", path.display());
        if let Err(e) = fs::rename(&path, &target) {
            warn!("could not quarantine {}: {e}", path.display());
        }

        // The sidecar describes the quarantined data; it must not drive the next watermark.
        let meta = self.meta_path(key);
        if meta.exists() {
            if let Err(e) = fs::rename(&meta, meta.with_extension("json.quarantined")) {
                warn!("could not quarantine {}: {e}", meta.display());
            }
        }
    }

    /// Read the metadata sidecar for a series.
    pub fn get_meta(&self, key: &SeriesKey) -> Option<SeriesMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Timestamp of the newest stored bar (the watermark), if any.
    ///
    /// Uses the sidecar when it describes this series and its hash matches the
    /// data file. Otherwise the data file is decoded and its last bar wins.
    pub fn last_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>, DataError> {
        if !self.exists(key) {
            return Ok(None);
        }
        let bytes = read_file(&self.parquet_path(key))?;

        if let Some(meta) = self.get_meta(key) {
            if meta.describes(key) && meta.data_hash == hash_bytes(&bytes) {
                debug!("watermark for {key} from sidecar: {}", meta.last_time);
                return Ok(Some(meta.last_time));
            }
            warn!("sidecar for {key} does not match its data file, reading the data instead");
        }
        let bars = self.decode(key, bytes)?;
        Ok(bars.last().map(|b| b.time))
    }

    /// All series in the store that have a sidecar, sorted by provider, symbol, timeframe.
    pub fn status(&self) -> Result<Vec<SeriesStatus>, DataError> {
        let mut rows = Vec::new();
        if !self.data_dir.exists() {
            return Ok(rows);
        }

        for provider_dir in read_subdirs(&self.data_dir)? {
            for symbol_dir in read_subdirs(&provider_dir)? {
                let entries = fs::read_dir(&symbol_dir)
                    .map_err(|e| DataError::Store(format!("read dir: {e}")))?;
                for entry in entries.flatten() {
                    let path = entry.path();
                    let is_meta = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(".meta.json"));
                    if !is_meta {
                        continue;
                    }

                    let Some(meta) = fs::read_to_string(&path)
                        .ok()
                        .and_then(|c| serde_json::from_str::<SeriesMeta>(&c).ok())
                    else {
                        warn!("skipping unreadable sidecar {}", path.display());
                        continue;
                    };

                    let data_path = symbol_dir.join(format!(
                        "{}_{}_{}.parquet",
                        meta.provider, meta.symbol, meta.timeframe
                    ));
                    let size_bytes = fs::metadata(&data_path).map(|m| m.len()).unwrap_or(0);
                    rows.push(SeriesStatus {
                        meta,
                        path: data_path,
                        size_bytes,
                    });
                }
            }
        }

        rows.sort_by(|a, b| {
            (a.meta.provider, &a.meta.symbol, &a.meta.timeframe).cmp(&(
                b.meta.provider,
                &b.meta.symbol,
                &b.meta.timeframe,
            ))
        });
        Ok(rows)
    }
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    let entries = fs::read_dir(dir).map_err(|e| DataError::Store(format!("read dir: {e}")))?;
    Ok(entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}

fn read_file(path: &Path) -> Result<Vec<u8>, DataError> {
    fs::read(path).map_err(|e| DataError::Store(format!("failed to read {}: {e}", path.display())))
}

fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn hash_file(path: &Path) -> Result<String, DataError> {
    read_file(path).map(|bytes| hash_bytes(&bytes))
}

fn rename_into_place(tmp: &Path, target: &Path) -> Result<(), DataError> {
    fs::rename(tmp, target).map_err(|e| {
        let _ = fs::remove_file(tmp);
        DataError::Store(format!("atomic rename failed: {e}"))
    })
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Convert bars to a Polars DataFrame.
fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, DataError> {
    let times: Vec<i64> = bars.iter().map(|b| b.time.timestamp_millis()).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new(TIME_COLUMN.into(), times)
            .cast(&BarSchema::time_dtype())
            .map_err(|e| DataError::Parquet(format!("time cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// Decode Parquet bytes and validate their integrity.
fn decode_parquet(bytes: Vec<u8>) -> Result<Vec<Bar>, DataError> {
    let df = ParquetReader::new(std::io::Cursor::new(bytes))
        .finish()
        .map_err(|e| DataError::Parquet(format!("read: {e}")))?;

    BarSchema::validate(&df)?;
    let bars = dataframe_to_bars(&df)?;
    validate_series(&bars)?;
    Ok(bars)
}

/// Convert a DataFrame back to bars. Nulls are treated as corruption.
fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, DataError> {
    let map_err = |e: PolarsError| DataError::Parquet(format!("column read: {e}"));

    let times = df
        .column(TIME_COLUMN)
        .map_err(map_err)?
        .cast(&DataType::Int64)
        .map_err(map_err)?;
    let time_ca = times.i64().map_err(map_err)?;

    let value_column = |name: &str| -> Result<Vec<Option<f64>>, DataError> {
        let ca = df.column(name).map_err(map_err)?.f64().map_err(map_err)?;
        Ok(ca.into_iter().collect())
    };
    let opens = value_column("open")?;
    let highs = value_column("high")?;
    let lows = value_column("low")?;
    let closes = value_column("close")?;
    let volumes = value_column("volume")?;

    let null_at = |column: &str, row: usize| {
        DataError::Validation(format!("null {column} at row {row}"))
    };

    let mut bars = Vec::with_capacity(df.height());
    for (i, ms) in time_ca.into_iter().enumerate() {
        let ms = ms.ok_or_else(|| null_at(TIME_COLUMN, i))?;
        let time = DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| DataError::Validation(format!("time out of range at row {i}")))?;

        bars.push(Bar {
            time,
            open: opens[i].ok_or_else(|| null_at("open", i))?,
            high: highs[i].ok_or_else(|| null_at("high", i))?,
            low: lows[i].ok_or_else(|| null_at("low", i))?,
            close: closes[i].ok_or_else(|| null_at("close", i))?,
            volume: volumes[i].ok_or_else(|| null_at("volume", i))?,
        });
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::LogCapture;
    use crate::domain::TimeframeUnit;
    use chrono::TimeZone;

    fn key() -> SeriesKey {
        SeriesKey::new(
            ProviderKind::Massive,
            "EURUSD".parse().unwrap(),
            Timeframe::daily(),
        )
    }

    fn bar(day: u32, close: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            close - 0.001,
            close + 0.002,
            close - 0.002,
            close,
            0.0,
        )
    }

    fn sample_bars() -> Vec<Bar> {
        vec![bar(2, 1.0945), bar(3, 1.0921), bar(4, 1.0950)]
    }

    #[test]
    fn layout_follows_provider_symbol_timeframe() {
        let store = ParquetStore::new("data");
        let k = key();
        assert_eq!(
            store.parquet_path(&k),
            PathBuf::from("data/massive/EURUSD/massive_EURUSD_1day.parquet")
        );
        assert_eq!(
            store.meta_path(&k),
            PathBuf::from("data/massive/EURUSD/massive_EURUSD_1day.meta.json")
        );

        let hourly = SeriesKey::new(
            ProviderKind::TwelveData,
            "GBPJPY".parse().unwrap(),
            Timeframe::new(4, TimeframeUnit::Hour).unwrap(),
        );
        assert_eq!(hourly.file_name(), "twelve_data_GBPJPY_4hour.parquet");
    }

    #[test]
    fn write_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());

        store.write(&key(), &sample_bars()).unwrap();
        let loaded = store.load(&key()).unwrap();

        assert_eq!(loaded, sample_bars());
        assert!(!store
            .parquet_path(&key())
            .with_extension("parquet.tmp")
            .exists());
    }

    #[test]
    fn missing_series_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        assert!(store.load(&key()).unwrap().is_empty());
        assert_eq!(store.last_timestamp(&key()).unwrap(), None);
    }

    #[test]
    fn refuses_empty_and_unsorted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());

        assert!(matches!(store.write(&key(), &[]), Err(DataError::Store(_))));
        assert!(matches!(
            store.write(&key(), &[bar(3, 1.0), bar(2, 1.0)]),
            Err(DataError::Validation(_))
        ));
        assert!(!store.exists(&key()));
    }

    #[test]
    fn sidecar_tracks_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());

        let meta = store.write(&key(), &sample_bars()).unwrap();
        assert_eq!(meta.bar_count, 3);
        assert_eq!(meta.symbol, "EURUSD");
        assert_eq!(meta.timeframe, "1day");
        assert_eq!(store.get_meta(&key()), Some(meta));
        assert_eq!(
            store.last_timestamp(&key()).unwrap(),
            Some(bar(4, 0.0).time)
        );
    }

    #[test]
    fn watermark_falls_back_to_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());

        store.write(&key(), &sample_bars()).unwrap();
        fs::remove_file(store.meta_path(&key())).unwrap();

        assert_eq!(
            store.last_timestamp(&key()).unwrap(),
            Some(bar(4, 0.0).time)
        );
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());

        store.write(&key(), &sample_bars()).unwrap();
        let path = store.parquet_path(&key());
        fs::write(&path, b"definitely not parquet").unwrap();

        let err = store.load(&key()).unwrap_err();
        assert!(err.to_string().contains("quarantined"), "{err}");
        assert!(!path.exists());
        assert!(path.with_extension("parquet.quarantined").exists());
        assert_eq!(store.get_meta(&key()), None);
        assert_eq!(store.last_timestamp(&key()).unwrap(), None);
    }

    #[test]
    fn stale_sidecar_does_not_drive_the_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let path = store.parquet_path(&key());

        store.write(&key(), &sample_bars()).unwrap();
        let older = fs::read(&path).unwrap();
        store
            .write(&key(), &[bar(2, 1.0945), bar(3, 1.0921), bar(4, 1.0950), bar(5, 1.0962), bar(6, 1.0971)])
            .unwrap();

        // Data file rolled back underneath a sidecar that still says day 6.
        fs::write(&path, older).unwrap();
        assert_eq!(store.get_meta(&key()).unwrap().last_time, bar(6, 0.0).time);
        assert_eq!(
            store.last_timestamp(&key()).unwrap(),
            Some(bar(4, 0.0).time)
        );
    }

    #[test]
    fn sidecar_of_another_series_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let gbp = SeriesKey::new(
            ProviderKind::Massive,
            "GBPUSD".parse().unwrap(),
            Timeframe::daily(),
        );

        store.write(&key(), &sample_bars()[..2]).unwrap();
        store.write(&gbp, &sample_bars()).unwrap();
        fs::copy(store.meta_path(&gbp), store.meta_path(&key())).unwrap();

        assert_eq!(
            store.last_timestamp(&key()).unwrap(),
            Some(bar(3, 0.0).time)
        );
    }

    #[test]
    fn unreadable_file_is_reported_not_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let path = store.parquet_path(&key());
        fs::create_dir_all(&path).unwrap();

        let err = store.load(&key()).unwrap_err();
        assert!(matches!(err, DataError::Store(_)));
        assert!(!err.to_string().contains("quarantined"), "{err}");
        assert!(path.is_dir());
        assert!(!path.with_extension("parquet.quarantined").exists());
        assert!(store.last_timestamp(&key()).is_err());
    }

    #[test]
    fn failed_sidecar_quarantine_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());

        store.write(&key(), &sample_bars()).unwrap();
        let path = store.parquet_path(&key());
        fs::write(&path, b"definitely not parquet").unwrap();
        // A non-empty directory in the way makes the sidecar rename fail.
        let blocked = store.meta_path(&key()).with_extension("json.quarantined");
        fs::create_dir_all(blocked.join("occupied")).unwrap();

        let logs = LogCapture::default();
        let err = logs.run(|| store.load(&key()).unwrap_err());

        assert!(err.to_string().contains("quarantined"), "{err}");
        assert!(path.with_extension("parquet.quarantined").exists());
        let output = logs.contents();
        assert!(output.contains("could not quarantine"), "{output}");
        assert!(output.contains(".meta.json"), "{output}");
    }

    #[test]
    fn status_lists_series_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());

        let gbp = SeriesKey::new(
            ProviderKind::Massive,
            "GBPUSD".parse().unwrap(),
            Timeframe::daily(),
        );
        let alpha = SeriesKey::new(
            ProviderKind::AlphaVantage,
            "EURUSD".parse().unwrap(),
            Timeframe::daily(),
        );
        store.write(&gbp, &sample_bars()).unwrap();
        store.write(&key(), &sample_bars()).unwrap();
        store.write(&alpha, &sample_bars()[..1]).unwrap();

        let rows = store.status().unwrap();
        let names: Vec<_> = rows
            .iter()
            .map(|r| format!("{}/{}", r.meta.provider, r.meta.symbol))
            .collect();
        assert_eq!(
            names,
            vec!["alpha_vantage/EURUSD", "massive/EURUSD", "massive/GBPUSD"]
        );
        assert!(rows.iter().all(|r| r.size_bytes > 0));
        assert_eq!(rows[0].meta.bar_count, 1);
    }

    #[test]
    fn status_of_missing_dir_is_empty() {
        let store = ParquetStore::new("/nonexistent/finloader/data");
        assert!(store.status().unwrap().is_empty());
    }
}
