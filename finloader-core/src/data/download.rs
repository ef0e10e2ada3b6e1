//! Download orchestrator: incremental fetch, merge and persist.
//!
//! Each series is fetched from its watermark (the newest stored bar) and the
//! result is merged into the stored file. Multi-symbol downloads are
//! sequential and stop hitting the API once the provider's breaker opens.

use super::canonicalize::{detect_anomalies, Severity};
use super::merge::merge;
use super::provider::{DataError, DataProvider, DownloadProgress};
use super::schema::validate_series;
use super::store::{ParquetStore, SeriesKey};
use crate::domain::{ForexSymbol, Timeframe};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

/// 2000-01-01T00:00:00Z, where a series with no stored data starts.
pub const DEFAULT_START_SECS: i64 = 946_684_800;

pub fn default_start() -> DateTime<Utc> {
    DateTime::from_timestamp(DEFAULT_START_SECS, 0).unwrap_or_default()
}

/// Whether a series whose newest bar is `latest` needs fetching at `now`.
///
/// Daily and longer timeframes compare against midnight UTC of `now`, so a
/// series is not refetched just because the current day has started.
pub fn is_stale(latest: DateTime<Utc>, timeframe: &Timeframe, now: DateTime<Utc>) -> bool {
    let reference = if timeframe.is_intraday() {
        now
    } else {
        let midnight = now.date_naive().and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        midnight.unwrap_or(now)
    };
    let age = reference - latest;
    debug!("last bar {latest}, reference {reference}, age {age}");
    age > timeframe.duration()
}

/// What happened to one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Nothing new was published since the watermark.
    UpToDate,
    /// The merged series was written.
    Saved {
        added: usize,
        replaced: usize,
        total: usize,
    },
}

pub struct Downloader<'a> {
    provider: &'a dyn DataProvider,
    store: &'a ParquetStore,
}

impl<'a> Downloader<'a> {
    pub fn new(provider: &'a dyn DataProvider, store: &'a ParquetStore) -> Self {
        Self { provider, store }
    }

    pub fn download(
        &self,
        symbol: &ForexSymbol,
        timeframe: &Timeframe,
    ) -> Result<DownloadOutcome, DataError> {
        self.download_at(symbol, timeframe, Utc::now())
    }

    /// Bring one series up to date as of `now`.
    pub fn download_at(
        &self,
        symbol: &ForexSymbol,
        timeframe: &Timeframe,
        now: DateTime<Utc>,
    ) -> Result<DownloadOutcome, DataError> {
        self.provider.supports(timeframe)?;

        let key = SeriesKey::new(self.provider.kind(), symbol.clone(), *timeframe);
        let file = key.file_name();

        let watermark = match self.store.last_timestamp(&key)? {
            Some(latest) => {
                if !is_stale(latest, timeframe, now) {
                    info!("'{file}' is up to date");
                    return Ok(DownloadOutcome::UpToDate);
                }
                latest
            }
            None => default_start(),
        };
        debug!("{key}: fetching from {watermark}");

        let fetched = self.provider.fetch(symbol, timeframe, watermark)?;
        if fetched.bars.is_empty() {
            info!("'{file}' is up to date");
            return Ok(DownloadOutcome::UpToDate);
        }

        for anomaly in detect_anomalies(&fetched.bars) {
            match anomaly.severity {
                Severity::Warning => warn!(
                    "{key}: {} bars flagged as {:?}",
                    anomaly.count, anomaly.anomaly_type
                ),
                Severity::Info => debug!(
                    "{key}: {} bars flagged as {:?}",
                    anomaly.count, anomaly.anomaly_type
                ),
            }
        }

        let existing = self.store.load(&key)?;
        let merged = merge(&existing, &fetched.bars);
        if merged.is_unchanged() {
            info!("'{file}' is up to date");
            return Ok(DownloadOutcome::UpToDate);
        }
        validate_series(&merged.bars)?;

        self.store.write(&key, &merged.bars)?;
        info!("Save '{file}' ({} bars added)", merged.added);

        Ok(DownloadOutcome::Saved {
            added: merged.added,
            replaced: merged.replaced,
            total: merged.bars.len(),
        })
    }

    /// Download every symbol in turn. Failures are recorded and the batch
    /// continues, unless the provider stops accepting requests.
    pub fn download_many(
        &self,
        symbols: &[ForexSymbol],
        timeframe: &Timeframe,
        progress: &dyn DownloadProgress,
    ) -> DownloadSummary {
        self.download_many_at(symbols, timeframe, progress, Utc::now())
    }

    pub fn download_many_at(
        &self,
        symbols: &[ForexSymbol],
        timeframe: &Timeframe,
        progress: &dyn DownloadProgress,
        now: DateTime<Utc>,
    ) -> DownloadSummary {
        let total = symbols.len();
        let mut summary = DownloadSummary {
            total,
            ..DownloadSummary::default()
        };

        for (i, symbol) in symbols.iter().enumerate() {
            progress.on_start(symbol, i, total);

            let result = self.download_at(symbol, timeframe, now);
            progress.on_complete(symbol, i, total, &result);

            match result {
                Ok(DownloadOutcome::UpToDate) => summary.up_to_date += 1,
                Ok(DownloadOutcome::Saved { .. }) => summary.saved += 1,
                Err(e) => {
                    warn!("'{symbol}' ({timeframe}) was not downloaded: {e}");
                    summary.errors.push((symbol.clone(), e));
                    summary.failed += 1;
                }
            }

            // Bail out early if circuit breaker tripped
            if !self.provider.is_available() {
                for rest in &symbols[i + 1..] {
                    summary.errors.push((
                        rest.clone(),
                        DataError::CircuitBreakerTripped {
                            provider: self.provider.name().to_string(),
                        },
                    ));
                    summary.failed += 1;
                }
                break;
            }
        }

        progress.on_batch_complete(summary.up_to_date + summary.saved, summary.failed, total);
        summary
    }
}

/// Summary of a batch download operation.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub total: usize,
    pub up_to_date: usize,
    pub saved: usize,
    pub failed: usize,
    pub errors: Vec<(ForexSymbol, DataError)>,
}

impl DownloadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
