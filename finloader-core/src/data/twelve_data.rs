//! Twelve Data time series provider.
//!
//! A request returns at most [`OUTPUT_SIZE`] bars, the newest first. Longer
//! gaps are filled by walking backwards: each follow-up request ends at the
//! oldest bar received so far.

use super::canonicalize::canonicalize;
use super::circuit_breaker::CircuitBreaker;
use super::http::HttpResponse;
use super::normalize::{bars_from_csv, CsvLayout};
use super::provider::{DataError, DataProvider, FetchResult, ProviderKind};
use super::session::ApiSession;
use crate::config::ProviderSettings;
use crate::domain::{Bar, ForexSymbol, Timeframe, TimeframeUnit};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const NAME: &str = "twelve_data";

/// Maximum number of bars per request on the free plan.
const OUTPUT_SIZE: u32 = 5000;

const CSV_LAYOUT: CsvLayout = CsvLayout {
    delimiter: b';',
    time_column: "datetime",
};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
}

pub struct TwelveDataProvider {
    session: ApiSession,
}

impl TwelveDataProvider {
    pub fn new(
        api_key: String,
        settings: &ProviderSettings,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        Ok(Self {
            session: ApiSession::new(NAME, api_key, settings, breaker)?,
        })
    }

    fn interval(timeframe: &Timeframe) -> Result<String, DataError> {
        let unit = match timeframe.unit() {
            TimeframeUnit::Minute => "min",
            TimeframeUnit::Hour => "h",
            TimeframeUnit::Day => "day",
            TimeframeUnit::Week => "week",
            TimeframeUnit::Month => "month",
            TimeframeUnit::Second => {
                return Err(DataError::UnsupportedTimeframe {
                    provider: NAME.into(),
                    timeframe: *timeframe,
                })
            }
        };
        Ok(format!("{}{unit}", timeframe.length()))
    }

    fn fetch_once(
        &self,
        symbol: &ForexSymbol,
        interval: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, DataError> {
        let mut query = vec![
            ("symbol", symbol.slashed()),
            ("interval", interval.to_string()),
            ("start_date", format_date(start)),
        ];
        if let Some(end) = end {
            query.push(("end_date", format_date(end)));
        }
        query.extend([
            ("timezone", "UTC".to_string()),
            ("format", "CSV".to_string()),
            ("outputsize", OUTPUT_SIZE.to_string()),
            ("apikey", self.session.api_key().to_string()),
        ]);
        let resp = self.session.get(&self.session.url("/time_series"), &query)?;
        parse_response(&resp)
    }
}

fn format_date(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// End of the next request, or `None` once the window back to `start` is covered.
///
/// `page` is sorted ascending. Only a full page can hide older bars.
fn next_page_end(
    page: &[Bar],
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    if page.len() < OUTPUT_SIZE as usize {
        return None;
    }
    let oldest = page.first()?.time;
    if oldest <= start || end.is_some_and(|end| oldest >= end) {
        return None;
    }
    Some(oldest)
}

fn parse_response(resp: &HttpResponse) -> Result<Vec<Bar>, DataError> {
    if !resp.is_json() {
        return bars_from_csv(&resp.body, CSV_LAYOUT);
    }

    let body: ErrorBody = serde_json::from_str(&resp.body)
        .map_err(|e| DataError::ResponseFormatChanged(format!("{NAME}: {e}")))?;
    match body.code {
        // No data is available on the requested dates.
        Some(400) => Ok(Vec::new()),
        Some(429) => Err(DataError::TemporaryRateLimit {
            provider: NAME.into(),
        }),
        code => Err(DataError::provider(
            NAME,
            body.message
                .unwrap_or_else(|| format!("unhandled error code {code:?}")),
        )),
    }
}

impl DataProvider for TwelveDataProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::TwelveData
    }

    fn supports(&self, timeframe: &Timeframe) -> Result<(), DataError> {
        Self::interval(timeframe).map(|_| ())
    }

    fn fetch(
        &self,
        symbol: &ForexSymbol,
        timeframe: &Timeframe,
        start: DateTime<Utc>,
    ) -> Result<FetchResult, DataError> {
        let interval = Self::interval(timeframe)?;
        info!("Calling {NAME} API for: {symbol} ({timeframe})");

        let label = format!("{symbol} ({timeframe})");
        let mut end = None;
        let mut bars = Vec::new();

        loop {
            let page = self
                .session
                .call(&label, || self.fetch_once(symbol, &interval, start, end))?;
            let next = next_page_end(&page, start, end);
            bars.extend(page);

            match next {
                Some(next) => {
                    debug!("{label}: full page, continuing before {next}");
                    end = Some(next);
                }
                None => break,
            }
        }

        Ok(FetchResult {
            symbol: symbol.clone(),
            timeframe: *timeframe,
            bars: canonicalize(bars),
            provider: ProviderKind::TwelveData,
        })
    }

    fn is_available(&self) -> bool {
        self.session.is_available()
    }
}
