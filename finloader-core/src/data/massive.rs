//! Massive (formerly Polygon.io) aggregates provider.
//!
//! Currency pairs are addressed as `C:{BASE}{QUOTE}`. Large ranges are split
//! by the API into pages linked through `next_url`.

use super::canonicalize::canonicalize;
use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataProvider, FetchResult, ProviderKind};
use super::session::ApiSession;
use crate::config::ProviderSettings;
use crate::domain::{Bar, ForexSymbol, Timeframe, TimeframeUnit};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const NAME: &str = "massive";

/// Largest page the aggregates endpoint hands out.
const PAGE_LIMIT: u32 = 50_000;

#[derive(Debug, Deserialize)]
struct AggsResponse {
    status: Option<String>,
    error: Option<String>,
    message: Option<String>,
    #[serde(default)]
    results: Vec<Agg>,
    next_url: Option<String>,
}

/// One aggregate bar. `vw` (VWAP) and `n` (trade count) are ignored.
#[derive(Debug, Deserialize)]
struct Agg {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: Option<f64>,
}

#[derive(Debug, Default)]
struct Page {
    bars: Vec<Bar>,
    next_url: Option<String>,
}

pub struct MassiveProvider {
    session: ApiSession,
}

impl MassiveProvider {
    pub fn new(
        api_key: String,
        settings: &ProviderSettings,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        Ok(Self {
            session: ApiSession::new(NAME, api_key, settings, breaker)?,
        })
    }

    fn timespan(timeframe: &Timeframe) -> Result<&'static str, DataError> {
        match timeframe.unit() {
            TimeframeUnit::Day => Ok("day"),
            TimeframeUnit::Week => Ok("week"),
            TimeframeUnit::Month => Ok("month"),
            _ => Err(DataError::UnsupportedTimeframe {
                provider: NAME.into(),
                timeframe: *timeframe,
            }),
        }
    }

    fn aggs_path(
        symbol: &ForexSymbol,
        timeframe: &Timeframe,
        timespan: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> String {
        format!(
            "/v2/aggs/ticker/C:{}{}/range/{}/{timespan}/{}/{}",
            symbol.base(),
            symbol.quote(),
            timeframe.length(),
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        )
    }

    fn fetch_page(&self, url: &str, first: bool) -> Result<Page, DataError> {
        let mut query = vec![("apiKey", self.session.api_key().to_string())];
        // next_url already carries the first query plus a cursor.
        if first {
            query.extend([
                ("adjusted", "true".to_string()),
                ("sort", "asc".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ]);
        }
        let resp = self.session.get(url, &query)?;
        parse_page(&resp.body)
    }
}

fn parse_page(body: &str) -> Result<Page, DataError> {
    let resp: AggsResponse = serde_json::from_str(body)
        .map_err(|e| DataError::ResponseFormatChanged(format!("{NAME}: {e}")))?;

    match resp.status.as_deref() {
        Some("ERROR") | Some("NOT_AUTHORIZED") => {
            let message = resp
                .error
                .or(resp.message)
                .unwrap_or_else(|| "data not downloaded".into());
            return Err(DataError::provider(NAME, message));
        }
        _ => {}
    }

    let bars = resp
        .results
        .into_iter()
        .map(|agg| {
            let time = DateTime::from_timestamp_millis(agg.t).ok_or_else(|| {
                DataError::ResponseFormatChanged(format!("{NAME}: invalid timestamp {}", agg.t))
            })?;
            Ok(Bar::new(time, agg.o, agg.h, agg.l, agg.c, agg.v.unwrap_or(0.0)))
        })
        .collect::<Result<Vec<_>, DataError>>()?;

    Ok(Page {
        bars,
        next_url: resp.next_url.filter(|u| !u.is_empty()),
    })
}

impl DataProvider for MassiveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Massive
    }

    fn supports(&self, timeframe: &Timeframe) -> Result<(), DataError> {
        Self::timespan(timeframe).map(|_| ())
    }

    fn fetch(
        &self,
        symbol: &ForexSymbol,
        timeframe: &Timeframe,
        start: DateTime<Utc>,
    ) -> Result<FetchResult, DataError> {
        let timespan = Self::timespan(timeframe)?;
        info!("Calling {NAME} API for: {symbol} ({timeframe})");

        let label = format!("{symbol} ({timeframe})");
        let path = Self::aggs_path(symbol, timeframe, timespan, start, Utc::now());
        let mut url = self.session.url(&path);
        let mut first = true;
        let mut bars = Vec::new();

        loop {
            let page = self
                .session
                .call(&label, || self.fetch_page(&url, first))?;
            debug!("{label}: page with {} bars", page.bars.len());
            bars.extend(page.bars);

            match page.next_url {
                Some(next) => {
                    url = next;
                    first = false;
                }
                None => break,
            }
        }

        Ok(FetchResult {
            symbol: symbol.clone(),
            timeframe: *timeframe,
            bars: canonicalize(bars),
            provider: ProviderKind::Massive,
        })
    }

    fn is_available(&self) -> bool {
        self.session.is_available()
    }
}
