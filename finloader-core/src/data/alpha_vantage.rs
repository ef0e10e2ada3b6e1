//! Alpha Vantage FX provider.
//!
//! The free API only offers daily, weekly and monthly FX series. Data comes
//! back as CSV; errors and rate-limit notices come back as a JSON envelope
//! with a 200 status.

use super::circuit_breaker::CircuitBreaker;
use super::http::HttpResponse;
use super::normalize::{bars_from_csv, CsvLayout};
use super::provider::{DataError, DataProvider, FetchResult, ProviderKind};
use super::session::ApiSession;
use crate::config::ProviderSettings;
use crate::domain::{Bar, ForexSymbol, Timeframe, TimeframeUnit};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const NAME: &str = "alpha_vantage";

/// A start older than this needs the full history instead of the last 100 bars.
const FULL_HISTORY_AFTER_DAYS: i64 = 90;

const CSV_LAYOUT: CsvLayout = CsvLayout {
    delimiter: b',',
    time_column: "timestamp",
};

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
}

pub struct AlphaVantageProvider {
    session: ApiSession,
}

impl AlphaVantageProvider {
    pub fn new(
        api_key: String,
        settings: &ProviderSettings,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        Ok(Self {
            session: ApiSession::new(NAME, api_key, settings, breaker)?,
        })
    }

    fn function(timeframe: &Timeframe) -> Result<&'static str, DataError> {
        match timeframe.unit() {
            TimeframeUnit::Day => Ok("FX_DAILY"),
            TimeframeUnit::Week => Ok("FX_WEEKLY"),
            TimeframeUnit::Month => Ok("FX_MONTHLY"),
            _ => Err(DataError::UnsupportedTimeframe {
                provider: NAME.into(),
                timeframe: *timeframe,
            }),
        }
    }

    fn output_size(start: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
        if now - start >= Duration::days(FULL_HISTORY_AFTER_DAYS) {
            "full"
        } else {
            "compact"
        }
    }

    fn fetch_once(
        &self,
        symbol: &ForexSymbol,
        function: &'static str,
        start: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError> {
        let output_size = Self::output_size(start, Utc::now());
        debug!("using outputsize={output_size}");

        let query = [
            ("from_symbol", symbol.base().to_string()),
            ("to_symbol", symbol.quote().to_string()),
            ("function", function.to_string()),
            ("outputsize", output_size.to_string()),
            ("datatype", "csv".to_string()),
            ("apikey", self.session.api_key().to_string()),
        ];
        let resp = self.session.get(&self.session.url("/query"), &query)?;
        parse_response(&resp, start)
    }
}

/// Turn a 2xx response into bars at or after `start`.
fn parse_response(resp: &HttpResponse, start: DateTime<Utc>) -> Result<Vec<Bar>, DataError> {
    if resp.is_json() {
        return Err(classify_json(&resp.body));
    }
    let mut bars = bars_from_csv(&resp.body, CSV_LAYOUT)?;
    bars.retain(|b| b.time >= start);
    Ok(bars)
}

fn classify_json(body: &str) -> DataError {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return DataError::provider(NAME, body.trim());
    };

    if let Some(message) = envelope.error_message {
        return DataError::provider(NAME, message);
    }
    match envelope.information.or(envelope.note) {
        Some(info) if info.to_ascii_lowercase().contains("per day") => DataError::DailyRateLimit {
            provider: NAME.into(),
        },
        Some(_) => DataError::TemporaryRateLimit {
            provider: NAME.into(),
        },
        None => DataError::provider(NAME, body.trim()),
    }
}

impl DataProvider for AlphaVantageProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AlphaVantage
    }

    fn supports(&self, timeframe: &Timeframe) -> Result<(), DataError> {
        Self::function(timeframe).map(|_| ())
    }

    fn fetch(
        &self,
        symbol: &ForexSymbol,
        timeframe: &Timeframe,
        start: DateTime<Utc>,
    ) -> Result<FetchResult, DataError> {
        let function = Self::function(timeframe)?;
        info!("Calling {NAME} API for: {symbol} ({timeframe})");

        let label = format!("{symbol} ({timeframe})");
        let bars = self
            .session
            .call(&label, || self.fetch_once(symbol, function, start))?;

        Ok(FetchResult {
            symbol: symbol.clone(),
            timeframe: *timeframe,
            bars,
            provider: ProviderKind::AlphaVantage,
        })
    }

    fn is_available(&self) -> bool {
        self.session.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tf(length: u32, unit: TimeframeUnit) -> Timeframe {
        Timeframe::new(length, unit).unwrap()
    }

    fn csv(body: &str) -> HttpResponse {
        HttpResponse {
            content_type: "application/x-download".into(),
            body: body.into(),
        }
    }

    fn json(body: &str) -> HttpResponse {
        HttpResponse {
            content_type: "application/json".into(),
            body: body.into(),
        }
    }

    #[test]
    fn maps_timeframes_to_functions() {
        assert_eq!(
            AlphaVantageProvider::function(&Timeframe::daily()).unwrap(),
            "FX_DAILY"
        );
        assert_eq!(
            AlphaVantageProvider::function(&tf(1, TimeframeUnit::Week)).unwrap(),
            "FX_WEEKLY"
        );
        assert_eq!(
            AlphaVantageProvider::function(&tf(1, TimeframeUnit::Month)).unwrap(),
            "FX_MONTHLY"
        );

        let err = AlphaVantageProvider::function(&tf(4, TimeframeUnit::Hour)).unwrap_err();
        assert!(matches!(err, DataError::UnsupportedTimeframe { .. }));
        assert!(err.to_string().contains("not supported by free API"));
    }

    #[test]
    fn output_size_depends_on_start_age() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(AlphaVantageProvider::output_size(now - Duration::days(90), now), "full");
        assert_eq!(AlphaVantageProvider::output_size(now - Duration::days(89), now), "compact");
    }

    #[test]
    fn parses_csv_newest_first_and_drops_old_bars() {
        let body = "timestamp,open,high,low,close\n\
                    2024-02-16,1.0760,1.0790,1.0740,1.0775\n\
                    2024-02-15,1.0730,1.0770,1.0720,1.0760\n\
                    2024-02-14,1.0710,1.0740,1.0700,1.0730\n";
        let start = Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap();
        let bars = parse_response(&csv(body), start).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, start);
        assert_eq!(bars[1].close, 1.0775);
        assert!(bars.iter().all(|b| b.volume == 0.0));
    }

    #[test]
    fn classifies_json_envelopes() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let daily = json(
            r#"{"Information": "We have detected your API key as XYZ and our standard API rate limit is 25 requests per day."}"#,
        );
        assert!(matches!(
            parse_response(&daily, start),
            Err(DataError::DailyRateLimit { .. })
        ));

        let burst = json(
            r#"{"Information": "Please consider spreading out your free API requests more sparingly (1 request per second)."}"#,
        );
        assert!(matches!(
            parse_response(&burst, start),
            Err(DataError::TemporaryRateLimit { .. })
        ));

        let note = json(r#"{"Note": "Thank you for using Alpha Vantage!"}"#);
        assert!(matches!(
            parse_response(&note, start),
            Err(DataError::TemporaryRateLimit { .. })
        ));

        let invalid = json(r#"{"Error Message": "Invalid API call."}"#);
        let err = parse_response(&invalid, start).unwrap_err();
        assert_eq!(err.to_string(), "alpha_vantage: Invalid API call.");

        let other = json(r#"{"foo": 1}"#);
        assert!(matches!(
            parse_response(&other, start),
            Err(DataError::Provider { .. })
        ));
    }
}
