//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over the market data APIs (Alpha Vantage,
//! Massive, Twelve Data) so the download orchestrator can swap implementations
//! and tests can script responses without a network.

use crate::config::Settings;
use crate::domain::{Bar, ForexSymbol, SymbolError, Timeframe, TimeframeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::alpha_vantage::AlphaVantageProvider;
use super::circuit_breaker::CircuitBreaker;
use super::massive::MassiveProvider;
use super::twelve_data::TwelveDataProvider;

/// Structured error types for data operations.
///
/// Each variant knows whether retrying the same request can help
/// (see [`DataError::is_transient`]).
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("{provider}: temporary rate-limited")]
    TemporaryRateLimit { provider: String },

    #[error("{provider}: daily rate-limited")]
    DailyRateLimit { provider: String },

    #[error("{provider}: server error (HTTP {status})")]
    ServerError { provider: String, status: u16 },

    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("{provider}: timeframe '{timeframe}' is not supported by free API")]
    UnsupportedTimeframe {
        provider: String,
        timeframe: Timeframe,
    },

    #[error(transparent)]
    InvalidSymbol(#[from] SymbolError),

    #[error(transparent)]
    InvalidTimeframe(#[from] TimeframeError),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("missing API key: set {var} (environment or .env)")]
    MissingApiKey { var: &'static str },

    #[error("hard stop: {provider} has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped { provider: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<DataError> },
}

impl DataError {
    /// True if the same request may succeed after waiting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TemporaryRateLimit { .. } | Self::Timeout(_) | Self::ServerError { .. }
        )
    }

    /// True for either flavour of provider rate limit, including an exhausted retry loop
    /// whose last failure was a rate limit.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::TemporaryRateLimit { .. } | Self::DailyRateLimit { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_rate_limit(),
            _ => false,
        }
    }

    pub(crate) fn provider(provider: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// The supported market data APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    AlphaVantage,
    Massive,
    TwelveData,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::AlphaVantage, Self::Massive, Self::TwelveData];

    /// Name used on the command line, in the config file and as the storage directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlphaVantage => "alpha_vantage",
            Self::Massive => "massive",
            Self::TwelveData => "twelve_data",
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::AlphaVantage => "ALPHA_VANTAGE_API_KEY",
            Self::Massive => "MASSIVE_API_KEY",
            Self::TwelveData => "TWELVE_DATA_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::AlphaVantage => "https://www.alphavantage.co",
            Self::Massive => "https://api.massive.com",
            Self::TwelveData => "https://api.twelvedata.com",
        }
    }

    /// First backoff delay in seconds. Massive and Twelve Data reset their
    /// per-minute quotas, so waiting less than a minute rarely helps.
    pub fn default_base_delay_secs(&self) -> u64 {
        match self {
            Self::AlphaVantage => 20,
            Self::Massive | Self::TwelveData => 60,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// Result of a successful fetch for a single series.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: ForexSymbol,
    pub timeframe: Timeframe,
    /// Sorted ascending, unique timestamps. May be empty when nothing new was published.
    pub bars: Vec<Bar>,
    pub provider: ProviderKind,
}

/// Trait for market data providers.
///
/// Implementations own request building, retries and response normalization.
/// Providers never touch the store.
pub trait DataProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Human-readable name of this provider.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Fail early if this provider cannot serve `timeframe`.
    fn supports(&self, timeframe: &Timeframe) -> Result<(), DataError>;

    /// Fetch all bars from `start` (UTC, inclusive where the API allows) to now.
    fn fetch(
        &self,
        symbol: &ForexSymbol,
        timeframe: &Timeframe,
        start: DateTime<Utc>,
    ) -> Result<FetchResult, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Build the provider for `kind`, reading its API key from the environment.
pub fn build_provider(
    kind: ProviderKind,
    settings: &Settings,
) -> Result<Box<dyn DataProvider>, DataError> {
    let var = kind.api_key_var();
    let api_key = std::env::var(var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or(DataError::MissingApiKey { var })?;

    let provider_settings = settings.provider(kind);
    let breaker = Arc::new(CircuitBreaker::new(provider_settings.breaker_cooldown));

    let provider: Box<dyn DataProvider> = match kind {
        ProviderKind::AlphaVantage => Box::new(AlphaVantageProvider::new(
            api_key,
            &provider_settings,
            breaker,
        )?),
        ProviderKind::Massive => Box::new(MassiveProvider::new(
            api_key,
            &provider_settings,
            breaker,
        )?),
        ProviderKind::TwelveData => Box::new(TwelveDataProvider::new(
            api_key,
            &provider_settings,
            breaker,
        )?),
    };
    Ok(provider)
}

/// Progress callback for multi-symbol operations.
pub trait DownloadProgress: Send {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, symbol: &ForexSymbol, index: usize, total: usize);

    /// Called when a symbol fetch completes.
    fn on_complete(
        &self,
        symbol: &ForexSymbol,
        index: usize,
        total: usize,
        result: &Result<super::download::DownloadOutcome, DataError>,
    );

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that writes through `tracing`.
pub struct LogProgress;

impl DownloadProgress for LogProgress {
    fn on_start(&self, symbol: &ForexSymbol, index: usize, total: usize) {
        info!("[{}/{}] {symbol}", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &ForexSymbol,
        _index: usize,
        _total: usize,
        result: &Result<super::download::DownloadOutcome, DataError>,
    ) {
        // Failures are logged by the batch loop, which knows the timeframe.
        if let Ok(outcome) = result {
            debug!("{symbol}: {outcome:?}");
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        info!("Download complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}
