//! Data layer: provider clients, retry, merge and Parquet storage.

pub mod alpha_vantage;
pub mod canonicalize;
pub mod circuit_breaker;
pub mod download;
pub mod groups;
pub mod http;
pub mod massive;
pub mod merge;
pub mod normalize;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod store;
pub mod twelve_data;

pub(crate) mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use circuit_breaker::CircuitBreaker;
pub use download::{default_start, is_stale, DownloadOutcome, DownloadSummary, Downloader};
pub use groups::{Groups, SymbolGroup};
pub use merge::{merge, MergeOutcome};
pub use provider::{
    build_provider, DataError, DataProvider, DownloadProgress, FetchResult, LogProgress,
    ProviderKind,
};
pub use retry::RetryPolicy;
pub use schema::BarSchema;
pub use store::{ParquetStore, SeriesKey, SeriesMeta, SeriesStatus};
