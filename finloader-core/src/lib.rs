//! finloader core: incremental forex market-data downloads into Parquet.
//!
//! - Domain types (forex symbols, timeframes, bars)
//! - Provider clients for Alpha Vantage, Massive and Twelve Data
//! - Retry with backoff and a per-provider circuit breaker
//! - Watermark-based incremental fetch, merge and atomic Parquet writes

pub mod config;
pub mod data;
pub mod domain;
