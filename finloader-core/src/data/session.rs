//! Per-provider request context: HTTP client, key, retry policy and breaker.

use super::circuit_breaker::CircuitBreaker;
use super::http::{HttpClient, HttpResponse};
use super::provider::DataError;
use super::retry::RetryPolicy;
use crate::config::ProviderSettings;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub(crate) struct ApiSession {
    name: &'static str,
    http: HttpClient,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ApiSession {
    pub fn new(
        name: &'static str,
        api_key: String,
        settings: &ProviderSettings,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        Ok(Self {
            name,
            http: HttpClient::new(name, settings.timeout)?,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            retry: settings.retry,
            breaker,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// `path` must start with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpResponse, DataError> {
        self.http.get(url, query)
    }

    pub fn is_available(&self) -> bool {
        self.breaker.is_allowed()
    }

    /// Run one logical request under the retry policy and the circuit breaker.
    pub fn call<T, F>(&self, label: &str, op: F) -> Result<T, DataError>
    where
        F: FnMut() -> Result<T, DataError>,
    {
        self.call_with_sleep(label, op, std::thread::sleep)
    }

    pub fn call_with_sleep<T, F, S>(&self, label: &str, mut op: F, sleep: S) -> Result<T, DataError>
    where
        F: FnMut() -> Result<T, DataError>,
        S: FnMut(Duration),
    {
        let tripped = || DataError::CircuitBreakerTripped {
            provider: self.name.to_string(),
        };
        if !self.breaker.is_allowed() {
            return Err(tripped());
        }

        let result = self.retry.run_with_sleep(
            label,
            |_| {
                if !self.breaker.is_allowed() {
                    return Err(tripped());
                }
                op()
            },
            sleep,
        );

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(DataError::DailyRateLimit { .. }) => {
                warn!("{}: daily quota used up, blocking further requests", self.name);
                self.breaker.trip();
            }
            Err(DataError::RetriesExhausted { .. }) => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn session(threshold: u32) -> ApiSession {
        let settings = ProviderSettings {
            base_url: "http://localhost/".into(),
            timeout: Duration::from_secs(1),
            retry: RetryPolicy::immediate(2),
            breaker_cooldown: Duration::from_secs(60),
        };
        let breaker = Arc::new(CircuitBreaker::with_threshold(Duration::from_secs(60), threshold));
        ApiSession::new("test", "key".into(), &settings, breaker).unwrap()
    }

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(session(3).url("/query"), "http://localhost/query");
    }

    #[test]
    fn daily_limit_trips_breaker() {
        let s = session(3);
        let err = s
            .call::<(), _>("EURUSD", || {
                Err(DataError::DailyRateLimit {
                    provider: "test".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, DataError::DailyRateLimit { .. }));
        assert!(!s.is_available());

        let calls = Cell::new(0);
        let err = s
            .call("GBPUSD", || {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, DataError::CircuitBreakerTripped { .. }));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn exhausted_retries_count_towards_threshold() {
        let s = session(2);
        let timeout = || Err::<(), _>(DataError::Timeout("slow".into()));

        assert!(matches!(
            s.call_with_sleep("EURUSD", timeout, |_| {}),
            Err(DataError::RetriesExhausted { attempts: 2, .. })
        ));
        assert!(s.is_available());
        assert!(s.call_with_sleep("GBPUSD", timeout, |_| {}).is_err());
        assert!(!s.is_available());
    }

    #[test]
    fn success_passes_value_through() {
        let s = session(3);
        assert_eq!(s.call("EURUSD", || Ok(7)).unwrap(), 7);
        assert!(s.is_available());
    }
}
