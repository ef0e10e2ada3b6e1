//! Blocking HTTP plumbing shared by the providers.
//!
//! Transport failures and HTTP status codes are mapped onto [`DataError`]
//! here, so each provider only has to deal with its own response bodies.

use super::provider::DataError;
use std::time::Duration;
use tracing::debug;

/// A response whose status was 2xx.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub content_type: String,
    pub body: String,
}

impl HttpResponse {
    /// Providers that normally answer in CSV switch to JSON to report errors.
    pub fn is_json(&self) -> bool {
        self.content_type.to_ascii_lowercase().contains("json")
    }
}

pub struct HttpClient {
    client: reqwest::blocking::Client,
    provider: &'static str,
}

impl HttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> Result<Self, DataError> {
        let builder = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("finloader/", env!("CARGO_PKG_VERSION")));
        // Unit tests talk to a loopback server; a proxy from the environment must not intercept.
        #[cfg(test)]
        let builder = builder.no_proxy();
        let client = builder
            .build()
            .map_err(|e| DataError::provider(provider, format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, provider })
    }

    /// GET `url` with `query`. The query usually carries the API key, so URLs
    /// are stripped from transport errors before they reach a log line.
    pub fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpResponse, DataError> {
        debug!("GET {url}");
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DataError::TemporaryRateLimit {
                provider: self.provider.to_string(),
            });
        }
        if status.is_server_error() {
            return Err(DataError::ServerError {
                provider: self.provider.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(DataError::provider(
                self.provider,
                format!("data not downloaded (HTTP {status})"),
            ));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp.text().map_err(|e| self.transport_error(e))?;

        Ok(HttpResponse { content_type, body })
    }

    fn transport_error(&self, e: reqwest::Error) -> DataError {
        let e = e.without_url();
        if e.is_timeout() {
            DataError::Timeout(format!("{}: {e}", self.provider))
        } else if e.is_connect() {
            DataError::NetworkUnreachable(format!("{}: not connected to the internet ({e})", self.provider))
        } else {
            DataError::provider(self.provider, format!("request failed: {e}"))
        }
    }
}
