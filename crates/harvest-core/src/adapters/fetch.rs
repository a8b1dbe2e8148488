//! Rate-limited HTTP fetch plumbing shared by the network adapters
//!
//! Every request acquires a grant from the per-domain rate limiter first and
//! classifies failures into the fetch taxonomy: transport/DNS/timeout and
//! 5xx map to `Unreachable`, 429/503 to `RateLimited` (and are reported back
//! to the limiter so it can shrink the budget), 401/403 to `AuthRequired`.

use harvest_common::FetchError;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;
use crate::rate_limit::RateLimiter;

/// Response of one fetch, with the headers the adapters care about.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

impl FetchResponse {
    pub fn not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}

/// Rate-limited HTTP client shared by all adapters.
pub struct Fetcher {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl Fetcher {
    pub fn new(config: &HttpConfig, limiter: Arc<RateLimiter>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Unreachable(format!("client build failed: {}", e)))?;
        Ok(Self { client, limiter })
    }

    /// GET `url` with optional extra headers, throttled by the domain budget.
    ///
    /// Non-success statuses other than 304 are classified into `FetchError`;
    /// 304 is returned to the caller, which decides what "not modified"
    /// means for its source.
    pub async fn get(
        &self,
        url: &Url,
        headers: &[(&str, String)],
    ) -> Result<FetchResponse, FetchError> {
        let domain = domain_of(url);
        self.limiter.acquire(&domain).await;

        let mut request = self.client.get(url.clone());
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        debug!(url = %url, "Fetching");
        let response = request.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            self.limiter.report_throttled(&domain).await;
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(FetchError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::AuthRequired(format!("{} from {}", status, domain)));
        }
        if !status.is_success() && status != StatusCode::NOT_MODIFIED {
            return Err(FetchError::Unreachable(format!("{} from {}", status, domain)));
        }

        let header_str = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let etag = header_str(reqwest::header::ETAG);
        let last_modified = header_str(reqwest::header::LAST_MODIFIED);
        let content_type = header_str(reqwest::header::CONTENT_TYPE);

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Unreachable(format!("body read failed: {}", e)))?;

        Ok(FetchResponse {
            status,
            body,
            etag,
            last_modified,
            content_type,
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Unreachable(format!("timeout: {}", e))
    } else if e.is_connect() {
        FetchError::Unreachable(format!("connect failed: {}", e))
    } else {
        FetchError::Unreachable(e.to_string())
    }
}

/// Rate-limit key for a URL: the host, or the whole URL for hostless ones
/// (local file paths get their own bucket).
pub fn domain_of(url: &Url) -> String {
    url.host_str().map(String::from).unwrap_or_else(|| url.to_string())
}

/// Parse and normalize a source URL at registration time.
pub fn parse_source_url(raw: &str) -> Result<Url, FetchError> {
    Url::parse(raw).map_err(|e| FetchError::Malformed(format!("invalid URL {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_of_extracts_host() {
        let url = Url::parse("https://data.gov.ua/api/datasets?page=1").unwrap();
        assert_eq!(domain_of(&url), "data.gov.ua");
    }

    #[test]
    fn test_bad_url_is_malformed() {
        assert!(matches!(
            parse_source_url("not a url"),
            Err(FetchError::Malformed(_))
        ));
    }
}
