//! HTTP plumbing shared by the reasoning, embedding, log-gateway and
//! issue-tracker connectors.

use crate::traits::{AuthConfig, ConnectorConfig, ConnectorError, ConnectorResult};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

type RateLimiterType = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Longest `retry-after` we are willing to honour inside a single call.
const MAX_RETRY_AFTER_SECS: u64 = 10;

/// Requests-per-minute budget for one connector.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

/// HTTP client with auth, rate limiting and transport retries.
pub struct HttpClient {
    client: Client,
    config: ConnectorConfig,
    rate_limiter: Option<Arc<RateLimiterType>>,
}

impl HttpClient {
    /// Creates a client without rate limiting.
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        Self::with_rate_limit(config, None)
    }

    /// Creates a client, optionally throttled.
    pub fn with_rate_limit(
        config: ConnectorConfig,
        rate_limit: Option<RateLimitConfig>,
    ) -> ConnectorResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            let name = reqwest::header::HeaderName::try_from(key.as_str())
                .map_err(|e| ConnectorError::ConfigError(format!("header {}: {}", key, e)))?;
            let value = reqwest::header::HeaderValue::try_from(value.as_str())
                .map_err(|e| ConnectorError::ConfigError(format!("header {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        let rate_limiter = match rate_limit {
            Some(rl) => {
                let per_minute = NonZeroU32::new(rl.requests_per_minute).ok_or_else(|| {
                    ConnectorError::ConfigError("requests_per_minute must be > 0".into())
                })?;
                let burst = NonZeroU32::new(rl.burst_size).unwrap_or(NonZeroU32::MIN);
                let quota = Quota::per_minute(per_minute).allow_burst(burst);
                Some(Arc::new(GovernorRateLimiter::direct(quota)))
            }
            None => None,
        };

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// Joins a path onto the configured base URL.
    pub fn build_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Connector name used in logs.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// GET a path and decode the JSON body.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> ConnectorResult<R> {
        let request = self.client.get(self.build_url(path));
        let response = self.execute_with_retry(request).await?;
        parse_json_response(response).await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> ConnectorResult<R> {
        let request = self.client.post(self.build_url(path)).json(body);
        let response = self.execute_with_retry(request).await?;
        parse_json_response(response).await
    }

    async fn execute_with_retry(&self, request: RequestBuilder) -> ConnectorResult<Response> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let request = self.add_auth(request);
        let mut delay = Duration::from_millis(200);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(connector = %self.config.name, attempt, delay_ms = delay.as_millis() as u64, "Retrying request");
                sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(5));
            }

            let Some(request) = request.try_clone() else {
                return Err(ConnectorError::Internal("request body is not cloneable".into()));
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = retry_after_secs(&response);
                        if attempt < self.config.max_retries && retry_after <= MAX_RETRY_AFTER_SECS
                        {
                            warn!(connector = %self.config.name, retry_after, "Rate limited");
                            sleep(Duration::from_secs(retry_after)).await;
                            last_error = Some(ConnectorError::RateLimited(retry_after));
                            continue;
                        }
                        return Err(ConnectorError::RateLimited(retry_after));
                    }

                    if status.is_server_error() {
                        warn!(connector = %self.config.name, status = %status, "Server error");
                        last_error =
                            Some(ConnectorError::RequestFailed(format!("Server error: {}", status)));
                        continue;
                    }

                    if status.is_client_error() {
                        return Err(client_error(status, response).await);
                    }

                    return Ok(response);
                }
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        ConnectorError::Timeout(e.to_string())
                    } else if e.is_connect() {
                        ConnectorError::ConnectionFailed(e.to_string())
                    } else {
                        ConnectorError::RequestFailed(e.to_string())
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ConnectorError::Internal("no attempt was made".into())))
    }

    fn add_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            AuthConfig::None => request,
            AuthConfig::ApiKey { key, header_name } => {
                request.header(header_name.as_str(), key.expose_secret())
            }
            AuthConfig::BearerToken { token } => request.bearer_auth(token.expose_secret()),
        }
    }
}

fn retry_after_secs(response: &Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30)
}

async fn client_error(status: StatusCode, response: Response) -> ConnectorError {
    match status {
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed("Unauthorized".into()),
        StatusCode::FORBIDDEN => ConnectorError::AuthorizationDenied("Forbidden".into()),
        StatusCode::NOT_FOUND => ConnectorError::NotFound(response.url().path().to_string()),
        StatusCode::REQUEST_TIMEOUT => ConnectorError::Timeout("Request timeout".into()),
        StatusCode::PAYLOAD_TOO_LARGE => ConnectorError::InvalidRequest("Payload too large".into()),
        _ => {
            let body = response.text().await.unwrap_or_default();
            ConnectorError::RequestFailed(format!(
                "{}: {}",
                status,
                body.chars().take(300).collect::<String>()
            ))
        }
    }
}

async fn parse_json_response<T: DeserializeOwned>(response: Response) -> ConnectorResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

    serde_json::from_str(&text).map_err(|e| {
        ConnectorError::InvalidResponse(format!(
            "Failed to parse response (status {}): {} - Body: {}",
            status,
            e,
            text.chars().take(500).collect::<String>()
        ))
    })
}
