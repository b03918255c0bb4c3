//! Reddit OAuth client: password-grant token + `/api/info` batch lookup

use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use refetch_core::client::{RawRecord, RecordClient, RecordStream};
use refetch_core::error::FetchError;
use refetch_core::retry_with_backoff;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::auth::Credentials;
use crate::listing::{self, Listing};

/// `/api/info` accepts at most 100 fullnames per call
pub const MAX_INFO_BATCH: usize = 100;

pub const DEFAULT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const DEFAULT_API_URL: &str = "https://oauth.reddit.com";

/// Reddit's rate-limit window; longer reset values are not trusted
const MAX_RATE_WAIT: Duration = Duration::from_secs(600);

/// Refresh tokens this long before Reddit says they expire
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// Where to authenticate and where to query
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub auth_url: String,
    pub api_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct Token {
    value: String,
    expires_at: Instant,
}

/// Rate-limit state from the last response's `x-ratelimit-*` headers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimit {
    pub remaining: Option<f64>,
    pub reset: Option<Duration>,
}

impl RateLimit {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let num = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
        };
        Self {
            remaining: num("x-ratelimit-remaining"),
            reset: num("x-ratelimit-reset").and_then(|s| {
                Duration::try_from_secs_f64(s.max(0.0).min(MAX_RATE_WAIT.as_secs_f64())).ok()
            }),
        }
    }

    /// How long to wait before the next request, if the budget is spent
    pub fn wait(&self) -> Option<Duration> {
        match (self.remaining, self.reset) {
            (Some(r), Some(reset)) if r < 1.0 => Some(reset),
            _ => None,
        }
    }
}

/// One authenticated session. Not shared between shards.
pub struct RedditClient {
    http: reqwest::Client,
    credentials: Credentials,
    endpoints: Endpoints,
    token: Option<Token>,
    rate: RateLimit,
}

impl std::fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditClient")
            .field("endpoints", &self.endpoints)
            .field("authenticated", &self.token.is_some())
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

impl RedditClient {
    pub fn new(http: reqwest::Client, credentials: Credentials, endpoints: Endpoints) -> Self {
        Self {
            http,
            credentials,
            endpoints,
            token: None,
            rate: RateLimit::default(),
        }
    }

    /// Client on the process-wide connection pool with default endpoints
    pub fn with_shared_pool(credentials: Credentials) -> Self {
        Self::new(
            refetch_core::http_client().clone(),
            credentials,
            Endpoints::default(),
        )
    }

    /// Current bearer token, fetching a new one if absent or about to expire.
    pub async fn token(&mut self) -> Result<String, FetchError> {
        if let Some(t) = &self.token {
            if Instant::now() + TOKEN_MARGIN < t.expires_at {
                return Ok(t.value.clone());
            }
        }
        let this = &*self;
        let token = retry_with_backoff("reddit auth", || this.request_token()).await?;
        let value = token.value.clone();
        self.token = Some(token);
        Ok(value)
    }

    async fn request_token(&self) -> Result<Token, FetchError> {
        let c = &self.credentials;
        let resp = self
            .http
            .post(&self.endpoints.auth_url)
            .basic_auth(&c.client_id, Some(&c.client_secret))
            .header(reqwest::header::USER_AGENT, &c.user_agent)
            .form(&[
                ("grant_type", "password"),
                ("username", c.username.as_str()),
                ("password", c.password.as_str()),
            ])
            .send()
            .await
            .map_err(FetchError::from_reqwest)?
            .error_for_status()
            .map_err(FetchError::from_reqwest)?;
        let body: TokenResponse = resp.json().await.map_err(FetchError::from_reqwest)?;
        match (body.access_token, body.error) {
            (Some(value), None) => Ok(Token {
                value,
                expires_at: Instant::now() + Duration::from_secs(body.expires_in.unwrap_or(3600)),
            }),
            (_, err) => Err(FetchError::Api {
                status: Some(401),
                message: format!(
                    "authentication failed: {}",
                    err.unwrap_or_else(|| "no access_token".into())
                ),
            }),
        }
    }

    /// One `/api/info` call for `ids` (without prefix).
    pub async fn info(&mut self, ids: &[String]) -> Result<Vec<Result<RawRecord, FetchError>>, FetchError> {
        if let Some(wait) = self.rate.wait() {
            log::info!("rate limit exhausted, waiting {wait:?}");
            tokio::time::sleep(wait).await;
        }
        let fullnames = ids
            .iter()
            .map(|id| listing::fullname(id))
            .collect::<Vec<_>>()
            .join(",");

        let token = self.token().await?;
        let this = &*self;
        let label = format!("info {}", ids.first().map(String::as_str).unwrap_or(""));
        let result = retry_with_backoff(&label, || this.request_info(&token, &fullnames)).await;

        let (listing, rate) = match result {
            Err(FetchError::Api {
                status: Some(401), ..
            }) => {
                // Token revoked or expired early: one fresh token, one more try
                log::debug!("token rejected, re-authenticating");
                self.token = None;
                let token = self.token().await?;
                let this = &*self;
                retry_with_backoff(&label, || this.request_info(&token, &fullnames)).await?
            }
            other => other?,
        };
        self.rate = rate;
        Ok(listing.into_records())
    }

    async fn request_info(&self, token: &str, fullnames: &str) -> Result<(Listing, RateLimit), FetchError> {
        let url = format!("{}/api/info", self.endpoints.api_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, &self.credentials.user_agent)
            .query(&[("id", fullnames), ("raw_json", "1")])
            .send()
            .await
            .map_err(FetchError::from_reqwest)?
            .error_for_status()
            .map_err(FetchError::from_reqwest)?;
        let rate = RateLimit::from_headers(resp.headers());
        let body = resp.text().await.map_err(FetchError::from_reqwest)?;
        Ok((Listing::parse(&body)?, rate))
    }
}

impl RecordClient for RedditClient {
    fn max_batch_size(&self) -> usize {
        MAX_INFO_BATCH
    }

    fn fetch<'a>(&'a mut self, ids: &'a [String]) -> RecordStream<'a> {
        stream::once(self.info(ids))
            .flat_map(|result| stream::iter(result.unwrap_or_else(|e| vec![Err(e)])))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn rate_limit_headers() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("0.0"));
        h.insert("x-ratelimit-reset", HeaderValue::from_static("42"));
        let rate = RateLimit::from_headers(&h);
        assert_eq!(rate.remaining, Some(0.0));
        assert_eq!(rate.wait(), Some(Duration::from_secs(42)));
    }

    #[test]
    fn rate_limit_reset_is_capped() {
        for reset in ["1e300", "inf", "99999"] {
            let mut h = HeaderMap::new();
            h.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            h.insert("x-ratelimit-reset", HeaderValue::from_str(reset).unwrap());
            assert_eq!(RateLimit::from_headers(&h).wait(), Some(MAX_RATE_WAIT), "{reset}");
        }
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        h.insert("x-ratelimit-reset", HeaderValue::from_static("-5"));
        assert_eq!(RateLimit::from_headers(&h).wait(), Some(Duration::ZERO));
    }

    #[test]
    fn rate_limit_with_budget_does_not_wait() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("598.0"));
        h.insert("x-ratelimit-reset", HeaderValue::from_static("300"));
        assert_eq!(RateLimit::from_headers(&h).wait(), None);
        assert_eq!(RateLimit::from_headers(&HeaderMap::new()).wait(), None);
    }

    #[test]
    fn default_endpoints() {
        let e = Endpoints::default();
        assert!(e.auth_url.ends_with("/api/v1/access_token"));
        assert_eq!(e.api_url, "https://oauth.reddit.com");
    }
}
