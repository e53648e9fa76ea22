//! HTTP fetch client - one GET per task over a shared connection pool.
//!
//! Failures are classified, never retried here:
//! - malformed URL, non-http(s) scheme, 4xx (except 429), redirect loops and
//!   oversized bodies are permanent
//! - timeouts, connection errors, 429 and 5xx are transient

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{BaseFetchClient, RawContent};
use crate::config::FetchConfig;
use crate::error::FetchError;

pub struct HttpFetchClient {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetchClient {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.5"),
        );

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }

    fn classify(url: &str, err: reqwest::Error) -> FetchError {
        let url = url.to_string();
        if err.is_timeout() {
            FetchError::Timeout { url }
        } else if err.is_redirect() {
            FetchError::Redirect { url }
        } else if err.is_builder() {
            FetchError::InvalidUrl { url }
        } else if err.is_connect() {
            FetchError::Connect { url, source: err }
        } else {
            FetchError::Request { url, source: err }
        }
    }
}

/// Parse and check a task URL before any I/O happens.
pub fn validate_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw).map_err(|_| FetchError::InvalidUrl {
        url: raw.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FetchError::UnsupportedScheme {
                url: raw.to_string(),
                scheme: other.to_string(),
            })
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(FetchError::InvalidUrl {
            url: raw.to_string(),
        });
    }

    Ok(url)
}

#[async_trait]
impl BaseFetchClient for HttpFetchClient {
    async fn fetch(&self, raw_url: &str) -> Result<RawContent, FetchError> {
        let url = validate_url(raw_url)?;

        debug!(url = %url, "HTTP fetch starting");
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Self::classify(raw_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: raw_url.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: raw_url.to_string(),
            limit: self.max_bytes,
        };

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(too_large());
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Self::classify(raw_url, e))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "HTTP fetch complete");
        Ok(RawContent {
            url,
            body: Bytes::from(body),
        })
    }
}
