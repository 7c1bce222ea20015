//! HTTP transport seam and the rate-limit absorbing decorator.
//!
//! The API answers 429 with `X-Rate-Limit-*` headers once a quota window is
//! exhausted. [`RateLimitedTransport`] sleeps for the advertised
//! `X-Rate-Limit-Reset-After` seconds and re-issues the request exactly once.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Request, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

pub const RETRY_AFTER_HEADER: &str = "X-Rate-Limit-Reset-After";

const RATE_LIMIT_HEADERS: [&str; 5] = [
  "X-Rate-Limit-Action",
  "X-Rate-Limit-Limit",
  "X-Rate-Limit-Reset",
  "X-Rate-Limit-Scope",
  "X-Rate-Limit-Window",
];

/// One "perform this HTTP request" primitive.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn execute(&self, request: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl Transport for reqwest::Client {
  async fn execute(&self, request: Request) -> reqwest::Result<Response> {
    Self::execute(self, request).await
  }
}

/// Wraps a transport with a single compensating retry on 429.
#[derive(Debug, Clone)]
pub struct RateLimitedTransport<T> {
  inner: T,
}

impl<T: Transport> RateLimitedTransport<T> {
  pub const fn new(inner: T) -> Self {
    Self { inner }
  }
}

#[async_trait]
impl<T: Transport> Transport for RateLimitedTransport<T> {
  async fn execute(&self, request: Request) -> reqwest::Result<Response> {
    let retry = request.try_clone();
    let response = self.inner.execute(request).await?;

    if response.status() != StatusCode::TOO_MANY_REQUESTS {
      return Ok(response);
    }
    let Some(wait) = retry_after(response.headers()) else {
      debug!(url = %response.url(), "429 without a usable retry-after header");
      return Ok(response);
    };
    let Some(retry) = retry else {
      debug!(url = %response.url(), "429 on a request that cannot be replayed");
      return Ok(response);
    };

    info!(
      url = %response.url(),
      wait_secs = wait.as_secs_f64(),
      limits = %describe_limits(response.headers()),
      "rate limited, sleeping before retrying once"
    );
    drop(response);
    tokio::time::sleep(wait).await;

    self.inner.execute(retry).await
  }
}

/// Parses the retry-after header as decimal seconds.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
  let value = headers.get(RETRY_AFTER_HEADER)?.to_str().ok()?.trim();
  if let Ok(secs) = value.parse::<u64>() {
    return Some(Duration::from_secs(secs));
  }
  value
    .parse::<f64>()
    .ok()
    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn describe_limits(headers: &HeaderMap) -> String {
  RATE_LIMIT_HEADERS
    .iter()
    .filter_map(|name| {
      let value = headers.get(*name)?.to_str().ok()?;
      Some(format!("{name}={value}"))
    })
    .collect::<Vec<_>>()
    .join(" ")
}
