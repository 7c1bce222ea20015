//! Error taxonomy shared by the transport, batch executor, iterators and
//! the result waiter.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// Connection, TLS or body-read failure below the HTTP status level.
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  /// The server still answered 429 after the compensating retry (or sent no
  /// usable retry-after header).
  #[error("rate limited by the API (retry after: {retry_after:?})")]
  RateLimited { retry_after: Option<Duration> },

  /// Any other non-2xx answer, decoded from the server's JSON error body.
  #[error("{0}")]
  Api(ApiError),

  #[error("malformed response: {0}")]
  MalformedResponse(String),

  #[error("deadline exceeded")]
  DeadlineExceeded,

  #[error("operation canceled")]
  Canceled,

  #[error("invalid URL: {0}")]
  InvalidUrl(#[from] url::ParseError),

  #[error("invalid option: {0}")]
  InvalidOption(String),

  /// The task runtime failed to join a spawned batch task.
  #[error("batch scheduler failure: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl Error {
  /// Whether this is a 404 from the API, the only failure the result waiter
  /// treats as "not ready yet".
  #[must_use]
  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::Api(api) if api.status == StatusCode::NOT_FOUND.as_u16())
  }

  /// The server's own error document, if this error carries one.
  #[must_use]
  pub const fn raw_body(&self) -> Option<&Value> {
    match self {
      Self::Api(api) => Some(&api.raw),
      _ => None,
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self {
    Self::MalformedResponse(err.to_string())
  }
}

/// JSON error body returned by the API for non-2xx responses.
#[derive(Debug, Clone)]
pub struct ApiError {
  pub status: u16,
  pub message: String,
  pub description: Option<String>,
  pub raw: Value,
}

#[derive(Deserialize)]
struct ErrorBody {
  status: Option<u16>,
  message: Option<String>,
  description: Option<String>,
}

impl ApiError {
  /// Decodes an error body, falling back to the HTTP reason phrase when the
  /// body is not the API's usual `{status, message, description}` document.
  #[must_use]
  pub fn from_body(status: StatusCode, body: &[u8]) -> Self {
    let raw = serde_json::from_slice::<Value>(body).unwrap_or_else(|_| {
      Value::String(String::from_utf8_lossy(body).into_owned())
    });
    let parsed = serde_json::from_value::<ErrorBody>(raw.clone()).ok();
    let fallback = || {
      status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string()
    };

    match parsed {
      Some(body) => Self {
        status: body.status.unwrap_or_else(|| status.as_u16()),
        message: body.message.unwrap_or_else(fallback),
        description: body.description,
        raw,
      },
      None => Self {
        status: status.as_u16(),
        message: fallback(),
        description: None,
        raw,
      },
    }
  }
}

impl std::fmt::Display for ApiError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "API error {}: {}", self.status, self.message)?;
    if let Some(description) = &self.description {
      write!(f, " ({description})")?;
    }
    Ok(())
  }
}
