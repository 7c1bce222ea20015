use super::context::TaskContext;
use super::error::{ApiError, Error, Result};
use super::iterator::{
  HostnameIterator, IteratorOptions, SearchIterator,
};
use super::transport::{RateLimitedTransport, Transport};
use super::wait::{self, WaitOptions};
use reqwest::header::{self, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const DEFAULT_HOST: &str = "https://urlscan.io";
const API_PREFIX: &str = "/api/v1/";

/// Values accepted by [`Client::update_visibility`].
pub const VISIBILITIES: [&str; 4] = ["public", "unlisted", "private", "deleted"];

/// Checks that `value` stays a single path segment once spliced into an
/// endpoint path.
fn segment<'a>(what: &str, value: &'a str) -> Result<&'a str> {
  let bad = value.is_empty()
    || value == "."
    || value == ".."
    || value
      .chars()
      .any(|c| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace());
  if bad {
    return Err(Error::InvalidOption(format!("invalid {what}: {value:?}")));
  }
  Ok(value)
}

/// Shared handle to the API. Cloning is cheap; every clone shares the same
/// connection pool and transport.
#[derive(Clone)]
pub struct Client {
  inner: Arc<Inner>,
}

struct Inner {
  http: reqwest::Client,
  transport: Box<dyn Transport>,
  base_url: Url,
  api_key: Option<String>,
}

impl std::fmt::Debug for Client {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Client")
      .field("base_url", &self.inner.base_url.as_str())
      .field("api_key", &self.inner.api_key.as_ref().map(|_| "<redacted>"))
      .finish_non_exhaustive()
  }
}

pub struct ClientBuilder {
  host: String,
  api_key: Option<String>,
  user_agent: String,
}

impl Default for ClientBuilder {
  fn default() -> Self {
    Self {
      host: DEFAULT_HOST.to_string(),
      api_key: None,
      user_agent: format!("urlscan-cli/{}", env!("CARGO_PKG_VERSION")),
    }
  }
}

impl ClientBuilder {
  /// Host with or without a scheme; a bare host defaults to https.
  #[must_use]
  pub fn host(mut self, host: impl Into<String>) -> Self {
    self.host = host.into();
    self
  }

  #[must_use]
  pub fn api_key(mut self, key: Option<String>) -> Self {
    self.api_key = key.filter(|k| !k.is_empty());
    self
  }

  #[must_use]
  pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
    self.user_agent = agent.into();
    self
  }

  /// # Errors
  ///
  /// Fails if the host is not a valid URL or the HTTP client cannot be built.
  pub fn build(self) -> Result<Client> {
    let base_url = parse_host(&self.host)?;
    let http = reqwest::Client::builder()
      .user_agent(self.user_agent)
      .build()?;
    let transport = Box::new(RateLimitedTransport::new(http.clone()));

    Ok(Client {
      inner: Arc::new(Inner {
        http,
        transport,
        base_url,
        api_key: self.api_key,
      }),
    })
  }
}

fn parse_host(host: &str) -> Result<Url> {
  let host = host.trim().trim_end_matches('/');
  if host.starts_with("http://") || host.starts_with("https://") {
    Ok(Url::parse(host)?)
  } else {
    Ok(Url::parse(&format!("https://{host}"))?)
  }
}

/// Body of a scan submission. Unset fields are left out of the JSON.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanOptions {
  pub url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub visibility: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub country: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub referer: Option<String>,
  #[serde(rename = "customagent", skip_serializing_if = "Option::is_none")]
  pub custom_agent: Option<String>,
  #[serde(rename = "overrideSafety", skip_serializing_if = "Option::is_none")]
  pub override_safety: Option<String>,
}

impl ScanOptions {
  /// Same options, different target URL.
  #[must_use]
  pub fn for_url(&self, url: &str) -> Self {
    Self {
      url: url.to_string(),
      ..self.clone()
    }
  }
}

impl Client {
  #[must_use]
  pub fn builder() -> ClientBuilder {
    ClientBuilder::default()
  }

  #[must_use]
  pub fn base_url(&self) -> &Url {
    &self.inner.base_url
  }

  /// Resolves `path` below `/api/v1/`.
  ///
  /// # Errors
  ///
  /// Fails if the joined path is not a valid URL.
  pub fn api_url(&self, path: &str) -> Result<Url> {
    let path = format!("{API_PREFIX}{}", path.trim_start_matches('/'));
    Ok(self.inner.base_url.join(&path)?)
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let builder = self
      .inner
      .http
      .request(method, url)
      .header(header::ACCEPT, HeaderValue::from_static("application/json"));
    match &self.inner.api_key {
      Some(key) => builder.header("API-Key", key),
      None => builder,
    }
  }

  /// Sends a request through the rate-limited transport and decodes the
  /// JSON answer.
  async fn send(&self, builder: RequestBuilder) -> Result<Value> {
    let request = builder.build()?;
    debug!(method = %request.method(), url = %request.url(), "sending request");

    let response = self.inner.transport.execute(request).await?;
    let status = response.status();
    let retry_after = super::transport::retry_after(response.headers());
    let body = response.bytes().await?;

    if status.is_success() {
      if body.is_empty() {
        return Ok(Value::Null);
      }
      return Ok(serde_json::from_slice(&body)?);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
      return Err(Error::RateLimited { retry_after });
    }
    Err(Error::Api(ApiError::from_body(status, &body)))
  }

  /// # Errors
  ///
  /// Transport failures, non-2xx answers and undecodable bodies.
  pub async fn get(&self, url: Url) -> Result<Value> {
    self.send(self.request(Method::GET, url)).await
  }

  /// # Errors
  ///
  /// Transport failures, non-2xx answers and undecodable bodies.
  pub async fn post<B: Serialize + Sync>(
    &self,
    url: Url,
    body: &B,
  ) -> Result<Value> {
    self.send(self.request(Method::POST, url).json(body)).await
  }

  async fn put<B: Serialize + Sync>(&self, url: Url, body: &B) -> Result<Value> {
    self.send(self.request(Method::PUT, url).json(body)).await
  }

  async fn delete(&self, url: Url) -> Result<Value> {
    self.send(self.request(Method::DELETE, url)).await
  }

  /// Submits a URL for scanning. The answer carries the scan `uuid`.
  ///
  /// # Errors
  ///
  /// See [`Client::post`].
  pub async fn submit_scan(&self, options: &ScanOptions) -> Result<Value> {
    self.post(self.api_url("scan/")?, options).await
  }

  /// # Errors
  ///
  /// A 404 means the scan has not finished (or does not exist).
  pub async fn get_result(&self, uuid: &str) -> Result<Value> {
    let uuid = segment("scan uuid", uuid)?;
    self.get(self.api_url(&format!("result/{uuid}/"))?).await
  }

  /// Polls the result endpoint until the scan is available or `options`'
  /// deadline passes.
  ///
  /// # Errors
  ///
  /// `DeadlineExceeded` once the wait budget is spent, or the first
  /// non-404 failure.
  pub async fn wait_for_result(
    &self,
    ctx: &TaskContext,
    uuid: &str,
    options: &WaitOptions,
  ) -> Result<Value> {
    debug!(uuid, "waiting for scan to finish");
    wait::poll_until_found(ctx, options, || self.get_result(uuid)).await
  }

  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn quotas(&self) -> Result<Value> {
    self.get(self.api_url("quotas/")?).await
  }

  /// Paginated search over `datasource` (scans by default).
  ///
  /// # Errors
  ///
  /// Fails only if the search URL cannot be built.
  pub fn search(&self, options: IteratorOptions) -> Result<SearchIterator> {
    let url = self.api_url("search/")?;
    Ok(SearchIterator::new(self.clone(), url, options))
  }

  /// Paginated search for scans structurally similar to `uuid`.
  ///
  /// # Errors
  ///
  /// Fails only if the URL cannot be built.
  pub fn similar(
    &self,
    uuid: &str,
    options: IteratorOptions,
  ) -> Result<SearchIterator> {
    let uuid = segment("scan uuid", uuid)?;
    let url = self.api_url(&format!("pro/result/{uuid}/similar/"))?;
    Ok(SearchIterator::new(self.clone(), url, options))
  }

  /// Historical observations of a hostname, paged by `pageState`.
  ///
  /// # Errors
  ///
  /// `InvalidOption` if `hostname` is not a single path segment.
  pub fn hostname(
    &self,
    hostname: &str,
    options: IteratorOptions,
  ) -> Result<HostnameIterator> {
    let hostname = segment("hostname", hostname)?;
    let url = self.api_url(&format!("hostname/{hostname}"))?;
    Ok(HostnameIterator::new(self.clone(), url, options))
  }

  /// The user (or API key) making the requests.
  ///
  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn user(&self) -> Result<Value> {
    self.get(self.api_url("user/username")?).await
  }

  /// Countries a scan can be run from.
  ///
  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn available_countries(&self) -> Result<Value> {
    self.get(self.api_url("availableCountries")?).await
  }

  /// Grouped browser user agents accepted by the scan endpoint.
  ///
  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn user_agents(&self) -> Result<Value> {
    self.get(self.api_url("userAgents")?).await
  }

  /// Changes the visibility of a scan owned by the user or their team.
  ///
  /// # Errors
  ///
  /// `InvalidOption` for a visibility outside [`VISIBILITIES`], otherwise
  /// see [`Client::get`].
  pub async fn update_visibility(
    &self,
    uuid: &str,
    visibility: &str,
  ) -> Result<Value> {
    if !VISIBILITIES.contains(&visibility) {
      return Err(Error::InvalidOption(format!(
        "visibility must be one of {}, got {visibility:?}",
        VISIBILITIES.join(", ")
      )));
    }
    let uuid = segment("scan uuid", uuid)?;
    let url = self.api_url(&format!("result/{uuid}/visibility/"))?;
    self
      .put(url, &serde_json::json!({ "visibility": visibility }))
      .await
  }

  /// Restores a scan's original visibility.
  ///
  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn reset_visibility(&self, uuid: &str) -> Result<Value> {
    let uuid = segment("scan uuid", uuid)?;
    self
      .delete(self.api_url(&format!("result/{uuid}/visibility/"))?)
      .await
  }

  /// Brands tracked by the brand detection.
  ///
  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn brands(&self) -> Result<Value> {
    self.get(self.api_url("pro/brands")?).await
  }

  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn available_brands(&self) -> Result<Value> {
    self.get(self.api_url("pro/availableBrands")?).await
  }

  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn saved_searches(&self) -> Result<Value> {
    self.get(self.api_url("user/searches/")?).await
  }

  /// Latest hits of a saved search.
  ///
  /// # Errors
  ///
  /// See [`Client::get`].
  pub async fn saved_search_results(&self, id: &str) -> Result<Value> {
    let id = segment("saved search id", id)?;
    self
      .get(self.api_url(&format!("user/searches/{id}/results/"))?)
      .await
  }
}
