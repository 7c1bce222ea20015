//! Cursor-based pagination over the search and hostname endpoints.
//!
//! Both endpoints share one state machine ([`ResultIterator`]); they differ
//! in the query parameter names and in how the next cursor is derived:
//!
//! - search: the cursor is `"{timestamp},{id}"` built from the `sort` key of
//!   the last item of the page ([`SearchAfter`]);
//! - hostname: the server hands back an opaque `pageState` that is sent
//!   verbatim on the next request ([`PageState`]).
//!
//! Items are pulled lazily with [`ResultIterator::next`]. A page is only
//! requested once every item of the previous one has been handed out, so a
//! consumer that stops early never triggers another request.

use super::client::Client;
use super::context::TaskContext;
use super::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;
use url::Url;

/// The search API stops counting at this many hits. A reported total equal
/// to it is a ceiling, not a count.
pub const MAX_TOTAL: u64 = 10_000;

#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
  /// Free-form query (`q`), used by the search endpoints.
  pub query: Option<String>,
  /// Items requested per page; 0 leaves it to the server.
  pub page_size: usize,
  /// Maximum number of items handed out; `None` is unlimited.
  pub limit: Option<usize>,
  /// Cursor to resume from.
  pub cursor: Option<String>,
  /// Extra query parameters sent with every page request.
  pub params: Vec<(String, String)>,
}

impl IteratorOptions {
  #[must_use]
  pub fn query(mut self, query: impl Into<String>) -> Self {
    self.query = Some(query.into());
    self
  }

  #[must_use]
  pub const fn page_size(mut self, size: usize) -> Self {
    self.page_size = size;
    self
  }

  #[must_use]
  pub const fn limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }

  #[must_use]
  pub fn cursor(mut self, cursor: Option<String>) -> Self {
    self.cursor = cursor.filter(|c| !c.is_empty());
    self
  }

  #[must_use]
  pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
    self.params.push((key.to_string(), value.into()));
    self
  }
}

/// One decoded page.
#[derive(Debug, Deserialize)]
pub struct Envelope {
  #[serde(default, alias = "items")]
  pub results: Vec<Value>,
  #[serde(default)]
  pub total: Option<u64>,
  #[serde(default, rename = "pageState")]
  pub page_state: Option<String>,
}

/// How a paginated endpoint names its parameters and advances its cursor.
pub trait Pagination: Send + Sync {
  /// Query parameter carrying the page size.
  const SIZE_PARAM: &'static str;
  /// Query parameter carrying the cursor.
  const CURSOR_PARAM: &'static str;

  /// Cursor for the request after `page`; `None` keeps the current one and
  /// `Some("")` means the server has no further page to offer.
  ///
  /// # Errors
  ///
  /// A page whose cursor material has the wrong shape is malformed.
  fn next_cursor(page: &Envelope) -> Result<Option<String>>;
}

/// Compound `timestamp,id` cursor taken from the last item's `sort` key.
#[derive(Debug)]
pub struct SearchAfter;

impl Pagination for SearchAfter {
  const SIZE_PARAM: &'static str = "size";
  const CURSOR_PARAM: &'static str = "search_after";

  fn next_cursor(page: &Envelope) -> Result<Option<String>> {
    let Some(sort) = page
      .results
      .last()
      .and_then(|item| item.get("sort"))
      .and_then(Value::as_array)
    else {
      return Ok(None);
    };
    if sort.len() < 2 {
      return Ok(None);
    }

    let timestamp = match &sort[0] {
      Value::Number(n) => format_sort_number(n),
      _ => None,
    };
    let (Some(timestamp), Some(id)) = (timestamp, sort[1].as_str()) else {
      return Err(Error::MalformedResponse(format!(
        "invalid result sort format: {}",
        Value::Array(sort.clone())
      )));
    };
    Ok(Some(format!("{timestamp},{id}")))
  }
}

/// Renders a sort timestamp in plain decimal notation, never as an exponent.
fn format_sort_number(n: &serde_json::Number) -> Option<String> {
  if let Some(i) = n.as_i64() {
    return Some(i.to_string());
  }
  if let Some(u) = n.as_u64() {
    return Some(u.to_string());
  }
  n.as_f64().filter(|f| f.is_finite()).map(|f| f.to_string())
}

/// Opaque `pageState` copied verbatim from the previous answer. A missing or
/// empty state ends the walk.
#[derive(Debug)]
pub struct PageState;

impl Pagination for PageState {
  // The hostname endpoint calls its page size "limit".
  const SIZE_PARAM: &'static str = "limit";
  const CURSOR_PARAM: &'static str = "pageState";

  fn next_cursor(page: &Envelope) -> Result<Option<String>> {
    Ok(Some(page.page_state.clone().unwrap_or_default()))
  }
}

pub type SearchIterator = ResultIterator<SearchAfter>;
pub type HostnameIterator = ResultIterator<PageState>;

/// Lazily fetched, forward-only sequence of result items.
pub struct ResultIterator<P: Pagination> {
  client: Client,
  ctx: TaskContext,
  base_url: Url,
  page_size: usize,
  limit: Option<usize>,
  /// Cursor positioned after the last fully consumed page.
  cursor: Option<String>,
  /// Cursor received with the page currently being drained.
  pending_cursor: Option<String>,
  buffer: VecDeque<Value>,
  emitted: usize,
  fetched: usize,
  pages: usize,
  last_page_len: usize,
  total: Option<u64>,
  has_more: bool,
  finished: bool,
  _pagination: std::marker::PhantomData<P>,
}

impl<P: Pagination> std::fmt::Debug for ResultIterator<P> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResultIterator")
      .field("url", &self.base_url.as_str())
      .field("cursor", &self.cursor)
      .field("emitted", &self.emitted)
      .field("total", &self.total)
      .field("has_more", &self.has_more)
      .finish_non_exhaustive()
  }
}

impl<P: Pagination> ResultIterator<P> {
  pub(crate) fn new(
    client: Client,
    mut base_url: Url,
    options: IteratorOptions,
  ) -> Self {
    {
      let mut query = base_url.query_pairs_mut();
      if let Some(q) = options.query.as_deref().filter(|q| !q.is_empty()) {
        query.append_pair("q", q);
      }
      if options.page_size > 0 {
        query.append_pair(P::SIZE_PARAM, &options.page_size.to_string());
      }
      for (key, value) in &options.params {
        query.append_pair(key, value);
      }
    }

    Self {
      client,
      ctx: TaskContext::new(),
      base_url,
      page_size: options.page_size,
      limit: options.limit,
      cursor: options.cursor,
      pending_cursor: None,
      buffer: VecDeque::new(),
      emitted: 0,
      fetched: 0,
      pages: 0,
      last_page_len: 0,
      total: None,
      has_more: true,
      finished: false,
      _pagination: std::marker::PhantomData,
    }
  }

  /// Binds page fetches to `ctx`; a fetch racing a canceled or expired
  /// context ends the sequence with that error.
  #[must_use]
  pub fn with_context(mut self, ctx: TaskContext) -> Self {
    self.ctx = ctx;
    self
  }

  /// Total reported by the first page, if any page has been fetched.
  #[must_use]
  pub const fn total(&self) -> Option<u64> {
    self.total
  }

  /// Whether more results are believed to exist past what was fetched.
  #[must_use]
  pub const fn has_more(&self) -> bool {
    self.has_more
  }

  /// Cursor from which a later run would resume after the items handed out
  /// so far.
  #[must_use]
  pub fn cursor(&self) -> Option<&str> {
    self.cursor.as_deref()
  }

  #[must_use]
  pub const fn emitted(&self) -> usize {
    self.emitted
  }

  #[must_use]
  pub const fn pages_fetched(&self) -> usize {
    self.pages
  }

  fn limit_reached(&self) -> bool {
    self.limit.is_some_and(|limit| self.emitted >= limit)
  }

  /// Next item, fetching a new page only when the current one is drained.
  /// Returns `None` once the sequence is exhausted; an error is yielded once
  /// and ends the sequence.
  pub async fn next(&mut self) -> Option<Result<Value>> {
    loop {
      if self.finished || self.limit_reached() {
        self.finished = true;
        return None;
      }

      if let Some(item) = self.buffer.pop_front() {
        self.emitted += 1;
        if self.buffer.is_empty() {
          self.promote_cursor();
        }
        return Some(Ok(item));
      }

      if self.pages > 0 && (self.last_page_len == 0 || !self.has_more) {
        self.finished = true;
        return None;
      }

      if let Err(err) = self.fetch_page().await {
        self.finished = true;
        return Some(Err(err));
      }
    }
  }

  fn promote_cursor(&mut self) {
    if let Some(cursor) = self.pending_cursor.take() {
      self.cursor = Some(cursor).filter(|c| !c.is_empty());
    }
  }

  fn page_url(&self) -> Url {
    let mut url = self.base_url.clone();
    if let Some(cursor) = &self.cursor {
      url.query_pairs_mut().append_pair(P::CURSOR_PARAM, cursor);
    }
    url
  }

  async fn fetch_page(&mut self) -> Result<()> {
    let url = self.page_url();
    debug!(url = %url, page = self.pages + 1, "fetching page");

    let body = self.ctx.run(self.client.get(url)).await?;
    let page: Envelope = serde_json::from_value(body)?;
    let next_cursor = P::next_cursor(&page)?;
    let page_len = page.results.len();

    if self.pages == 0 {
      self.total = page.total;
    }
    self.pages += 1;
    self.last_page_len = page_len;
    self.has_more =
      next_cursor.as_deref() != Some("") && self.infer_has_more(page_len);
    self.fetched += page_len;
    self.pending_cursor = next_cursor;
    self.buffer.extend(page.results);
    if self.buffer.is_empty() {
      self.promote_cursor();
    }

    debug!(
      items = page_len,
      total = ?self.total,
      has_more = self.has_more,
      "page received"
    );
    Ok(())
  }

  /// A total at the ceiling says nothing about what is left, so fall back to
  /// "a full page means there is probably another one". Endpoints without a
  /// total always use the page-size rule.
  fn infer_has_more(&self, page_len: usize) -> bool {
    match self.total {
      Some(total) if total != MAX_TOTAL => {
        total > (self.fetched + page_len) as u64
      }
      _ => page_len >= self.page_size,
    }
  }

  /// Drains the remaining items, stopping at the first error.
  ///
  /// # Errors
  ///
  /// The first page failure.
  pub async fn collect_all(&mut self) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    while let Some(item) = self.next().await {
      items.push(item?);
    }
    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{method, path, query_param, query_param_is_missing};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client_for(server: &MockServer) -> Client {
    Client::builder().host(server.uri()).build().unwrap()
  }

  fn hit(ts: u64, id: &str) -> Value {
    json!({"_id": id, "sort": [ts, id]})
  }

  #[test]
  fn test_search_after_from_last_sort_key() {
    let page = Envelope {
      results: vec![hit(1, "a"), hit(1_700_000_000_123, "b")],
      total: Some(2),
      page_state: None,
    };
    assert_eq!(
      SearchAfter::next_cursor(&page).unwrap().as_deref(),
      Some("1700000000123,b")
    );
  }

  #[test]
  fn test_search_after_keeps_fractional_timestamp_plain() {
    let page = Envelope {
      results: vec![json!({"sort": [1.5, "x"]})],
      total: None,
      page_state: None,
    };
    assert_eq!(
      SearchAfter::next_cursor(&page).unwrap().as_deref(),
      Some("1.5,x")
    );
  }

  #[test]
  fn test_search_after_rejects_bad_sort_shape() {
    let page = Envelope {
      results: vec![json!({"sort": ["yesterday", 3]})],
      total: None,
      page_state: None,
    };
    assert!(matches!(
      SearchAfter::next_cursor(&page),
      Err(Error::MalformedResponse(_))
    ));
  }

  #[test]
  fn test_search_after_ignores_short_sort_key() {
    let page = Envelope {
      results: vec![json!({"sort": [1]})],
      total: None,
      page_state: None,
    };
    assert_eq!(SearchAfter::next_cursor(&page).unwrap(), None);
  }

  #[tokio::test]
  async fn test_search_follows_cursor_until_total() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param("q", "test"))
      .and(query_param_is_missing("search_after"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(1, "dummy")], "total": 2, "has_more": true
      })))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param("search_after", "1,dummy"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(2, "dummy")], "total": 2, "has_more": false
      })))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param("search_after", "2,dummy"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [], "total": 2, "has_more": false
      })))
      .expect(0)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .search(IteratorOptions::default().query("test"))
      .unwrap();
    let items = it.collect_all().await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(it.total(), Some(2));
    assert!(!it.has_more());
    assert_eq!(it.cursor(), Some("2,dummy"));
  }

  #[tokio::test]
  async fn test_limit_stops_without_extra_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param("size", "3"))
      .and(query_param_is_missing("search_after"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(1, "a"), hit(2, "b"), hit(3, "c")], "total": 9
      })))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param("search_after", "3,c"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(4, "d"), hit(5, "e"), hit(6, "f")], "total": 9
      })))
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .search(
        IteratorOptions::default()
          .query("domain:example.com")
          .page_size(3)
          .limit(Some(5)),
      )
      .unwrap();
    let items = it.collect_all().await.unwrap();

    assert_eq!(items.len(), 5);
    assert_eq!(items[4]["_id"], "e");
    assert_eq!(it.pages_fetched(), 2);
    // The second page was not fully consumed, so the resumable cursor stays
    // behind it.
    assert_eq!(it.cursor(), Some("3,c"));
  }

  #[tokio::test]
  async fn test_early_stop_does_not_fetch_next_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(1, "a"), hit(2, "b")], "total": 50
      })))
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .search(IteratorOptions::default().page_size(2))
      .unwrap();
    let first = it.next().await.unwrap().unwrap();
    assert_eq!(first["_id"], "a");
    drop(it);
  }

  #[tokio::test]
  async fn test_ceiling_total_uses_page_size_rule() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param_is_missing("search_after"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(1, "a"), hit(2, "b")], "total": MAX_TOTAL
      })))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param("search_after", "2,b"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(3, "c")], "total": MAX_TOTAL
      })))
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .search(IteratorOptions::default().page_size(2))
      .unwrap();
    let items = it.collect_all().await.unwrap();

    // Short second page ends the run even though 10000 was "reported".
    assert_eq!(items.len(), 3);
    assert!(!it.has_more());
    assert_eq!(it.total(), Some(MAX_TOTAL));
  }

  #[tokio::test]
  async fn test_later_totals_are_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param_is_missing("search_after"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(1, "a")], "total": 2
      })))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .and(query_param("search_after", "1,a"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [hit(2, "b")], "total": 500
      })))
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server).search(IteratorOptions::default()).unwrap();
    let items = it.collect_all().await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(it.total(), Some(2));
  }

  #[tokio::test]
  async fn test_empty_page_ends_iteration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"results": [], "total": 0})),
      )
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server).search(IteratorOptions::default()).unwrap();
    assert!(it.next().await.is_none());
    assert!(it.next().await.is_none());
  }

  #[tokio::test]
  async fn test_zero_limit_never_fetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .search(IteratorOptions::default().limit(Some(0)))
      .unwrap();
    assert!(it.next().await.is_none());
  }

  #[tokio::test]
  async fn test_error_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .respond_with(ResponseTemplate::new(400).set_body_json(
        json!({"status": 400, "message": "Invalid query"}),
      ))
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .search(IteratorOptions::default().query("page.domain:"))
      .unwrap();
    assert!(matches!(it.next().await, Some(Err(Error::Api(_)))));
    assert!(it.next().await.is_none());
  }

  #[tokio::test]
  async fn test_malformed_envelope_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/search/"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"results": "nope"})),
      )
      .mount(&server)
      .await;

    let mut it = client_for(&server).search(IteratorOptions::default()).unwrap();
    assert!(matches!(
      it.next().await,
      Some(Err(Error::MalformedResponse(_)))
    ));
    assert!(it.next().await.is_none());
  }

  #[tokio::test]
  async fn test_hostname_copies_page_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/hostname/example.com"))
      .and(query_param("limit", "2"))
      .and(query_param_is_missing("pageState"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "item": "example.com",
        "results": [{"seen": 1}, {"seen": 2}],
        "pageState": "opaque-1"
      })))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/hostname/example.com"))
      .and(query_param("pageState", "opaque-1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "item": "example.com",
        "results": [{"seen": 3}],
        "pageState": "opaque-2"
      })))
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .hostname("example.com", IteratorOptions::default().page_size(2))
      .unwrap();
    let items = it.collect_all().await.unwrap();

    assert_eq!(items.len(), 3);
    assert_eq!(it.cursor(), Some("opaque-2"));
  }

  #[tokio::test]
  async fn test_hostname_resumes_from_page_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/hostname/example.com"))
      .and(query_param("pageState", "resume-here"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [{"seen": 9}],
        "pageState": ""
      })))
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .hostname(
        "example.com",
        IteratorOptions::default()
          .page_size(10)
          .cursor(Some("resume-here".into())),
      )
      .unwrap();
    let items = it.collect_all().await.unwrap();

    assert_eq!(items.len(), 1);
    assert!(!it.has_more());
    assert_eq!(it.cursor(), None);
  }

  #[tokio::test]
  async fn test_hostname_empty_page_state_clears_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/hostname/example.com"))
      .and(query_param_is_missing("pageState"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [{"n": 1}, {"n": 2}],
        "pageState": "p1"
      })))
      .expect(1)
      .mount(&server)
      .await;
    // A full page with no state to continue from.
    Mock::given(method("GET"))
      .and(path("/api/v1/hostname/example.com"))
      .and(query_param("pageState", "p1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": [{"n": 3}, {"n": 4}],
        "pageState": ""
      })))
      .expect(1)
      .mount(&server)
      .await;

    let mut it = client_for(&server)
      .hostname("example.com", IteratorOptions::default().page_size(2))
      .unwrap();
    let items = it.collect_all().await.unwrap();

    assert_eq!(items.len(), 4);
    assert!(!it.has_more());
    assert_eq!(it.cursor(), None);
  }

  #[tokio::test]
  async fn test_canceled_context_stops_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let ctx = TaskContext::new();
    ctx.cancel();
    let mut it = client_for(&server)
      .search(IteratorOptions::default())
      .unwrap()
      .with_context(ctx);
    assert!(matches!(it.next().await, Some(Err(Error::Canceled))));
  }
}
