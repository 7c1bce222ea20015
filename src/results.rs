use crate::api::iterator::{Pagination, ResultIterator};
use crate::api::{self, Error};
use anyhow::{Context, Result};
use console::{style, Style};
use serde::Serialize;
use serde_json::{json, Value};

/// One submitted key (usually a URL) with what came back for it.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct BatchResultPair {
  pub key: String,
  pub result: Value,
}

#[derive(Debug, Serialize, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
  pub total: usize,
  pub succeeded: usize,
  pub failed: usize,
}

impl BatchSummary {
  #[must_use]
  pub fn from_results<T>(results: &[api::Result<T>]) -> Self {
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    Self {
      total: results.len(),
      succeeded,
      failed: results.len() - succeeded,
    }
  }
}

/// Renders a task outcome as JSON: the payload itself, the server's own
/// error document, or `{"error": "..."}` for everything else.
#[must_use]
pub fn result_to_json(result: &api::Result<Value>) -> Value {
  match result {
    Ok(value) => value.clone(),
    Err(err) => error_to_json(err),
  }
}

fn error_to_json(err: &Error) -> Value {
  err
    .raw_body()
    .filter(|raw| raw.is_object())
    .cloned()
    .unwrap_or_else(|| json!({ "error": err.to_string() }))
}

/// Zips submission keys with batch results. Both are in submission order.
#[must_use]
pub fn pair_results(
  keys: &[String],
  results: &[api::Result<Value>],
) -> Vec<BatchResultPair> {
  keys
    .iter()
    .zip(results)
    .map(|(key, result)| BatchResultPair {
      key: key.clone(),
      result: result_to_json(result),
    })
    .collect()
}

/// What a paginated command prints: the items plus enough state to resume.
#[must_use]
pub fn page_report<P: Pagination>(
  items: Vec<Value>,
  it: &ResultIterator<P>,
) -> Value {
  let mut report = json!({
    "results": items,
    "has_more": it.has_more(),
  });
  if let Some(total) = it.total() {
    report["total"] = total.into();
  }
  if let Some(cursor) = it.cursor() {
    report[P::CURSOR_PARAM] = cursor.into();
  }
  report
}

/// Helper: coloured keys so the summary is easy to scan.
fn key(s: &str) -> console::StyledObject<&str> {
  style(s).bold().cyan()
}

/// Prints a one-line batch summary plus each failed key to stderr, keeping
/// stdout clean for JSON.
pub fn print_batch_summary<T>(keys: &[String], results: &[api::Result<T>]) {
  let summary = BatchSummary::from_results(results);
  let mark = if summary.failed == 0 {
    style("✔").green()
  } else {
    style("✖").red()
  };
  eprintln!(
    "{} {} {}/{} succeeded, {} failed",
    mark,
    Style::new().bold().apply_to("Batch finished:"),
    summary.succeeded,
    summary.total,
    summary.failed
  );

  for (name, result) in keys.iter().zip(results) {
    if let Err(err) = result {
      eprintln!("  {} {}", key(name), style(err).red());
    }
  }
}

/// # Errors
///
/// Fails if the value cannot be serialized.
pub fn print_json(value: &impl Serialize) -> Result<()> {
  serde_json::to_string_pretty(value)
    .map(|s| println!("{s}"))
    .context("Failed to serialize results to JSON")
}
