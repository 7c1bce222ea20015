use crate::api::batch::{self, BatchOptions, BatchTask};
use crate::api::iterator::{Pagination, ResultIterator};
use crate::api::{self, Client, Error, ScanOptions, TaskContext, WaitOptions};
use crate::results;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde_json::Value;
use tracing::debug;

/// UUID the API assigned to a fresh submission.
fn submitted_uuid(response: &Value) -> api::Result<String> {
  response
    .get("uuid")
    .and_then(Value::as_str)
    .map(str::to_owned)
    .ok_or_else(|| {
      Error::MalformedResponse("scan submission answer has no uuid".into())
    })
}

/// Submits one scan and, when `wait` is set, polls until its result is
/// available and returns that instead of the submission answer.
///
/// # Errors
///
/// The submission failure, or the waiter's failure.
pub async fn submit_scan(
  client: &Client,
  ctx: &TaskContext,
  options: &ScanOptions,
  wait: Option<&WaitOptions>,
) -> api::Result<Value> {
  let submitted = ctx.run(client.submit_scan(options)).await?;
  let Some(wait) = wait else {
    return Ok(submitted);
  };
  let uuid = submitted_uuid(&submitted)?;
  debug!(url = %options.url, uuid, "submitted, waiting for result");
  client.wait_for_result(ctx, &uuid, wait).await
}

/// Batch task submitting `options` and ticking `progress` when done.
#[must_use]
pub fn scan_task(
  options: ScanOptions,
  wait: Option<WaitOptions>,
  progress: ProgressBar,
) -> BatchTask<Client, Value> {
  batch::task(move |client: Client, ctx: TaskContext| async move {
    let outcome = submit_scan(&client, &ctx, &options, wait.as_ref()).await;
    if let Err(err) = &outcome {
      debug!(url = %options.url, error = %err, "submission failed");
    }
    progress.inc(1);
    outcome
  })
}

/// Submits every URL under one batch policy. One result per URL, in order.
///
/// # Errors
///
/// Only if the batch scheduler itself fails; per-URL failures are in the
/// returned results.
pub async fn bulk_submit(
  client: &Client,
  ctx: &TaskContext,
  urls: &[String],
  scan: &ScanOptions,
  wait: Option<&WaitOptions>,
  options: &BatchOptions,
  progress: &ProgressBar,
) -> Result<Vec<api::Result<Value>>> {
  let tasks = urls
    .iter()
    .map(|url| scan_task(scan.for_url(url), wait.cloned(), progress.clone()))
    .collect();

  let outcomes = batch::run(client, ctx, tasks, options)
    .await
    .context("Batch submission failed")?;
  progress.finish_and_clear();
  Ok(outcomes)
}

/// Pulls every item the iterator will give and renders the page report.
///
/// # Errors
///
/// The first page failure; items already pulled are discarded.
pub async fn drain<P: Pagination>(mut it: ResultIterator<P>) -> Result<Value> {
  let items = it.collect_all().await.context("Fetching results failed")?;
  debug!(
    items = it.emitted(),
    pages = it.pages_fetched(),
    has_more = it.has_more(),
    "pagination finished"
  );
  Ok(results::page_report(items, &it))
}
