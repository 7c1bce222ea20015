//! Bounded-concurrency fan-out over independent tasks.
//!
//! Every task is spawned up front and waits for a semaphore permit before it
//! starts, so at most `max_concurrency` run at once. Which waiting task gets
//! the next permit is up to the scheduler. Results are gathered by awaiting
//! the join handles in submission order, which keeps `results[i]` paired
//! with `tasks[i]` no matter which task starts or finishes first.

use super::context::TaskContext;
use super::error::{Error, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

pub type TaskFuture<T> = BoxFuture<'static, Result<T>>;

/// A unit of work: given the shared client handle and the batch context,
/// produce one result. Run at most once.
pub type BatchTask<C, T> = Box<dyn FnOnce(C, TaskContext) -> TaskFuture<T> + Send>;

/// Boxes an async closure into a [`BatchTask`].
pub fn task<C, T, F, Fut>(f: F) -> BatchTask<C, T>
where
  F: FnOnce(C, TaskContext) -> Fut + Send + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  Box::new(move |client, ctx| Box::pin(f(client, ctx)))
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
  /// `None` runs every task at once.
  pub max_concurrency: Option<NonZeroUsize>,
  /// `None` never times out.
  pub timeout: Option<Duration>,
}

impl BatchOptions {
  /// Builds options from raw CLI values: a concurrency `<= 0` is unlimited
  /// and a zero timeout is no timeout.
  #[must_use]
  pub fn new(max_concurrency: i64, timeout: Duration) -> Self {
    Self {
      max_concurrency: usize::try_from(max_concurrency)
        .ok()
        .and_then(NonZeroUsize::new),
      timeout: (!timeout.is_zero()).then_some(timeout),
    }
  }
}

/// Runs `tasks` under `options` and returns one result per task, in
/// submission order.
///
/// A failing task is recorded as `Err` in its slot and does not affect its
/// siblings. Once the shared context is canceled or times out, tasks that
/// have not started yet are skipped and recorded as `Canceled` or
/// `DeadlineExceeded`; tasks already running are left to finish.
///
/// # Errors
///
/// Only if the runtime fails to join a task (for instance a panicking task).
pub async fn run<C, T>(
  client: &C,
  parent: &TaskContext,
  tasks: Vec<BatchTask<C, T>>,
  options: &BatchOptions,
) -> Result<Vec<Result<T>>>
where
  C: Clone + Send + 'static,
  T: Send + 'static,
{
  if tasks.is_empty() {
    return Ok(Vec::new());
  }

  let ctx = match options.timeout {
    Some(timeout) => parent.with_timeout(timeout),
    None => parent.child(),
  };
  let permits = options
    .max_concurrency
    .map_or(tasks.len(), |max| max.get().min(tasks.len()));
  let semaphore = Arc::new(Semaphore::new(permits));
  debug!(tasks = tasks.len(), permits, timeout = ?options.timeout, "starting batch");

  let handles: Vec<_> = tasks
    .into_iter()
    .enumerate()
    .map(|(index, task)| {
      let client = client.clone();
      let ctx = ctx.clone();
      let semaphore = Arc::clone(&semaphore);

      tokio::spawn(async move {
        let permit = tokio::select! {
          biased;
          () = ctx.done() => None,
          permit = semaphore.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
          return Err(ctx.error().unwrap_or(Error::Canceled));
        };
        if let Some(err) = ctx.error() {
          return Err(err);
        }

        debug!(index, "dispatching task");
        task(client, ctx).await
      })
    })
    .collect();

  let mut results = Vec::with_capacity(handles.len());
  for handle in handles {
    results.push(handle.await?);
  }

  debug!(
    succeeded = results.iter().filter(|r| r.is_ok()).count(),
    failed = results.iter().filter(|r| r.is_err()).count(),
    "batch finished"
  );
  Ok(results)
}
