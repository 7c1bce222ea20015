use super::context::TaskContext;
use super::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct WaitOptions {
  pub initial_delay: Duration,
  /// Added to the delay after every not-found answer.
  pub step: Duration,
  pub max_wait: Duration,
}

impl Default for WaitOptions {
  fn default() -> Self {
    Self {
      initial_delay: Duration::from_secs(1),
      step: Duration::from_secs(1),
      max_wait: Duration::from_secs(60),
    }
  }
}

impl WaitOptions {
  #[must_use]
  pub fn with_max_wait(max_wait: Duration) -> Self {
    Self {
      max_wait,
      ..Self::default()
    }
  }
}

/// Calls `fetch` until it succeeds, sleeping 1s, 2s, 3s, ... between
/// not-found answers, for at most `options.max_wait`.
///
/// The first call is always made, even with a zero budget; only the caller's
/// own context can cut it short.
///
/// # Errors
///
/// - the first failure that is not a 404;
/// - `DeadlineExceeded` when the wait budget (or the parent's deadline) runs
///   out, never the last not-found error;
/// - `Canceled` when the parent context is canceled.
pub async fn poll_until_found<T, F, Fut>(
  parent: &TaskContext,
  options: &WaitOptions,
  mut fetch: F,
) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let ctx = parent.with_timeout(options.max_wait);
  let mut delay = options.initial_delay;
  let mut attempt = 0_u32;

  loop {
    attempt += 1;
    let bound = if attempt == 1 { parent } else { &ctx };
    match bound.run(fetch()).await {
      Ok(value) => return Ok(value),
      Err(err) if err.is_not_found() => {
        info!(
          attempt,
          delay_secs = delay.as_secs_f64(),
          "result not ready yet, waiting"
        );
      }
      Err(err) => return Err(err),
    }

    tokio::select! {
      biased;
      () = ctx.done() => {
        return Err(ctx.error().unwrap_or(Error::DeadlineExceeded));
      }
      () = tokio::time::sleep(delay) => delay += options.step,
    }
  }
}
