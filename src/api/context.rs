use super::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline, handed to every batch task,
/// iterator fetch and poll loop.
///
/// Derived contexts share cancellation with their parent (canceling the
/// parent cancels the child) and can only tighten the deadline.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
  token: CancellationToken,
  deadline: Option<Instant>,
}

impl TaskContext {
  /// A root context with no deadline.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn child(&self) -> Self {
    Self {
      token: self.token.child_token(),
      deadline: self.deadline,
    }
  }

  /// Child context whose deadline is at most `timeout` from now.
  #[must_use]
  pub fn with_timeout(&self, timeout: Duration) -> Self {
    let at = Instant::now() + timeout;
    Self {
      token: self.token.child_token(),
      deadline: Some(self.deadline.map_or(at, |current| current.min(at))),
    }
  }

  #[must_use]
  pub const fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  /// Why this context is done, if it is. An elapsed deadline wins over
  /// cancellation so timeouts always report as timeouts.
  #[must_use]
  pub fn error(&self) -> Option<Error> {
    if self.deadline.is_some_and(|at| Instant::now() >= at) {
      Some(Error::DeadlineExceeded)
    } else if self.token.is_cancelled() {
      Some(Error::Canceled)
    } else {
      None
    }
  }

  /// Resolves once the context is canceled or its deadline passes.
  pub async fn done(&self) {
    match self.deadline {
      Some(at) => {
        tokio::select! {
          () = self.token.cancelled() => {}
          () = time::sleep_until(at) => {}
        }
      }
      None => self.token.cancelled().await,
    }
  }

  /// Runs `fut` unless the context finishes first.
  ///
  /// # Errors
  ///
  /// Returns the future's own error, or `DeadlineExceeded`/`Canceled` when the
  /// context wins the race.
  pub async fn run<T, F>(&self, fut: F) -> Result<T>
  where
    F: Future<Output = Result<T>>,
  {
    if let Some(err) = self.error() {
      return Err(err);
    }
    tokio::select! {
      biased;
      () = self.done() => Err(self.error().unwrap_or(Error::Canceled)),
      out = fut => out,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn test_timeout_reports_deadline_exceeded() {
    let ctx = TaskContext::new().with_timeout(Duration::from_secs(5));
    assert!(ctx.error().is_none());
    ctx.done().await;
    assert!(matches!(ctx.error(), Some(Error::DeadlineExceeded)));
  }

  #[tokio::test]
  async fn test_parent_cancel_propagates_to_child() {
    let root = TaskContext::new();
    let child = root.child();
    root.cancel();
    child.done().await;
    assert!(matches!(child.error(), Some(Error::Canceled)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_child_keeps_tighter_parent_deadline() {
    let parent = TaskContext::new().with_timeout(Duration::from_secs(2));
    let child = parent.with_timeout(Duration::from_secs(60));
    assert_eq!(child.deadline(), parent.deadline());
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_races_the_deadline() {
    let ctx = TaskContext::new().with_timeout(Duration::from_millis(100));
    let out: Result<()> = ctx
      .run(async {
        time::sleep(Duration::from_secs(10)).await;
        Ok(())
      })
      .await;
    assert!(matches!(out, Err(Error::DeadlineExceeded)));
  }

  #[tokio::test]
  async fn test_run_passes_through_result() {
    let ctx = TaskContext::new();
    let out = ctx.run(async { Ok(7) }).await;
    assert_eq!(out.unwrap(), 7);
  }
}
