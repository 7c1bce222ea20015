#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub mod api;
mod app;
mod cli;
pub mod input;
pub mod results;
mod steps;
mod user_config;

fn default_filter(cli: &cli::Cli) -> &'static str {
  if cli.verbose {
    "urlscan=debug"
  } else if cli.quiet {
    "urlscan=warn"
  } else {
    "urlscan=info"
  }
}

/// Logs go to stderr so stdout stays valid JSON. `RUST_LOG` wins over the
/// verbosity flags.
fn init_tracing(cli: &cli::Cli) {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_filter(cli)));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init();
}

/// Cancels the root context on Ctrl-C so in-flight batches and pagination
/// stop dispatching.
fn cancel_on_ctrl_c(ctx: &api::TaskContext) {
  let ctx = ctx.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      debug!("interrupt received, canceling");
      ctx.cancel();
    }
  });
}

/// Parses the command line, installs logging and runs the chosen command.
///
/// # Errors
///
/// Returns an error if the API client cannot be built or the command fails.
pub async fn run() -> Result<()> {
  let cli = cli::Cli::parse();
  init_tracing(&cli);

  let ctx = api::TaskContext::new();
  cancel_on_ctrl_c(&ctx);

  let app = app::App::new(cli, ctx)?;
  app.run().await
}
