use crate::api::{
  self, BatchOptions, Client, IteratorOptions, ScanOptions, TaskContext,
  WaitOptions,
};
use crate::cli::{
  self, BrandAction, Cli, Command, ConfigAction, PagingArgs, ProCommand,
  SavedSearchAction, ScanArgs, VisibilityAction, WaitArgs,
};
use crate::input;
use crate::results;
use crate::steps;
use crate::user_config::{self, UserConfig};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub struct App {
  cli: Cli,
  config: UserConfig,
  client: Client,
  ctx: TaskContext,
}

fn scan_options(url: &str, args: &ScanArgs) -> ScanOptions {
  ScanOptions {
    url: url.to_string(),
    visibility: args.visibility.clone(),
    tags: args.tags.clone(),
    country: args.country.clone(),
    referer: args.referer.clone(),
    custom_agent: args.customagent.clone(),
    override_safety: args.override_safety.clone(),
  }
}

fn wait_options(args: &WaitArgs) -> Option<WaitOptions> {
  args
    .wait
    .then(|| WaitOptions::with_max_wait(Duration::from_secs(args.max_wait)))
}

fn paging_options(paging: &PagingArgs) -> IteratorOptions {
  IteratorOptions::default()
    .page_size(paging.size)
    .limit(cli::item_limit(paging.limit, paging.all))
}

fn progress_bar(len: usize, hidden: bool) -> ProgressBar {
  if hidden {
    return ProgressBar::hidden();
  }
  let bar = ProgressBar::new(len as u64);
  if let Ok(style) = ProgressStyle::with_template(
    "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} submitted",
  ) {
    bar.set_style(style.progress_chars("=> "));
  }
  bar
}

impl App {
  pub fn new(cli: Cli, ctx: TaskContext) -> Result<Self> {
    let config = user_config::load();
    let api_key = config.resolve_api_key(cli.api_key.clone());
    if api_key.is_none() {
      debug!("no API key configured, requests are anonymous");
    }
    let client = Client::builder()
      .host(config.resolve_host(cli.host.clone()))
      .api_key(api_key)
      .user_agent(format!("urlscan-cli/{}", env!("CARGO_PKG_VERSION")))
      .build()
      .context("Failed to build the API client")?;

    Ok(Self {
      cli,
      config,
      client,
      ctx,
    })
  }

  pub async fn run(&self) -> Result<()> {
    match &self.cli.command {
      Command::Scan { url, scan, wait } => self.run_scan(url, scan, wait).await,
      Command::BulkSubmit {
        inputs,
        scan,
        wait,
        max_concurrency,
        timeout,
      } => {
        let options =
          BatchOptions::new(*max_concurrency, Duration::from_secs(*timeout));
        self.run_bulk_submit(inputs, scan, wait, &options).await
      }
      Command::Result { uuid, wait } => self.run_result(uuid, wait).await,
      Command::Search {
        query,
        paging,
        search_after,
        datasource,
        collapse,
      } => {
        let mut options = paging_options(paging)
          .query(input::resolve_arg(query)?)
          .cursor(search_after.clone())
          .param("datasource", datasource.as_str());
        if let Some(collapse) = collapse {
          options = options.param("collapse", collapse.as_str());
        }
        let it = self.client.search(options)?.with_context(self.ctx.clone());
        results::print_json(&steps::drain(it).await?)
      }
      Command::Similar {
        uuid,
        paging,
        search_after,
      } => {
        let uuid = input::resolve_arg(uuid)?;
        input::validate_uuid(&uuid)?;
        let options = paging_options(paging).cursor(search_after.clone());
        let it = self
          .client
          .similar(&uuid, options)?
          .with_context(self.ctx.clone());
        results::print_json(&steps::drain(it).await?)
      }
      Command::Hostname {
        hostname,
        limit,
        size,
        all,
        page_state,
      } => {
        let hostname = input::resolve_arg(hostname)?;
        let options = IteratorOptions::default()
          .page_size(*size)
          .limit(cli::item_limit(*limit, *all))
          .cursor(page_state.clone());
        let it = self
          .client
          .hostname(&hostname, options)?
          .with_context(self.ctx.clone());
        results::print_json(&steps::drain(it).await?)
      }
      Command::Quotas => self.print_call("quotas", self.client.quotas()).await,
      Command::User => self.print_call("user", self.client.user()).await,
      Command::Countries => {
        let call = self.client.available_countries();
        self.print_call("available countries", call).await
      }
      Command::UserAgents => {
        self.print_call("user agents", self.client.user_agents()).await
      }
      Command::Pro { command } => self.run_pro(command).await,
      Command::Config { action } => self.run_config(action),
    }
  }

  async fn run_scan(
    &self,
    url: &str,
    scan: &ScanArgs,
    wait: &WaitArgs,
  ) -> Result<()> {
    let url = input::resolve_arg(url)?;
    input::validate_network_indicator(&url)?;
    let result = steps::submit_scan(
      &self.client,
      &self.ctx,
      &scan_options(&url, scan),
      wait_options(wait).as_ref(),
    )
    .await
    .with_context(|| format!("Scan of {url} failed"))?;
    results::print_json(&result)
  }

  async fn run_bulk_submit(
    &self,
    inputs: &[String],
    scan: &ScanArgs,
    wait: &WaitArgs,
    options: &BatchOptions,
  ) -> Result<()> {
    let (urls, rejected) =
      input::partition_indicators(input::expand_file_args(inputs)?);
    for value in &rejected {
      warn!(input = %value, "skipping invalid URL, domain or IP");
    }
    if urls.is_empty() {
      anyhow::bail!("No valid URLs to submit");
    }

    let progress = progress_bar(urls.len(), self.cli.quiet);
    let outcomes = steps::bulk_submit(
      &self.client,
      &self.ctx,
      &urls,
      &scan_options("", scan),
      wait_options(wait).as_ref(),
      options,
      &progress,
    )
    .await?;

    results::print_json(&results::pair_results(&urls, &outcomes))?;
    if !self.cli.quiet {
      results::print_batch_summary(&urls, &outcomes);
    }
    Ok(())
  }

  async fn run_result(&self, uuid: &str, wait: &WaitArgs) -> Result<()> {
    let uuid = input::resolve_arg(uuid)?;
    input::validate_uuid(&uuid)?;
    let result = match wait_options(wait) {
      Some(options) => {
        self
          .client
          .wait_for_result(&self.ctx, &uuid, &options)
          .await
      }
      None => self.ctx.run(self.client.get_result(&uuid)).await,
    }
    .with_context(|| format!("Failed to fetch result {uuid}"))?;
    results::print_json(&result)
  }

  /// Runs one API call under the root context and prints its answer.
  async fn print_call<F>(&self, what: &str, call: F) -> Result<()>
  where
    F: Future<Output = api::Result<Value>>,
  {
    let value = self
      .ctx
      .run(call)
      .await
      .with_context(|| format!("Failed to fetch {what}"))?;
    results::print_json(&value)
  }

  async fn run_pro(&self, command: &ProCommand) -> Result<()> {
    match command {
      ProCommand::Visibility { action } => match action {
        VisibilityAction::Update { uuid, visibility } => {
          let uuid = input::resolve_arg(uuid)?;
          input::validate_uuid(&uuid)?;
          let call = self.client.update_visibility(&uuid, visibility);
          self.print_call("visibility update", call).await
        }
        VisibilityAction::Reset { uuid } => {
          let uuid = input::resolve_arg(uuid)?;
          input::validate_uuid(&uuid)?;
          let call = self.client.reset_visibility(&uuid);
          self.print_call("visibility reset", call).await
        }
      },
      ProCommand::Brand { action } => match action {
        BrandAction::List => {
          self.print_call("brands", self.client.brands()).await
        }
        BrandAction::Available => {
          let call = self.client.available_brands();
          self.print_call("available brands", call).await
        }
      },
      ProCommand::Search { action } => match action {
        SavedSearchAction::List => {
          let call = self.client.saved_searches();
          self.print_call("saved searches", call).await
        }
        SavedSearchAction::Get { id } => {
          let id = input::resolve_arg(id)?;
          input::validate_uuid(&id)?;
          let call = self.client.saved_search_results(&id);
          self.print_call("saved search results", call).await
        }
      },
    }
  }

  fn run_config(&self, action: &ConfigAction) -> Result<()> {
    let mut config = self.config.clone();
    match action {
      ConfigAction::Show => return results::print_json(&config.redacted()),
      ConfigAction::SetKey { key } => config.api_key = Some(key.clone()),
      ConfigAction::SetHost { host } => config.host = Some(host.clone()),
    }
    user_config::store(&config).context("Failed to save the configuration")?;
    eprintln!("Configuration saved to {}", user_config::path()?.display());
    Ok(())
  }
}
