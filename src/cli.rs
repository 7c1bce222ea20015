use crate::api::VISIBILITIES;
use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "urlscan", version)]
#[command(
  about = "Submit, search and fetch scans on urlscan.io.",
  long_about = "A command-line client for the urlscan.io API: submit URLs for scanning (one at a time or in bulk), wait for and fetch scan results, and page through search and hostname history results. Results are printed as JSON on stdout; progress and diagnostics go to stderr."
)]
pub struct Cli {
  #[command(subcommand)]
  pub command: Command,

  /// API key. Overrides `URLSCAN_API_KEY` and the config file.
  #[arg(long = "api-key", global = true, value_name = "API_KEY")]
  pub api_key: Option<String>,

  /// API host, e.g. `https://urlscan.io`. Overrides `URLSCAN_HOST`.
  #[arg(long, global = true, value_name = "HOST")]
  pub host: Option<String>,

  /// Log debug details (requests, pages, dispatch) to stderr.
  #[arg(short, long, global = true, conflicts_with = "quiet")]
  pub verbose: bool,

  /// Only log warnings and errors.
  #[arg(short, long, global = true)]
  pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Submit one URL to scan.
  Scan {
    /// URL to scan, or `-` to read it from stdin.
    url: String,
    #[command(flatten)]
    scan: ScanArgs,
    #[command(flatten)]
    wait: WaitArgs,
  },

  /// Submit many URLs to scan concurrently.
  ///
  /// Arguments naming existing files are expanded to the URLs they contain
  /// (separated by newlines, spaces or tabs).
  BulkSubmit {
    /// URLs or files of URLs.
    #[arg(required = true, value_name = "URL_OR_FILE")]
    inputs: Vec<String>,
    #[command(flatten)]
    scan: ScanArgs,
    #[command(flatten)]
    wait: WaitArgs,
    /// Maximum number of submissions in flight; 0 or less is unlimited.
    #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
    max_concurrency: i64,
    /// Timeout for the whole batch in seconds; 0 means no timeout.
    #[arg(long, default_value_t = 60 * 30)]
    timeout: u64,
  },

  /// Get a scan result by UUID.
  Result {
    /// Scan UUID, or `-` to read it from stdin.
    uuid: String,
    #[command(flatten)]
    wait: WaitArgs,
  },

  /// Search scans (or another datasource) with a query.
  Search {
    /// Search query, or `-` to read it from stdin.
    query: String,
    #[command(flatten)]
    paging: PagingArgs,
    /// Resume after this `sort` value of the last result received
    /// (comma-separated `timestamp,id`).
    #[arg(long, value_name = "CURSOR")]
    search_after: Option<String>,
    /// Datasource to search: scans, hostnames, incidents, notifications,
    /// certificates.
    #[arg(short = 'D', long, default_value = "scans")]
    datasource: String,
    /// Field to collapse results on.
    #[arg(short, long)]
    collapse: Option<String>,
  },

  /// Search for scans structurally similar to a given scan.
  Similar {
    /// Scan UUID, or `-` to read it from stdin.
    uuid: String,
    #[command(flatten)]
    paging: PagingArgs,
    #[arg(long, value_name = "CURSOR")]
    search_after: Option<String>,
  },

  /// Historical observations of a hostname.
  Hostname {
    /// Hostname, or `-` to read it from stdin.
    hostname: String,
    /// Maximum number of results returned overall.
    #[arg(short, long, default_value_t = 10_000)]
    limit: usize,
    /// Results requested per page (sent as the endpoint's `limit`).
    #[arg(short, long, default_value_t = 1_000)]
    size: usize,
    /// Ignore `--limit` and fetch every page.
    #[arg(long)]
    all: bool,
    /// Continue from the `pageState` of a previous call.
    #[arg(short, long)]
    page_state: Option<String>,
  },

  /// Show API quotas.
  Quotas,

  /// Show the user or API key making the requests.
  User,

  /// List the countries a scan can be run from.
  Countries,

  /// List the user agents a scan can use.
  UserAgents,

  /// urlscan Pro features.
  Pro {
    #[command(subcommand)]
    command: ProCommand,
  },

  /// Show or change the stored configuration.
  Config {
    #[command(subcommand)]
    action: ConfigAction,
  },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProCommand {
  /// Change who can see a scan result.
  Visibility {
    #[command(subcommand)]
    action: VisibilityAction,
  },
  /// Brands tracked by brand detection.
  Brand {
    #[command(subcommand)]
    action: BrandAction,
  },
  /// Saved searches.
  Search {
    #[command(subcommand)]
    action: SavedSearchAction,
  },
}

#[derive(Subcommand, Debug, Clone)]
pub enum VisibilityAction {
  /// Set the visibility of a scan owned by you or your team.
  Update {
    /// Scan UUID, or `-` to read it from stdin.
    uuid: String,
    #[arg(long, required = true, value_parser = PossibleValuesParser::new(VISIBILITIES))]
    visibility: String,
  },
  /// Restore the visibility the scan was submitted with.
  Reset {
    /// Scan UUID, or `-` to read it from stdin.
    uuid: String,
  },
}

#[derive(Subcommand, Debug, Clone)]
pub enum BrandAction {
  /// Brands with their detection patterns.
  List,
  /// Names of the brands available for detection.
  Available,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SavedSearchAction {
  /// List your saved searches.
  List,
  /// Latest results of a saved search.
  Get {
    /// Saved search id, or `-` to read it from stdin.
    id: String,
  },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
  /// Print the stored configuration (API key masked).
  Show,
  /// Store an API key in the config file.
  SetKey { key: String },
  /// Store a default API host in the config file.
  SetHost { host: String },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ScanArgs {
  /// One of public, unlisted, private.
  #[arg(long)]
  pub visibility: Option<String>,
  /// Tag to attach to the scan (repeatable).
  #[arg(short, long = "tag", value_name = "TAG")]
  pub tags: Vec<String>,
  /// Country to scan from (ISO 3166-1 alpha-2).
  #[arg(short, long)]
  pub country: Option<String>,
  /// Referer header to send.
  #[arg(long)]
  pub referer: Option<String>,
  /// User-Agent the scanner should use.
  #[arg(long)]
  pub customagent: Option<String>,
  /// Scan even if the target is on a safety list.
  #[arg(long)]
  pub override_safety: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct WaitArgs {
  /// Wait for the scan to finish and print its result.
  #[arg(short, long)]
  pub wait: bool,
  /// Maximum seconds to wait for a result.
  #[arg(short = 'm', long, default_value_t = 60)]
  pub max_wait: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PagingArgs {
  /// Results requested per page.
  #[arg(short, long, default_value_t = 100)]
  pub size: usize,
  /// Maximum number of results returned overall.
  #[arg(short, long, default_value_t = 10_000)]
  pub limit: usize,
  /// Ignore `--limit` and fetch every page.
  #[arg(long)]
  pub all: bool,
}

/// `--all` lifts the limit entirely.
#[must_use]
pub const fn item_limit(limit: usize, all: bool) -> Option<usize> {
  if all {
    None
  } else {
    Some(limit)
  }
}
