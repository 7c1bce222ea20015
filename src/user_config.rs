use crate::api::DEFAULT_HOST;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

const APP_NAME: &str = "urlscan";
const FILE_NAME: Option<&str> = None;

pub const API_KEY_ENV: &str = "URLSCAN_API_KEY";
pub const HOST_ENV: &str = "URLSCAN_HOST";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct UserConfig {
  pub api_key: Option<String>,
  pub host: Option<String>,
}

/// Read ~/.config/urlscan/default-config.toml (or OS equivalent).
pub fn load() -> UserConfig {
  confy::load(APP_NAME, FILE_NAME).unwrap_or_default()
}

pub fn store(cfg: &UserConfig) -> anyhow::Result<()> {
  confy::store(APP_NAME, FILE_NAME, cfg).map_err(Into::into)
}

pub fn path() -> anyhow::Result<PathBuf> {
  confy::get_configuration_file_path(APP_NAME, FILE_NAME)
    .context("Failed to locate the configuration file")
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}

impl UserConfig {
  /// API key by precedence: flag, `URLSCAN_API_KEY`, config file.
  #[must_use]
  pub fn resolve_api_key(&self, flag: Option<String>) -> Option<String> {
    self.resolve_api_key_with(flag, env::var(API_KEY_ENV).ok())
  }

  fn resolve_api_key_with(
    &self,
    flag: Option<String>,
    env_value: Option<String>,
  ) -> Option<String> {
    non_empty(flag)
      .or_else(|| non_empty(env_value))
      .or_else(|| non_empty(self.api_key.clone()))
  }

  /// Host by precedence: flag, `URLSCAN_HOST`, config file, urlscan.io.
  #[must_use]
  pub fn resolve_host(&self, flag: Option<String>) -> String {
    self.resolve_host_with(flag, env::var(HOST_ENV).ok())
  }

  fn resolve_host_with(
    &self,
    flag: Option<String>,
    env_value: Option<String>,
  ) -> String {
    non_empty(flag)
      .or_else(|| non_empty(env_value))
      .or_else(|| non_empty(self.host.clone()))
      .unwrap_or_else(|| DEFAULT_HOST.to_string())
  }

  /// Copy safe to print: the API key is masked.
  #[must_use]
  pub fn redacted(&self) -> Self {
    Self {
      api_key: self.api_key.as_deref().map(mask),
      host: self.host.clone(),
    }
  }
}

/// Keys too short to spare a prefix are hidden entirely.
const MASK_MIN_LEN: usize = 12;

fn mask(key: &str) -> String {
  if key.chars().count() < MASK_MIN_LEN {
    return "…".to_string();
  }
  let visible: String = key.chars().take(4).collect();
  format!("{visible}…")
}
