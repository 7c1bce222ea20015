//! Reading and validating command arguments.
//!
//! Arguments may be literal values, `-` for a value on stdin, or (for bulk
//! submission) paths to files holding whitespace-separated values.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;
use std::sync::LazyLock;
use url::Url;

static RE_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}\.?$",
  )
  .unwrap()
});

static RE_UUID: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
  )
  .unwrap()
});

/// Resolves a single argument, reading the first non-empty line of `reader`
/// when the argument is `-`.
///
/// # Errors
///
/// Fails if stdin cannot be read or holds no value.
pub fn resolve_single(arg: &str, reader: impl BufRead) -> Result<String> {
  if arg != "-" {
    return Ok(arg.to_string());
  }
  for line in reader.lines() {
    let line = line.context("Failed to read from stdin")?;
    let value = line.trim();
    if !value.is_empty() {
      return Ok(value.to_string());
    }
  }
  bail!("No value provided on stdin")
}

/// Like [`resolve_single`] but reading the process's stdin.
///
/// # Errors
///
/// See [`resolve_single`].
pub fn resolve_arg(arg: &str) -> Result<String> {
  resolve_single(arg, std::io::stdin().lock())
}

/// Expands arguments that name existing files into the words they contain;
/// every other argument is kept as is.
///
/// # Errors
///
/// Fails if an existing file cannot be read.
pub fn expand_file_args(args: &[String]) -> Result<Vec<String>> {
  let mut values = Vec::new();
  for arg in args {
    let path = Path::new(arg);
    if path.is_file() {
      let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
      values.extend(content.split_whitespace().map(str::to_owned));
    } else {
      values.push(arg.clone());
    }
  }
  Ok(values)
}

/// Accepts IP addresses, domain names and http(s) URLs.
///
/// # Errors
///
/// Returns a description of why `value` was rejected.
pub fn validate_network_indicator(value: &str) -> Result<()> {
  if value.parse::<IpAddr>().is_ok() || RE_DOMAIN.is_match(value) {
    return Ok(());
  }
  if let Ok(url) = Url::parse(value) {
    if matches!(url.scheme(), "http" | "https") && url.host().is_some() {
      return Ok(());
    }
  }
  bail!("invalid URL, domain or IP: {value:?}")
}

/// # Errors
///
/// Fails if `value` is not a canonical hyphenated UUID.
pub fn validate_uuid(value: &str) -> Result<()> {
  if RE_UUID.is_match(value) {
    Ok(())
  } else {
    bail!("invalid UUID format: {value}")
  }
}

/// Splits `values` into valid network indicators and rejected ones, keeping
/// their original order.
#[must_use]
pub fn partition_indicators(values: Vec<String>) -> (Vec<String>, Vec<String>) {
  values
    .into_iter()
    .partition(|value| validate_network_indicator(value).is_ok())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;
  use std::io::Write;

  #[test]
  fn test_network_indicators() {
    let valid = [
      "192.168.1.1",
      "2001:0db8:85a3:0000:0000:8a2e:0370:7334",
      "example.com",
      "sub.domain.com",
      "http://example.com",
      "https://example.com/path?query=1",
      "https://sub.domain.com:8080/path/to/resource",
      "http://example.com/#fragment",
      "https://example.com/?q=test#frag",
    ];
    for value in valid {
      assert!(validate_network_indicator(value).is_ok(), "{value}");
    }

    let invalid = ["192.168.1", "example .com", "", "invalid-input", "ftp://x.org"];
    for value in invalid {
      assert!(validate_network_indicator(value).is_err(), "{value}");
    }
  }

  #[test]
  fn test_uuid_validation() {
    assert!(validate_uuid("68e26c59-2eae-437b-aeb1-cf750fafe7d7").is_ok());
    assert!(validate_uuid("68e26c59-2eae-437b-aeb1-cf750fafe7d").is_err());
    assert!(validate_uuid("68e26c59_2eae_437b_aeb1_cf750fafe7d7").is_err());
  }

  #[test]
  fn test_resolve_single_reads_stdin_on_dash() {
    let stdin = Cursor::new("\n  page.domain:example.com \nignored\n");
    assert_eq!(
      resolve_single("-", stdin).unwrap(),
      "page.domain:example.com"
    );
    assert_eq!(resolve_single("literal", Cursor::new("")).unwrap(), "literal");
    assert!(resolve_single("-", Cursor::new("\n\n")).is_err());
  }

  #[test]
  fn test_expand_file_args_mixes_files_and_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "https://a.example\thttps://b.example\n\nc.example ").unwrap();
    let args = vec![
      file.path().display().to_string(),
      "https://d.example".to_string(),
    ];

    let values = expand_file_args(&args).unwrap();
    assert_eq!(
      values,
      vec![
        "https://a.example",
        "https://b.example",
        "c.example",
        "https://d.example"
      ]
    );
  }

  #[test]
  fn test_partition_indicators_keeps_order() {
    let (valid, invalid) = partition_indicators(vec![
      "b.example".into(),
      "nope".into(),
      "https://a.example".into(),
    ]);
    assert_eq!(valid, vec!["b.example", "https://a.example"]);
    assert_eq!(invalid, vec!["nope"]);
  }
}
