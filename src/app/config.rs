//! Optional file configuration for CLI defaults.
//!
//! The file uses `key = value` lines with `#` comments:
//!
//! ```text
//! license_key = "0123-abcd"
//! url = "https://malware.ai"
//! threads = 8
//! timeout = 10.0
//! ```
//!
//! Command-line flags (and `INLYSE_LICENSE_KEY`) take precedence.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::cli::{parse_threads, parse_timeout};

/// Values read from the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    /// License key for the API.
    pub license_key: Option<String>,
    /// Service origin.
    pub url: Option<String>,
    /// Number of parallel workers.
    pub threads: Option<usize>,
    /// Request timeout in seconds.
    pub timeout: Option<f64>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/inlyse/config.toml`
/// 2. `$HOME/.config/inlyse/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("inlyse")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("inlyse")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file from the default path, if one exists.
pub fn load_default_file_config() -> Result<FileConfig> {
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let value = raw_value.trim();

        match raw_key.trim() {
            "license_key" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `license_key` value on line {line_no}"))?;
                cfg.license_key = Some(parsed);
            }
            "url" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `url` value on line {line_no}"))?;
                url::Url::parse(&parsed)
                    .with_context(|| format!("Invalid `url` value on line {line_no}"))?;
                cfg.url = Some(parsed);
            }
            "threads" => {
                let parsed = parse_threads(value).map_err(anyhow::Error::msg).with_context(
                    || format!("Invalid `threads` value on line {line_no}"),
                )?;
                cfg.threads = Some(parsed);
            }
            "timeout" => {
                let parsed = parse_timeout(value).map_err(anyhow::Error::msg).with_context(
                    || format!("Invalid `timeout` value on line {line_no}"),
                )?;
                cfg.timeout = Some(parsed);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
license_key = "abc-123"
url = "http://localhost:9000"
threads = 8
timeout = 2.5
"#,
        )
        .unwrap();
        assert_eq!(
            cfg,
            FileConfig {
                license_key: Some("abc-123".to_string()),
                url: Some("http://localhost:9000".to_string()),
                threads: Some(8),
                timeout: Some(2.5),
            }
        );
    }

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str("threads = 2").unwrap();
        assert_eq!(cfg.threads, Some(2));
        assert!(cfg.license_key.is_none());
        assert!(cfg.url.is_none());
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
# service settings
license_key = "key#with-hash" # quoted hash is kept
threads = 4 # workers
"#,
        )
        .unwrap();
        assert_eq!(cfg.license_key.as_deref(), Some("key#with-hash"));
        assert_eq!(cfg.threads, Some(4));
    }

    #[test]
    fn test_parse_config_rejects_invalid_threads() {
        let err = parse_config_str("threads = 0").unwrap_err();
        assert!(format!("{err:#}").contains("threads"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout() {
        let err = parse_config_str("timeout = -3").unwrap_err();
        assert!(format!("{err:#}").contains("timeout"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = parse_config_str("license_key = abc").unwrap_err();
        assert!(format!("{err:#}").contains("license_key"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_url() {
        let err = parse_config_str(r#"url = "not a url""#).unwrap_err();
        assert!(format!("{err:#}").contains("url"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_key() {
        let err = parse_config_str("colour = \"blue\"").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("threads 4").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_load_file_config_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "threads = 3\n").unwrap();
        let cfg = load_file_config(&path).unwrap();
        assert_eq!(cfg.threads, Some(3));
    }

    #[test]
    fn test_load_file_config_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bogus\n").unwrap();
        let err = load_file_config(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
