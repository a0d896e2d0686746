//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use inlyse_core::api::constants::DEFAULT_BASE_URL;
use inlyse_core::batch::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use inlyse_core::{AnalysisFilter, DEFAULT_CONCURRENCY};
use uuid::Uuid;

/// Environment variable holding the license key.
pub const LICENSE_KEY_ENV: &str = "INLYSE_LICENSE_KEY";

/// Scan documents with the INLYSE malware analysis API.
///
/// Every command first pings the service and checks the quota of the
/// license key. Batch commands print a JSON object with `success` and
/// `failures` keyed by asset.
#[derive(Parser, Debug)]
#[command(name = "inlyse")]
#[command(author, version, about)]
pub struct Args {
    /// The license key for the INLYSE API
    #[arg(short, long, env = LICENSE_KEY_ENV, hide_env_values = true)]
    pub license_key: Option<String>,

    /// The URL of the INLYSE API [default: https://malware.ai]
    #[arg(short, long)]
    pub url: Option<String>,

    /// Number of parallel workers (1-64) [default: 4]
    #[arg(short, long, value_parser = parse_threads)]
    pub threads: Option<usize>,

    /// HTTP request timeout in seconds [default: 5.0]
    #[arg(long, value_parser = parse_timeout)]
    pub timeout: Option<f64>,

    /// Increase output verbosity (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Continue without asking when the remaining quota looks too small
    #[arg(short = 'y', long)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan files or URLs
    Scan {
        #[command(subcommand)]
        target: ScanTarget,
    },

    /// Disarm files
    Disarm {
        /// The output folder for the disarmed documents
        #[arg(short, long, default_value = ".", value_parser = parse_existing_dir)]
        output_folder: PathBuf,

        /// Files to disarm
        #[arg(value_parser = parse_existing_path)]
        filenames: Vec<PathBuf>,
    },

    /// List all analyses
    List {
        /// Filter for the list of analyses (all, finished, unfinished, error)
        #[arg(short, long = "filter", default_value = "all", value_parser = parse_filter)]
        filter: AnalysisFilter,
    },

    /// Get some stats
    Stats,

    /// Get the analyses result(s)
    Get {
        /// Analysis identifiers (UUIDs)
        #[arg(value_parser = parse_analysis_id)]
        analysis_ids: Vec<Uuid>,
    },
}

/// Targets of `scan`.
#[derive(Subcommand, Debug)]
pub enum ScanTarget {
    /// Scan files
    File {
        /// Files to scan
        #[arg(value_parser = parse_existing_path)]
        filenames: Vec<PathBuf>,
    },

    /// Scan URLs
    Url {
        /// Public http(s) URLs to scan
        #[arg(value_parser = parse_public_url)]
        urls: Vec<String>,
    },
}

/// Default values for options that may also come from the config file.
pub mod defaults {
    use super::{DEFAULT_BASE_URL, DEFAULT_CONCURRENCY};

    /// Service origin.
    pub const URL: &str = DEFAULT_BASE_URL;
    /// Worker count.
    pub const THREADS: usize = DEFAULT_CONCURRENCY;
    /// Request timeout in seconds.
    pub const TIMEOUT_SECS: f64 = 5.0;
}

pub(crate) fn parse_threads(value: &str) -> Result<usize, String> {
    let threads: usize = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&threads) {
        Ok(threads)
    } else {
        Err(format!(
            "{threads} is not in {MIN_CONCURRENCY}..={MAX_CONCURRENCY}"
        ))
    }
}

pub(crate) fn parse_timeout(value: &str) -> Result<f64, String> {
    let timeout: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if Duration::try_from_secs_f64(timeout).is_ok_and(|d| !d.is_zero()) {
        Ok(timeout)
    } else {
        Err(format!("timeout must be a positive number of seconds, got {value}"))
    }
}

fn parse_filter(value: &str) -> Result<AnalysisFilter, String> {
    value.parse()
}

fn parse_analysis_id(value: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value.trim()).map_err(|_| format!("'{value}' is not a valid UUID"))
}

fn parse_existing_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("path '{value}' does not exist"))
    }
}

fn parse_existing_dir(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("directory '{value}' does not exist"))
    }
}

fn parse_public_url(value: &str) -> Result<String, String> {
    let url = url::Url::parse(value).map_err(|e| format!("'{value}' is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("'{value}' must use http or https"));
    }
    match url.host() {
        Some(url::Host::Domain(domain)) if domain.contains('.') && domain != "localhost" => {
            Ok(value.to_string())
        }
        Some(url::Host::Ipv4(ip)) if is_public_ipv4(ip) => Ok(value.to_string()),
        Some(url::Host::Ipv6(ip)) if !ip.is_loopback() && !ip.is_unspecified() => {
            Ok(value.to_string())
        }
        _ => Err(format!("'{value}' is not a public URL")),
    }
}

fn is_public_ipv4(ip: std::net::Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast())
}
