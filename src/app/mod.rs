//! Binary-side orchestration: option resolution, pre-flight checks and
//! subcommand dispatch.

mod commands;
mod config;
mod preflight;
mod terminal;

use anyhow::{Context, Result, bail};
use inlyse_core::{ClientConfig, LicenseKey, Timeout, WebClient};
use tracing::{debug, info};

pub(crate) use terminal::{default_log_level, init_tracing};

use crate::ProcessExit;
use crate::cli::{Args, Command, LICENSE_KEY_ENV, ScanTarget, defaults};
use commands::CommandContext;
use config::FileConfig;

/// Options after merging flags, environment and the config file.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedOptions {
    license_key: String,
    url: String,
    threads: usize,
    timeout_secs: f64,
}

/// Flags (and `INLYSE_LICENSE_KEY`) win over the config file, which wins
/// over built-in defaults.
fn resolve_options(args: &Args, file: FileConfig) -> Result<ResolvedOptions> {
    let Some(license_key) = args
        .license_key
        .clone()
        .or(file.license_key)
        .filter(|key| !key.trim().is_empty())
    else {
        bail!("Missing license key: pass --license-key or set {LICENSE_KEY_ENV}");
    };

    Ok(ResolvedOptions {
        license_key,
        url: args
            .url
            .clone()
            .or(file.url)
            .unwrap_or_else(|| defaults::URL.to_string()),
        threads: args.threads.or(file.threads).unwrap_or(defaults::THREADS),
        timeout_secs: args
            .timeout
            .or(file.timeout)
            .unwrap_or(defaults::TIMEOUT_SECS),
    })
}

/// Runs one invocation of the tool.
pub(crate) async fn run(args: Args) -> Result<ProcessExit> {
    let file_config = config::load_default_file_config()?;
    let options = resolve_options(&args, file_config)?;
    debug!(
        url = %options.url,
        threads = options.threads,
        timeout_secs = options.timeout_secs,
        "options resolved"
    );

    let client_config = ClientConfig::default()
        .with_base_url(options.url.clone())
        .with_timeout(Timeout::from_secs_f64(options.timeout_secs));
    let client = WebClient::new(LicenseKey::new(options.license_key), client_config)
        .with_context(|| format!("Invalid API URL '{}'", options.url))?;

    let quota = match preflight::run(&client).await {
        Ok(quota) => quota,
        Err(failure) => {
            if let Some(cause) = failure.cause() {
                debug!(cause, "pre-flight failed");
            }
            eprintln!("{failure}");
            return Ok(ProcessExit::Failure);
        }
    };
    info!(remaining = ?quota.remaining, "API reachable and license key accepted");

    let ctx = CommandContext {
        client,
        threads: options.threads,
        quota,
        assume_yes: args.yes,
    };

    let exit = match &args.command {
        Command::Scan {
            target: ScanTarget::File { filenames },
        } => commands::scan_files(&ctx, filenames).await?,
        Command::Scan {
            target: ScanTarget::Url { urls },
        } => commands::scan_urls(&ctx, urls).await?,
        Command::Disarm {
            output_folder,
            filenames,
        } => commands::disarm_files(&ctx, output_folder, filenames).await?,
        Command::List { filter } => commands::list_analyses(&ctx, *filter).await,
        Command::Stats => commands::stats(&ctx).await,
        Command::Get { analysis_ids } => commands::get_analyses(&ctx, analysis_ids).await?,
    };

    ctx.client.close();
    Ok(exit)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_resolve_uses_defaults() {
        let args = parse(&["inlyse", "-l", "key", "stats"]);
        let options = resolve_options(&args, FileConfig::default()).unwrap();
        assert_eq!(
            options,
            ResolvedOptions {
                license_key: "key".to_string(),
                url: defaults::URL.to_string(),
                threads: defaults::THREADS,
                timeout_secs: defaults::TIMEOUT_SECS,
            }
        );
    }

    #[test]
    fn test_resolve_file_fills_missing_flags() {
        let args = Args {
            license_key: None,
            ..parse(&["inlyse", "-t", "2", "stats"])
        };
        let file = FileConfig {
            license_key: Some("from-file".to_string()),
            url: Some("http://127.0.0.1:9000".to_string()),
            threads: Some(16),
            timeout: Some(1.5),
        };
        let options = resolve_options(&args, file).unwrap();
        assert_eq!(options.license_key, "from-file");
        assert_eq!(options.url, "http://127.0.0.1:9000");
        assert_eq!(options.threads, 2);
        assert!((options.timeout_secs - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resolve_flag_wins_over_file() {
        let args = parse(&["inlyse", "-l", "flag", "-u", "http://a.example", "stats"]);
        let file = FileConfig {
            license_key: Some("file".to_string()),
            url: Some("http://b.example".to_string()),
            ..FileConfig::default()
        };
        let options = resolve_options(&args, file).unwrap();
        assert_eq!(options.license_key, "flag");
        assert_eq!(options.url, "http://a.example");
    }

    #[test]
    fn test_resolve_requires_license_key() {
        let args = Args {
            license_key: None,
            ..parse(&["inlyse", "stats"])
        };
        let err = resolve_options(&args, FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Missing license key"));
    }

    #[test]
    fn test_resolve_rejects_blank_license_key() {
        let args = parse(&["inlyse", "-l", "  ", "stats"]);
        assert!(resolve_options(&args, FileConfig::default()).is_err());
    }
}
