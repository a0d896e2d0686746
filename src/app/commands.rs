//! Subcommand handlers. Batch commands print a `{"success", "failures"}`
//! JSON object on stdout; `list` and `stats` print the raw response content.

use std::future::Future;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow};
use inlyse_core::{AnalysisFilter, AnalysisId, BatchReport, BatchRunner, Content, WebClient};
use serde_json::{Value, json};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::preflight::Quota;
use super::terminal::{batch_progress, confirm};
use crate::ProcessExit;

/// File name suffix of a disarmed document.
const DISARMED_SUFFIX: &str = "disarmed.pdf";

/// Shared state of a single invocation.
pub(crate) struct CommandContext {
    pub client: WebClient,
    pub threads: usize,
    pub quota: Quota,
    pub assume_yes: bool,
}

impl CommandContext {
    /// Asks before starting a batch that may exhaust the quota.
    fn quota_allows(&self, assets: usize, input: &mut impl BufRead) -> Result<bool> {
        if self.assume_yes || !self.quota.is_critical_for(assets) {
            return Ok(true);
        }
        let remaining = self.quota.remaining.unwrap_or_default();
        let prompt = format!(
            "Critical Rate-Limit: You have just {remaining} requests left. \
             Do you want to continue anyway ..."
        );
        confirm(&prompt, input).context("Failed to read confirmation from stdin")
    }

    async fn run_batch<F, Fut>(
        &self,
        assets: Vec<String>,
        desc: &str,
        unit: &str,
        operation: F,
    ) -> Result<Option<BatchReport<Value>>>
    where
        F: Fn(WebClient, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if !self.quota_allows(assets.len(), &mut std::io::stdin().lock())? {
            return Ok(None);
        }

        let runner = BatchRunner::new(self.threads)?
            .with_progress(batch_progress(assets.len(), desc, unit));
        let client = self.client.clone();
        let report = runner
            .run(assets, move |asset| operation(client.clone(), asset))
            .await;
        Ok(Some(report))
    }
}

fn print_report(report: Option<&BatchReport<Value>>) -> Result<ProcessExit> {
    let Some(report) = report else {
        eprintln!("Aborted!");
        return Ok(ProcessExit::Failure);
    };
    println!("{}", serde_json::to_string(report)?);
    Ok(ProcessExit::Success)
}

fn path_asset(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn read_document(asset: &str) -> Result<Vec<u8>> {
    tokio::fs::read(asset)
        .await
        .with_context(|| format!("Failed to read '{asset}'"))
}

/// `scan file`
pub(crate) async fn scan_files(ctx: &CommandContext, filenames: &[PathBuf]) -> Result<ProcessExit> {
    let assets = filenames.iter().map(|p| path_asset(p)).collect();
    let report = ctx
        .run_batch(assets, "Scanning", "file", |client, asset| async move {
            let content = read_document(&asset).await?;
            let envelope = client.scan_file(&asset, content).await?;
            Ok::<_, anyhow::Error>(envelope.into_content().to_json_value())
        })
        .await?;
    print_report(report.as_ref())
}

/// `scan url`
pub(crate) async fn scan_urls(ctx: &CommandContext, urls: &[String]) -> Result<ProcessExit> {
    let report = ctx
        .run_batch(urls.to_vec(), "Scanning", "url", |client, url| async move {
            let envelope = client.scan_url(&url).await?;
            Ok::<_, anyhow::Error>(envelope.into_content().to_json_value())
        })
        .await?;
    print_report(report.as_ref())
}

/// `disarm`: each disarmed document is written to
/// `<output_folder>/<stem>.disarmed.pdf` by the task that fetched it.
pub(crate) async fn disarm_files(
    ctx: &CommandContext,
    output_folder: &Path,
    filenames: &[PathBuf],
) -> Result<ProcessExit> {
    let assets = filenames.iter().map(|p| path_asset(p)).collect();
    let output_folder = output_folder.to_path_buf();
    let report = ctx
        .run_batch(assets, "Disarming", "file", move |client, asset| {
            let output_folder = output_folder.clone();
            async move {
                let content = read_document(&asset).await?;
                let envelope = client.disarm(&asset, content).await?;
                let destination = disarmed_path(&output_folder, &asset);
                write_disarmed(&destination, envelope.content()).await?;
                info!(asset = %asset, dst = %destination.display(), "document disarmed");
                Ok::<_, anyhow::Error>(json!({ "dst": destination.to_string_lossy() }))
            }
        })
        .await?;
    print_report(report.as_ref())
}

fn disarmed_path(output_folder: &Path, asset: &str) -> PathBuf {
    let stem = Path::new(asset)
        .file_stem()
        .map_or_else(|| asset.into(), |s| s.to_string_lossy());
    output_folder.join(format!("{stem}.{DISARMED_SUFFIX}"))
}

async fn write_disarmed(destination: &Path, content: &Content) -> Result<()> {
    let bytes = match content {
        Content::Bytes(bytes) => bytes.clone(),
        Content::Json(value) => {
            return Err(anyhow!("Expected a document, got JSON: {value}"));
        }
    };
    tokio::fs::write(destination, bytes)
        .await
        .with_context(|| format!("Failed to write '{}'", destination.display()))
}

/// `get`
pub(crate) async fn get_analyses(ctx: &CommandContext, analysis_ids: &[Uuid]) -> Result<ProcessExit> {
    let assets = analysis_ids.iter().map(Uuid::to_string).collect();
    let report = ctx
        .run_batch(assets, "Fetching", "id", |client, id| async move {
            let envelope = client.get_analysis(&AnalysisId::new(id)).await?;
            Ok::<_, anyhow::Error>(envelope.into_content().to_json_value())
        })
        .await?;
    print_report(report.as_ref())
}

/// `list`
pub(crate) async fn list_analyses(ctx: &CommandContext, filter: AnalysisFilter) -> ProcessExit {
    debug!(%filter, "listing analyses");
    match ctx.client.list_analyses(filter.as_str()).await {
        Ok(envelope) => print_content(envelope.content()),
        Err(e) => {
            error!("{e}");
            ProcessExit::Failure
        }
    }
}

/// `stats`
pub(crate) async fn stats(ctx: &CommandContext) -> ProcessExit {
    match ctx.client.stats().await {
        Ok(envelope) => print_content(envelope.content()),
        Err(e) => {
            error!("{e}");
            ProcessExit::Failure
        }
    }
}

fn print_content(content: &Content) -> ProcessExit {
    match serde_json::to_string(&content.to_json_value()) {
        Ok(text) => {
            println!("{text}");
            ProcessExit::Success
        }
        Err(e) => {
            error!("{e}");
            ProcessExit::Failure
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use inlyse_core::{ClientConfig, LicenseKey};

    use super::*;

    fn context(remaining: Option<u64>, assume_yes: bool) -> CommandContext {
        CommandContext {
            client: WebClient::new(LicenseKey::new("k"), ClientConfig::default()).unwrap(),
            threads: 2,
            quota: Quota { remaining },
            assume_yes,
        }
    }

    #[test]
    fn test_disarmed_path_uses_file_stem() {
        let path = disarmed_path(Path::new("/out"), "docs/report.final.pdf");
        assert_eq!(path, PathBuf::from("/out/report.final.disarmed.pdf"));
    }

    #[test]
    fn test_quota_guard_skips_prompt_when_quota_suffices() {
        let ctx = context(Some(100), false);
        assert!(ctx.quota_allows(3, &mut &b""[..]).unwrap());
    }

    #[test]
    fn test_quota_guard_prompts_when_critical() {
        let ctx = context(Some(5), false);
        assert!(!ctx.quota_allows(3, &mut &b"n\n"[..]).unwrap());
        assert!(ctx.quota_allows(3, &mut &b"y\n"[..]).unwrap());
    }

    #[test]
    fn test_quota_guard_assume_yes() {
        let ctx = context(Some(0), true);
        assert!(ctx.quota_allows(10, &mut &b""[..]).unwrap());
    }

    #[tokio::test]
    async fn test_write_disarmed_rejects_json() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("a.disarmed.pdf");
        let err = write_disarmed(&dst, &Content::Json(json!({"error": "x"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Expected a document"));
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn test_write_disarmed_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("a.disarmed.pdf");
        write_disarmed(&dst, &Content::Bytes(b"%PDF-1.7".to_vec()))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"%PDF-1.7");
    }
}
