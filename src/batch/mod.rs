//! Bounded concurrent fan-out over a fixed list of assets.
//!
//! [`BatchRunner`] runs one task per asset, at most `concurrency` at a
//! time, and collects every outcome into a [`BatchReport`]. A failing asset
//! never aborts the batch: its error is recorded next to the successes.
//!
//! # Example
//!
//! ```no_run
//! use inlyse_core::api::{ClientConfig, LicenseKey, WebClient};
//! use inlyse_core::batch::BatchRunner;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WebClient::new(LicenseKey::new("my-key"), ClientConfig::default())?;
//! let runner = BatchRunner::new(4)?;
//! let urls = vec!["https://example.com/a.pdf".to_string()];
//! let report = runner
//!     .run(urls, move |url| {
//!         let client = client.clone();
//!         async move { client.scan_url(&url).await.map(|e| e.content().to_json_value()) }
//!     })
//!     .await;
//! println!("{}", serde_json::to_string(&report)?);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 64;

/// Default number of workers.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Failure message recorded for an asset whose task panicked.
const PANICKED_TASK: &str = "worker task panicked";

/// Error type for batch setup.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Outcomes of a batch, keyed by asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport<T> {
    /// Successful results.
    pub success: BTreeMap<String, T>,
    /// Error messages of failed assets.
    pub failures: BTreeMap<String, String>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            success: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }
}

impl<T> BatchReport<T> {
    /// Number of assets processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.success.len() + self.failures.len()
    }

    /// Whether any asset failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Bounded worker pool for per-asset operations.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    concurrency: usize,
    progress: Option<ProgressBar>,
}

impl BatchRunner {
    /// Creates a runner with `concurrency` workers.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] if `concurrency` is outside
    /// `MIN_CONCURRENCY..=MAX_CONCURRENCY`.
    pub fn new(concurrency: usize) -> Result<Self, BatchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(BatchError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            concurrency,
            progress: None,
        })
    }

    /// Advances `bar` by one for every finished asset.
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Configured number of workers.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `operation` once per asset and collects the outcomes.
    ///
    /// Assets complete in arbitrary order. Each task owns its outcome; the
    /// report is assembled after all tasks have been joined.
    #[instrument(skip(self, assets, operation), fields(assets = assets.len(), concurrency = self.concurrency))]
    pub async fn run<T, E, F, Fut>(&self, assets: Vec<String>, operation: F) -> BatchReport<T>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let operation = Arc::new(operation);
        let mut handles = Vec::with_capacity(assets.len());

        info!("starting batch");

        for asset in assets {
            let semaphore = Arc::clone(&semaphore);
            let operation = Arc::clone(&operation);
            let progress = self.progress.clone();
            let task_asset = asset.clone();

            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so acquire only fails if it were.
                let _permit = semaphore.acquire_owned().await.ok();
                debug!(asset = %task_asset, "processing asset");
                let outcome = operation(task_asset).await.map_err(|e| e.to_string());
                if let Some(bar) = progress {
                    bar.inc(1);
                }
                outcome
            });
            handles.push((asset, handle));
        }

        let mut report = BatchReport::default();
        for (asset, handle) in handles {
            match handle.await {
                Ok(Ok(value)) => {
                    report.success.insert(asset, value);
                }
                Ok(Err(message)) => {
                    warn!(asset = %asset, error = %message, "asset failed");
                    report.failures.insert(asset, message);
                }
                Err(join_error) => {
                    warn!(asset = %asset, error = %join_error, "worker task did not complete");
                    if let Some(bar) = &self.progress {
                        bar.inc(1);
                    }
                    report.failures.insert(asset, PANICKED_TASK.to_string());
                }
            }
        }

        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
        info!(
            succeeded = report.success.len(),
            failed = report.failures.len(),
            "batch finished"
        );
        report
    }
}
