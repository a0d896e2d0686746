//! Constants for the API client (service origin, timeouts, polling defaults).

use std::time::Duration;

/// Production origin of the analysis service.
pub const DEFAULT_BASE_URL: &str = "https://malware.ai";

/// Default HTTP connect timeout (5 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default HTTP read timeout (60 seconds, analyses of large documents are slow).
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Format of the `x-ratelimit-reset` response header. Always UTC.
pub const RATE_LIMIT_RESET_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Estimated analysis time assumed when fetching an analysis directly by id.
pub const DEFAULT_ESTIMATED_ANALYSIS_TIME_SECS: f64 = 5.836_75;

/// Share of the server's `EstimatedAnalysisTime` spent as courtesy wait.
pub const COURTESY_WAIT_FACTOR: f64 = 0.2;

/// Longest courtesy wait slept before the first status check (1 hour).
pub const MAX_COURTESY_WAIT: Duration = Duration::from_secs(3600);

/// Poll budget for the upload-and-wait `scan_*` operations.
pub const SCAN_MAX_RETRIES: u32 = 15;

/// Poll budget for fetching an existing analysis.
pub const GET_ANALYSIS_MAX_RETRIES: u32 = 3;
