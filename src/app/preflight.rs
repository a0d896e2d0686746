//! Checks run before every command: the service must answer and the
//! license key must be valid and have quota left.

use std::fmt;

use chrono::Utc;
use inlyse_core::{ApiError, RateLimitSnapshot, WebClient};
use tracing::debug;

/// Margin used by the quota guard: a batch is expected to cost about this
/// many requests per asset. The value is a rule of thumb, not a service limit.
pub(crate) const QUOTA_SAFETY_FACTOR: u64 = 4;

/// Quota observed by the pre-flight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Quota {
    /// Remaining requests; `None` when the service sent no rate-limit headers.
    pub remaining: Option<u64>,
}

impl Quota {
    /// Whether `assets` queued assets may exhaust the remaining quota.
    pub(crate) fn is_critical_for(self, assets: usize) -> bool {
        let Some(remaining) = self.remaining else {
            return false;
        };
        let needed = u64::try_from(assets)
            .unwrap_or(u64::MAX)
            .saturating_mul(QUOTA_SAFETY_FACTOR);
        remaining < needed
    }
}

/// Reasons the pre-flight check aborts the invocation.
#[derive(Debug)]
pub(crate) enum PreflightFailure {
    /// 401 from the stats endpoint.
    Unauthorized,
    /// 429, or no requests left. Carries minutes until reset when known.
    RateLimited { minutes: Option<i64> },
    /// The request timed out.
    Timeout,
    /// The service could not be reached.
    Unreachable { url: String },
    /// Anything else.
    Unhandled { cause: String },
}

impl fmt::Display for PreflightFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => f.write_str("Unauthorized: Please provide a valid license key."),
            Self::RateLimited {
                minutes: Some(minutes),
            } => write!(
                f,
                "Rate-Limit Exceeded: Please try again in {} minutes.",
                minutes.max(&0)
            ),
            Self::RateLimited { minutes: None } => {
                f.write_str("Rate-Limit Exceeded: Please try again later.")
            }
            Self::Timeout => f.write_str("Timeout: The API request timed out"),
            Self::Unreachable { url } => {
                write!(f, "Unreachable: The API ({url}) is not reachable.")
            }
            Self::Unhandled { .. } => f.write_str("Exception not handled: Please report an issue."),
        }
    }
}

impl PreflightFailure {
    /// Detail behind an unhandled failure, for the debug log.
    pub(crate) fn cause(&self) -> Option<&str> {
        match self {
            Self::Unhandled { cause } => Some(cause),
            _ => None,
        }
    }

    fn from_api_error(error: ApiError, base_url: &str) -> Self {
        debug!(error = %error, "pre-flight request failed");
        match error {
            ApiError::Timeout { .. } => Self::Timeout,
            ApiError::Transport { .. } => Self::Unreachable {
                url: base_url.to_string(),
            },
            ApiError::RateLimitExceeded => Self::RateLimited { minutes: None },
            other => Self::Unhandled {
                cause: other.to_string(),
            },
        }
    }

    fn rate_limited(snapshot: Option<&RateLimitSnapshot>) -> Self {
        Self::RateLimited {
            minutes: snapshot.map(|s| s.minutes_until_reset(Utc::now())),
        }
    }
}

/// Pings the service, then validates the license key via the stats endpoint.
pub(crate) async fn run(client: &WebClient) -> Result<Quota, PreflightFailure> {
    let base_url = client.base_url().as_str().trim_end_matches('/').to_string();

    debug!("Trying to ping the API ...");
    client
        .ping()
        .await
        .map_err(|e| PreflightFailure::from_api_error(e, &base_url))?;

    debug!("Trying to get stats, to check if the license key is valid ...");
    let stats = client
        .stats()
        .await
        .map_err(|e| PreflightFailure::from_api_error(e, &base_url))?;

    let snapshot = stats.rate_limit();
    match stats.status() {
        401 => {
            debug!(content = %stats.content(), "license key rejected");
            Err(PreflightFailure::Unauthorized)
        }
        429 => Err(PreflightFailure::rate_limited(snapshot)),
        _ if snapshot.is_some_and(RateLimitSnapshot::is_exhausted) => {
            Err(PreflightFailure::rate_limited(snapshot))
        }
        status if (200..300).contains(&status) => {
            let remaining = snapshot.map(|s| s.remaining);
            debug!(?remaining, "pre-flight checks passed");
            Ok(Quota { remaining })
        }
        status => Err(PreflightFailure::Unhandled {
            cause: format!("stats returned HTTP {status}: {}", stats.content()),
        }),
    }
}
