//! Transport-level retry policy for idempotent requests.
//!
//! The session retries GET requests automatically when the service answers
//! with a transient status (429 or 503). Other methods are never retried:
//! repeating an upload could create a second analysis.
//!
//! # Example
//!
//! ```
//! use inlyse_core::api::{RetryDecision, TransportRetry};
//! use reqwest::Method;
//!
//! let policy = TransportRetry::default();
//! match policy.should_retry(&Method::GET, 503, None, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {reason}");
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use reqwest::Method;
use tracing::{debug, instrument, warn};

use super::constants::MAX_RETRY_AFTER;

/// Default number of automatic retries after the initial request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Statuses that trigger an automatic retry.
pub const RETRY_STATUSES: [u16; 2] = [429, 503];

/// Decision on whether to repeat a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Repeat the request after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Hand the response to the caller as-is.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry configuration of the HTTP session.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - `backoff_multiplier`: 2.0
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
///
/// A parsable `Retry-After` header on the response replaces the computed delay.
#[derive(Debug, Clone)]
pub struct TransportRetry {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
}

impl Default for TransportRetry {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl TransportRetry {
    /// Creates a policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Automatic retries after the initial request (0 disables retrying)
    /// * `base_delay` - Delay before the first retry
    /// * `max_delay` - Maximum delay cap
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Disables the random jitter added to computed delays.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Returns the configured retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides whether a response should be retried.
    ///
    /// # Arguments
    ///
    /// * `method` - Method of the request that produced the response
    /// * `status` - Response status code
    /// * `retry_after` - Raw `Retry-After` header value, if any
    /// * `attempt` - The attempt number that just finished (1-indexed)
    #[instrument(skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(
        &self,
        method: &Method,
        status: u16,
        retry_after: Option<&str>,
        attempt: u32,
    ) -> RetryDecision {
        if *method != Method::GET {
            return RetryDecision::DoNotRetry {
                reason: format!("{method} requests are not retried"),
            };
        }
        if !RETRY_STATUSES.contains(&status) {
            return RetryDecision::DoNotRetry {
                reason: format!("status {status} is not transient"),
            };
        }
        if attempt > self.max_retries {
            debug!(attempt, max = self.max_retries, "retry budget spent");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let delay = retry_after
            .and_then(parse_retry_after)
            .unwrap_or_else(|| self.calculate_delay(attempt));

        debug!(
            status,
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry with exponential backoff and jitter.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        // attempt 1 = 2^0 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * self.backoff_multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter {
            calculate_jitter()
        } else {
            Duration::ZERO
        };
        Duration::from_millis(capped_ms as u64) + jitter
    }
}

#[allow(clippy::cast_possible_truncation)]
fn calculate_jitter() -> Duration {
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(0..=MAX_JITTER.as_millis() as u64))
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds (`Retry-After: 120`) and HTTP-dates
/// (`Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`). Values above one hour are
/// capped; dates in the past yield zero.
///
/// ```
/// use std::time::Duration;
/// use inlyse_core::api::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => Some(Duration::ZERO),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Decision Tests ====================

    #[test]
    fn test_default_values() {
        let policy = TransportRetry::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
    }

    #[test]
    fn test_get_503_is_retried() {
        let policy = TransportRetry::default();
        let decision = policy.should_retry(&Method::GET, 503, None, 1);
        assert!(matches!(decision, RetryDecision::Retry { attempt: 2, .. }));
    }

    #[test]
    fn test_get_429_is_retried() {
        let policy = TransportRetry::default();
        let decision = policy.should_retry(&Method::GET, 429, None, 1);
        assert!(matches!(decision, RetryDecision::Retry { .. }));
    }

    #[test]
    fn test_post_is_never_retried() {
        let policy = TransportRetry::default();
        for status in RETRY_STATUSES {
            let decision = policy.should_retry(&Method::POST, status, None, 1);
            assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
        }
    }

    #[test]
    fn test_other_statuses_not_retried() {
        let policy = TransportRetry::default();
        for status in [200, 202, 400, 401, 404, 500, 502] {
            let decision = policy.should_retry(&Method::GET, status, None, 1);
            assert!(
                matches!(decision, RetryDecision::DoNotRetry { .. }),
                "status {status} must not be retried"
            );
        }
    }

    #[test]
    fn test_budget_exhausted_after_max_retries() {
        let policy = TransportRetry::default();
        assert!(matches!(
            policy.should_retry(&Method::GET, 503, None, 3),
            RetryDecision::Retry { attempt: 4, .. }
        ));
        let decision = policy.should_retry(&Method::GET, 503, None, 4);
        match decision {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            RetryDecision::Retry { .. } => panic!("expected DoNotRetry"),
        }
    }

    #[test]
    fn test_disabled_policy_never_retries() {
        let policy = TransportRetry::disabled();
        assert!(matches!(
            policy.should_retry(&Method::GET, 503, None, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_retry_after_header_takes_precedence() {
        let policy = TransportRetry::default();
        let decision = policy.should_retry(&Method::GET, 429, Some("7"), 1);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(7),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_unparseable_retry_after_falls_back_to_backoff() {
        let policy = TransportRetry::default().without_jitter();
        let decision = policy.should_retry(&Method::GET, 429, Some("later"), 2);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(2),
                attempt: 3
            }
        );
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = TransportRetry::default().without_jitter();
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_respects_cap() {
        let policy =
            TransportRetry::new(10, Duration::from_secs(1), Duration::from_secs(5)).without_jitter();
        assert_eq!(policy.calculate_delay(6), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_jitter_within_bounds() {
        let policy = TransportRetry::default();
        for _ in 0..100 {
            let delay = policy.calculate_delay(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    // ==================== Retry-After Parsing Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_negative_is_ignored() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("86400"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_past_http_date_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_future_http_date() {
        let future = std::time::SystemTime::now() + Duration::from_secs(120);
        let header = httpdate::fmt_http_date(future);
        let parsed = parse_retry_after(&header).unwrap();
        assert!(parsed <= Duration::from_secs(120));
        assert!(parsed >= Duration::from_secs(100));
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("invalid"), None);
        assert_eq!(parse_retry_after(""), None);
    }
}
