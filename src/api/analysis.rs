//! Submit-and-poll protocol.
//!
//! An upload only starts an analysis; the result has to be fetched later.
//! [`WebClient::scan`] submits a document and then polls the check endpoint
//! until the analysis is done:
//!
//! ```text
//! SUBMITTED -> POLLING -> DONE          (200)
//!                      -> RATE_LIMITED  (429)
//!                      -> ERROR         (any other status)
//!                      -> EXHAUSTED     (still 202 after max_retries checks)
//! ```
//!
//! Before the first check the poller sleeps a courtesy wait sized to the
//! service's own estimate. Before every check it additionally sleeps a
//! jittered exponential backoff drawn from `[0, min(cap, base * 2^attempt)]`.

use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::client::WebClient;
use super::constants::{
    COURTESY_WAIT_FACTOR, DEFAULT_ESTIMATED_ANALYSIS_TIME_SECS, GET_ANALYSIS_MAX_RETRIES,
    MAX_COURTESY_WAIT, SCAN_MAX_RETRIES,
};
use super::endpoint::AnalysisId;
use super::envelope::ResponseEnvelope;
use super::error::ApiError;

/// Default base of the poll backoff (0.1 seconds).
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Default cap of the poll backoff (40 seconds).
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(40);

/// Jittered exponential backoff between status checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl Backoff {
    /// Creates a backoff with a custom base and cap.
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// A backoff that never sleeps.
    #[must_use]
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Largest delay that can be drawn for `attempt`: `min(cap, base * 2^attempt)`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use inlyse_core::api::Backoff;
    ///
    /// let backoff = Backoff::default();
    /// assert_eq!(backoff.upper_bound(0), Duration::from_millis(100));
    /// assert_eq!(backoff.upper_bound(3), Duration::from_millis(800));
    /// assert_eq!(backoff.upper_bound(20), Duration::from_secs(40));
    /// ```
    #[must_use]
    pub fn upper_bound(&self, attempt: u32) -> Duration {
        let cap = self.cap.as_nanos();
        let grown = 1_u128
            .checked_shl(attempt)
            .and_then(|factor| self.base.as_nanos().checked_mul(factor))
            .unwrap_or(u128::MAX);
        let bound = grown.min(cap);
        Duration::from_nanos(u64::try_from(bound).unwrap_or(u64::MAX))
    }

    /// Draws a delay uniformly from `[0, upper_bound(attempt)]`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let upper = self.upper_bound(attempt).as_secs_f64();
        if upper <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=upper))
    }
}

/// Budget and backoff of one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of status checks.
    pub max_retries: u32,
    /// Backoff drawn before every check.
    pub backoff: Backoff,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Policy of the `scan_*` operations (15 checks).
    #[must_use]
    pub fn scan(backoff: Backoff) -> Self {
        Self::new(SCAN_MAX_RETRIES, backoff)
    }

    /// Policy of a direct result fetch (3 checks).
    #[must_use]
    pub fn fetch(backoff: Backoff) -> Self {
        Self::new(GET_ANALYSIS_MAX_RETRIES, backoff)
    }
}

/// Classification of a status-check response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// 200: the result is available.
    Done,
    /// 202: the analysis is still running.
    Pending,
    /// 429: the quota is used up.
    RateLimited,
    /// Anything else ends the loop with an error.
    Failed,
}

impl PollStatus {
    /// Classifies a check status code.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => Self::Done,
            202 => Self::Pending,
            429 => Self::RateLimited,
            _ => Self::Failed,
        }
    }
}

/// An accepted upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Identifier of the new analysis.
    pub id: AnalysisId,
    /// The service's estimate of the analysis time, in seconds.
    pub estimated_analysis_time: f64,
}

impl Submission {
    /// Interprets the envelope of an upload call.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::RateLimitExceeded`] for 429, [`ApiError::Api`] for
    /// any other status outside 2xx and [`ApiError::Decode`] if the body has
    /// no `id` or `EstimatedAnalysisTime`.
    pub fn from_envelope(envelope: ResponseEnvelope) -> Result<Self, ApiError> {
        let status = envelope.status();
        if status == 429 {
            return Err(ApiError::RateLimitExceeded);
        }
        if !envelope.is_success() {
            return Err(ApiError::api(status, envelope.into_content()));
        }

        let Some(body) = envelope.content().as_json() else {
            return Err(ApiError::decode(
                envelope.endpoint(),
                "upload response is not JSON",
            ));
        };
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::decode(envelope.endpoint(), "missing analysis id"))?;
        let estimated_analysis_time = body
            .get("EstimatedAnalysisTime")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                ApiError::decode(envelope.endpoint(), "missing EstimatedAnalysisTime")
            })?;

        Ok(Self {
            id: AnalysisId::new(id),
            estimated_analysis_time,
        })
    }

    /// Wait before the first status check (a fifth of the estimate).
    #[must_use]
    pub fn courtesy_wait(&self) -> Duration {
        secs_to_duration(self.estimated_analysis_time * COURTESY_WAIT_FACTOR)
    }
}

/// Courtesy wait for an estimate in seconds, capped at [`MAX_COURTESY_WAIT`].
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).map_or(MAX_COURTESY_WAIT, |wait| wait.min(MAX_COURTESY_WAIT))
}

/// A document to submit for analysis.
#[derive(Debug, Clone)]
pub enum Upload {
    /// Local file contents.
    File {
        /// Filename reported to the service.
        filename: String,
        /// Raw bytes.
        content: Vec<u8>,
    },
    /// Remote document the service downloads itself.
    Url(String),
    /// Outlook attachment, fetched with an access token.
    Owa {
        /// Attachment URL.
        url: String,
        /// Access token for the attachment.
        token: String,
    },
}

impl Upload {
    fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Url(_) => "url",
            Self::Owa { .. } => "owa",
        }
    }
}

impl WebClient {
    /// Submits a document and returns the accepted analysis.
    ///
    /// # Errors
    ///
    /// See [`Submission::from_envelope`]; transport errors are passed through.
    #[instrument(skip(self, upload), fields(kind = upload.kind()))]
    pub async fn submit(&self, upload: Upload) -> Result<Submission, ApiError> {
        let envelope = match upload {
            Upload::File { filename, content } => self.upload_file(&filename, content).await?,
            Upload::Url(url) => self.upload_url(&url).await?,
            Upload::Owa { url, token } => self.upload_owa(&url, &token).await?,
        };
        let submission = Submission::from_envelope(envelope)?;
        info!(
            id = %submission.id,
            estimated_secs = submission.estimated_analysis_time,
            "analysis submitted"
        );
        Ok(submission)
    }

    /// Polls the check endpoint until the analysis reaches a terminal state.
    ///
    /// `courtesy_wait` is slept once before the first check; `policy`
    /// bounds the number of checks and the backoff before each of them.
    ///
    /// # Errors
    ///
    /// - [`ApiError::RateLimitExceeded`] on the first 429
    /// - [`ApiError::Api`] on any status other than 200, 202 or 429
    /// - [`ApiError::MaxRetriesExceeded`] if every check answered 202
    #[instrument(skip(self, policy), fields(id = %id, max_retries = policy.max_retries))]
    pub async fn poll_analysis(
        &self,
        id: &AnalysisId,
        courtesy_wait: Duration,
        policy: &PollPolicy,
    ) -> Result<ResponseEnvelope, ApiError> {
        for attempt in 0..policy.max_retries {
            if attempt == 0 && !courtesy_wait.is_zero() {
                debug!(
                    wait_ms = courtesy_wait.as_millis(),
                    "waiting for the estimated analysis time"
                );
                tokio::time::sleep(courtesy_wait).await;
            }
            let delay = policy.backoff.delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis(), "backing off before check");
            tokio::time::sleep(delay).await;

            let envelope = self.check(id).await?;
            match PollStatus::from_status(envelope.status()) {
                PollStatus::Done => {
                    info!(attempt, "analysis finished");
                    return Ok(envelope);
                }
                PollStatus::Pending => {
                    debug!(attempt, "analysis still pending");
                }
                PollStatus::RateLimited => {
                    warn!(attempt, "rate limit exceeded while polling");
                    return Err(ApiError::RateLimitExceeded);
                }
                PollStatus::Failed => {
                    let status = envelope.status();
                    warn!(attempt, status, "analysis check failed");
                    return Err(ApiError::api(status, envelope.into_content()));
                }
            }
        }

        warn!("poll budget exhausted while analysis is pending");
        Err(ApiError::max_retries_exceeded(policy.max_retries))
    }

    /// Fetches the result of an existing analysis with default timing
    /// (5.83675 s courtesy wait, 3 checks).
    ///
    /// # Errors
    ///
    /// See [`WebClient::poll_analysis`].
    pub async fn get_analysis(&self, id: &AnalysisId) -> Result<ResponseEnvelope, ApiError> {
        self.get_analysis_with(id, DEFAULT_ESTIMATED_ANALYSIS_TIME_SECS, GET_ANALYSIS_MAX_RETRIES)
            .await
    }

    /// Fetches the result of an existing analysis.
    ///
    /// # Arguments
    ///
    /// * `estimated_time_secs` - Courtesy wait before the first check
    /// * `max_retries` - Maximum number of checks
    ///
    /// # Errors
    ///
    /// See [`WebClient::poll_analysis`].
    pub async fn get_analysis_with(
        &self,
        id: &AnalysisId,
        estimated_time_secs: f64,
        max_retries: u32,
    ) -> Result<ResponseEnvelope, ApiError> {
        let policy = PollPolicy::new(max_retries, self.config().backoff);
        self.poll_analysis(id, secs_to_duration(estimated_time_secs), &policy)
            .await
    }

    /// Submits a document and waits for its result using `policy`.
    ///
    /// # Errors
    ///
    /// Returns the submit error, or any error of [`WebClient::poll_analysis`].
    pub async fn scan_with(
        &self,
        upload: Upload,
        policy: &PollPolicy,
    ) -> Result<ResponseEnvelope, ApiError> {
        let submission = self.submit(upload).await?;
        self.poll_analysis(&submission.id, submission.courtesy_wait(), policy)
            .await
    }

    /// Submits a document and waits for its result (up to 15 checks).
    ///
    /// # Errors
    ///
    /// Returns the submit error, or any error of [`WebClient::poll_analysis`].
    pub async fn scan(&self, upload: Upload) -> Result<ResponseEnvelope, ApiError> {
        let policy = PollPolicy::scan(self.config().backoff);
        self.scan_with(upload, &policy).await
    }

    /// Uploads a local document and waits for its result.
    ///
    /// # Errors
    ///
    /// See [`WebClient::scan`].
    pub async fn scan_file(
        &self,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<ResponseEnvelope, ApiError> {
        self.scan(Upload::File {
            filename: filename.to_string(),
            content,
        })
        .await
    }

    /// Submits a remote document and waits for its result.
    ///
    /// # Errors
    ///
    /// See [`WebClient::scan`].
    pub async fn scan_url(&self, url: &str) -> Result<ResponseEnvelope, ApiError> {
        self.scan(Upload::Url(url.to_string())).await
    }

    /// Submits an Outlook attachment and waits for its result.
    ///
    /// # Errors
    ///
    /// See [`WebClient::scan`].
    pub async fn scan_owa(&self, url: &str, token: &str) -> Result<ResponseEnvelope, ApiError> {
        self.scan(Upload::Owa {
            url: url.to_string(),
            token: token.to_string(),
        })
        .await
    }

    /// Sanitizes a local document in a single call.
    ///
    /// The envelope content holds the disarmed PDF.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::RateLimitExceeded`] for 429 and [`ApiError::Api`]
    /// for any status other than 200.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn disarm(
        &self,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<ResponseEnvelope, ApiError> {
        let envelope = self.disarm_file(filename, content).await?;
        match envelope.status() {
            200 => Ok(envelope),
            429 => Err(ApiError::RateLimitExceeded),
            status => Err(ApiError::api(status, envelope.into_content())),
        }
    }
}
