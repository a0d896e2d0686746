//! Client for the INLYSE malware analysis API.
//!
//! The module is layered leaf-first:
//!
//! - [`Transport`] - reqwest session with bearer auth, timeouts and
//!   automatic retry of idempotent requests on 429/503
//! - [`Endpoint`] - declarative table of remote paths and methods
//! - [`ResponseEnvelope`] - uniform result with decoded content and
//!   rate-limit snapshot
//! - [`WebClient`] - one method per endpoint plus the submit-and-poll
//!   operations (`scan_*`, `get_analysis`, `disarm`)
//!
//! # Example
//!
//! ```no_run
//! use inlyse_core::api::{AnalysisId, ClientConfig, LicenseKey, WebClient};
//!
//! # async fn example() -> Result<(), inlyse_core::api::ApiError> {
//! let client = WebClient::new(LicenseKey::new("my-key"), ClientConfig::default())?;
//! let result = client
//!     .get_analysis(&AnalysisId::new("1a13ba09-8487-4621-b2a3-b0ff460f7a9e"))
//!     .await?;
//! println!("{}", result.content());
//! # Ok(())
//! # }
//! ```

mod analysis;
mod client;
pub mod constants;
mod endpoint;
mod envelope;
mod error;
mod retry;
mod transport;

pub use analysis::{Backoff, PollPolicy, PollStatus, Submission, Upload};
pub use client::{ClientConfig, LicenseKey, SessionState, WebClient};
pub use endpoint::{AnalysisFilter, AnalysisId, Endpoint};
pub use envelope::{
    Content, ContentType, RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER,
    RATE_LIMIT_RESET_HEADER, RateLimitSnapshot, ResponseEnvelope,
};
pub use error::{ApiError, ErrorKind};
pub use retry::{DEFAULT_MAX_RETRIES, RETRY_STATUSES, RetryDecision, TransportRetry, parse_retry_after};
pub use transport::{RequestBody, Timeout, Transport, UPLOAD_FIELD};
