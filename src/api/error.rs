//! Error types for the API client.
//!
//! Every remote operation returns `Result<_, ApiError>`. Callers pattern-match
//! on the variants (or on [`ApiError::kind`]) instead of inspecting messages:
//! a rejected request, an exhausted quota and an exhausted poll budget each
//! call for a different reaction.

use thiserror::Error;

use super::envelope::Content;

/// Errors that can occur while talking to the analysis service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Transport {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The base URL or a derived endpoint URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The license key cannot be sent as an HTTP header value.
    #[error("license key contains characters that are not allowed in an HTTP header")]
    InvalidCredential,

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a status that ends the operation.
    ///
    /// The response content is kept for diagnostics (e.g. the explanation
    /// attached to a 404 for an unknown analysis id).
    #[error("API error (HTTP {status}): {content}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The decoded response body.
        content: Content,
    },

    /// The quota of the license key is exhausted (HTTP 429).
    #[error("Your rate limit exceeded.")]
    RateLimitExceeded,

    /// The poll budget ran out while the analysis was still pending.
    #[error(
        "Max retries exceeded after {attempts} checks. Please increase the number of retries or the estimated waiting time."
    )]
    MaxRetriesExceeded {
        /// Number of status checks performed.
        attempts: u32,
    },

    /// A response body did not have the expected shape.
    #[error("invalid response from {url}: {reason}")]
    Decode {
        /// The endpoint that produced the response.
        url: String,
        /// What was wrong with the body.
        reason: String,
    },

    /// A rate-limit header was present but could not be parsed.
    #[error("malformed rate-limit header {header}: {value:?}")]
    RateLimitHeader {
        /// Header name.
        header: &'static str,
        /// Raw header value (empty when the header was missing).
        value: String,
    },
}

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection failure, timeout or client construction failure.
    Transport,
    /// Terminal error status from the service.
    Api,
    /// Quota exhausted.
    RateLimited,
    /// Poll budget exhausted.
    MaxRetriesExceeded,
    /// Unusable input or response (bad URL, credential, body or header).
    Invalid,
}

impl ApiError {
    /// Creates a network error from a reqwest error.
    ///
    /// Timeouts are reported as [`ApiError::Timeout`] so callers can tell
    /// them apart from unreachable hosts.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Transport { url, source }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an API error carrying the response content.
    pub fn api(status: u16, content: Content) -> Self {
        Self::Api { status, content }
    }

    /// Creates a poll-budget error.
    pub fn max_retries_exceeded(attempts: u32) -> Self {
        Self::MaxRetriesExceeded { attempts }
    }

    /// Creates a body decoding error.
    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a rate-limit header error.
    pub fn rate_limit_header(header: &'static str, value: impl Into<String>) -> Self {
        Self::RateLimitHeader {
            header,
            value: value.into(),
        }
    }

    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::ClientBuild { .. } => {
                ErrorKind::Transport
            }
            Self::Api { .. } => ErrorKind::Api,
            Self::RateLimitExceeded => ErrorKind::RateLimited,
            Self::MaxRetriesExceeded { .. } => ErrorKind::MaxRetriesExceeded,
            Self::InvalidUrl { .. }
            | Self::InvalidCredential
            | Self::Decode { .. }
            | Self::RateLimitHeader { .. } => ErrorKind::Invalid,
        }
    }

    /// Returns the HTTP status for errors produced by a server response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimitExceeded => Some(429),
            _ => None,
        }
    }
}

// No `From<reqwest::Error>`: every variant needs the URL as context, so the
// helper constructors are used instead.
