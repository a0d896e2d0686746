//! HTTP session used by the client.
//!
//! [`Transport`] wraps a `reqwest::Client` configured with the bearer
//! credential, the User-Agent and the timeouts, and applies the
//! [`TransportRetry`] policy to every request.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use super::client::LicenseKey;
use super::constants::{CONNECT_TIMEOUT, READ_TIMEOUT};
use super::error::ApiError;
use super::retry::{RetryDecision, TransportRetry};
use crate::user_agent;

/// Multipart field name for uploaded documents.
pub const UPLOAD_FIELD: &str = "file";

/// Timeout applied to every request of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// One value used for both connecting and reading.
    Total(Duration),
    /// Separate connect and read timeouts.
    Split {
        /// Time allowed to establish the connection.
        connect: Duration,
        /// Time allowed between reads of the response.
        read: Duration,
    },
}

impl Default for Timeout {
    fn default() -> Self {
        Self::Split {
            connect: CONNECT_TIMEOUT,
            read: READ_TIMEOUT,
        }
    }
}

impl Timeout {
    /// Builds a uniform timeout from fractional seconds (as given on the command line).
    ///
    /// Values that are not a positive, representable duration fall back to
    /// the default split timeout.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        match Duration::try_from_secs_f64(secs) {
            Ok(total) if !total.is_zero() => Self::Total(total),
            _ => Self::default(),
        }
    }

    fn connect(self) -> Duration {
        match self {
            Self::Total(d) => d,
            Self::Split { connect, .. } => connect,
        }
    }

    fn read(self) -> Duration {
        match self {
            Self::Total(d) => d,
            Self::Split { read, .. } => read,
        }
    }
}

/// Body of an outgoing request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// A JSON document.
    Json(Value),
    /// A single document sent as multipart field `file`.
    Multipart {
        /// Filename reported to the service.
        filename: String,
        /// Raw document bytes.
        content: Vec<u8>,
    },
}

/// A configured HTTP session.
///
/// Cloning is cheap: the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    retry: TransportRetry,
}

impl Transport {
    /// Builds a session bound to a license key.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidCredential`] if the key cannot be used as a
    /// header value and [`ApiError::ClientBuild`] if reqwest fails to build.
    #[instrument(level = "debug", skip(license_key))]
    pub fn build(
        license_key: &LicenseKey,
        timeout: Timeout,
        retry: TransportRetry,
    ) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", license_key.expose()))
            .map_err(|_| ApiError::InvalidCredential)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout.connect())
            .read_timeout(timeout.read())
            .gzip(true)
            .user_agent(user_agent::default_api_user_agent())
            .build()
            .map_err(|source| ApiError::ClientBuild { source })?;

        debug!("HTTP session created");
        Ok(Self { client, retry })
    }

    /// The retry policy of this session.
    #[must_use]
    pub fn retry_policy(&self) -> &TransportRetry {
        &self.retry
    }

    /// Sends a request, repeating it while the retry policy allows.
    ///
    /// When the retry budget is spent the last response is returned as-is;
    /// interpreting its status is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] or [`ApiError::Timeout`] if no
    /// response could be obtained.
    #[instrument(level = "debug", skip(self, body), fields(url = %url))]
    pub async fn send(
        &self,
        method: Method,
        url: &Url,
        body: &RequestBody,
    ) -> Result<reqwest::Response, ApiError> {
        let mut attempt = 1;
        loop {
            let response = self
                .request(method.clone(), url, body)
                .send()
                .await
                .map_err(|e| ApiError::transport(url.as_str(), e))?;

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok());

            match self
                .retry
                .should_retry(&method, status, retry_after, attempt)
            {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        status,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "transient response, retrying"
                    );
                    drop(response);
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    if attempt > 1 {
                        debug!(status, attempt, %reason, "returning response after retries");
                    }
                    return Ok(response);
                }
            }
        }
    }

    fn request(
        &self,
        method: Method,
        url: &Url,
        body: &RequestBody,
    ) -> RequestBuilder {
        let builder = self.client.request(method, url.clone());
        match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart { filename, content } => {
                let part = Part::bytes(content.clone()).file_name(filename.clone());
                builder.multipart(Form::new().part(UPLOAD_FIELD, part))
            }
        }
    }
}
