//! The uniform response envelope returned by every endpoint.
//!
//! An envelope captures the endpoint that was called, the status code, the
//! decoded body and the rate-limit headers. Operations never inspect raw
//! `reqwest::Response` values beyond this module.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use tracing::{debug, warn};

use super::constants::RATE_LIMIT_RESET_FORMAT;
use super::error::ApiError;

/// Header carrying the request quota of the license key.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Header carrying the remaining requests.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
/// Header carrying the reset time (`DD-MM-YYYY HH:MM:SS`, UTC).
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

const JSON_MIME: &str = "application/json";

/// A parsed `Content-Type` header: mime type plus parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentType {
    mime: String,
    params: BTreeMap<String, String>,
}

impl ContentType {
    /// Parses a raw header value.
    ///
    /// The mime type and parameter names are lower-cased, parameter values
    /// are unquoted. A missing header gives an empty mime type.
    ///
    /// ```
    /// use inlyse_core::api::ContentType;
    ///
    /// let ct = ContentType::parse(Some("Application/JSON; charset=\"utf-8\""));
    /// assert_eq!(ct.mime(), "application/json");
    /// assert_eq!(ct.param("charset"), Some("utf-8"));
    /// ```
    #[must_use]
    pub fn parse(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Self::default();
        };
        let mut parts = header.split(';');
        let mime = parts
            .next()
            .map(|mime| mime.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let params = parts
            .filter_map(|part| {
                let (key, value) = part.split_once('=')?;
                let key = key.trim().to_ascii_lowercase();
                if key.is_empty() {
                    return None;
                }
                let value = value.trim().trim_matches('"').to_string();
                Some((key, value))
            })
            .collect();
        Self { mime, params }
    }

    /// The lower-cased mime type (empty when the header was missing).
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Looks up a parameter by its lower-cased name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All parameters.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Whether the body should be decoded as JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mime == JSON_MIME
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Body of an `application/json` response. A bare JSON string such as
    /// `"Pong"` is a `Value::String`.
    Json(Value),
    /// Body of any other response (e.g. a PDF).
    Bytes(Vec<u8>),
}

impl Content {
    /// The JSON value, if the body was JSON.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    /// The raw bytes, if the body was not JSON.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Json(_) => None,
            Self::Bytes(bytes) => Some(bytes),
        }
    }

    /// Renders the content as a JSON value for reporting.
    ///
    /// Binary bodies become a (lossy) UTF-8 string.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Bytes(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// Point-in-time view of the quota of a license key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    /// Requests allowed per window.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the window resets.
    pub reset: DateTime<Utc>,
}

impl RateLimitSnapshot {
    /// Builds a snapshot from response headers.
    ///
    /// Returns `Ok(None)` when `x-ratelimit-remaining` is absent. When it is
    /// present the limit and reset headers are required as well.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::RateLimitHeader`] if any of the three headers is
    /// missing or malformed.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, ApiError> {
        let Some(remaining) = header_str(headers, RATE_LIMIT_REMAINING_HEADER)? else {
            return Ok(None);
        };
        let remaining = parse_count(RATE_LIMIT_REMAINING_HEADER, remaining)?;
        let limit = header_str(headers, RATE_LIMIT_LIMIT_HEADER)?
            .ok_or_else(|| ApiError::rate_limit_header(RATE_LIMIT_LIMIT_HEADER, ""))
            .and_then(|value| parse_count(RATE_LIMIT_LIMIT_HEADER, value))?;
        let reset_raw = header_str(headers, RATE_LIMIT_RESET_HEADER)?
            .ok_or_else(|| ApiError::rate_limit_header(RATE_LIMIT_RESET_HEADER, ""))?;
        let reset = Self::parse_reset(reset_raw)
            .ok_or_else(|| ApiError::rate_limit_header(RATE_LIMIT_RESET_HEADER, reset_raw))?;

        Ok(Some(Self {
            limit,
            remaining,
            reset,
        }))
    }

    /// Parses a reset timestamp in `DD-MM-YYYY HH:MM:SS` format as UTC.
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use inlyse_core::api::RateLimitSnapshot;
    ///
    /// let reset = RateLimitSnapshot::parse_reset("31-12-2024 23:59:58").unwrap();
    /// assert_eq!(reset, Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 58).unwrap());
    /// ```
    #[must_use]
    pub fn parse_reset(value: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(value.trim(), RATE_LIMIT_RESET_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Whole minutes until the window resets (floored, negative once passed).
    #[must_use]
    pub fn minutes_until_reset(&self, now: DateTime<Utc>) -> i64 {
        (self.reset - now).num_seconds().div_euclid(60)
    }

    /// Whether the quota is used up.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, ApiError> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| {
                ApiError::rate_limit_header(name, String::from_utf8_lossy(value.as_bytes()))
            })
        })
        .transpose()
}

fn parse_count(name: &'static str, value: &str) -> Result<u64, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::rate_limit_header(name, value))
}

/// The uniform result of every remote call.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    endpoint: String,
    status: u16,
    rate_limit: Option<RateLimitSnapshot>,
    content_type: ContentType,
    content: Content,
}

impl ResponseEnvelope {
    /// Assembles an envelope from already decoded parts.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        status: u16,
        rate_limit: Option<RateLimitSnapshot>,
        content_type: ContentType,
        content: Content,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            status,
            rate_limit,
            content_type,
            content,
        }
    }

    /// Reads the body of a response and decodes it by content type.
    ///
    /// Malformed rate-limit headers are logged and leave the snapshot empty.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the body cannot be read and
    /// [`ApiError::Decode`] if a JSON body is invalid.
    pub async fn from_response(
        endpoint: String,
        response: reqwest::Response,
    ) -> Result<Self, ApiError> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let content_type =
            ContentType::parse(headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()));
        let rate_limit = RateLimitSnapshot::from_headers(&headers).unwrap_or_else(|error| {
            warn!(endpoint = %endpoint, %error, "ignoring rate-limit headers");
            None
        });

        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::transport(endpoint.clone(), e))?;

        let content = if content_type.is_json() {
            decode_json(&endpoint, &body)?
        } else {
            Content::Bytes(body.to_vec())
        };

        debug!(
            endpoint = %endpoint,
            status,
            mime = content_type.mime(),
            bytes = body.len(),
            "response decoded"
        );

        Ok(Self {
            endpoint,
            status,
            rate_limit,
            content_type,
            content,
        })
    }

    /// Absolute URL of the endpoint that was called.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Rate-limit snapshot, absent when the service sent no rate-limit headers.
    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitSnapshot> {
        self.rate_limit.as_ref()
    }

    /// Parsed content type.
    #[must_use]
    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    /// Decoded body.
    #[must_use]
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Consumes the envelope and returns the decoded body.
    #[must_use]
    pub fn into_content(self) -> Content {
        self.content
    }
}

fn decode_json(endpoint: &str, body: &[u8]) -> Result<Content, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Content::Json(Value::Null));
    }
    serde_json::from_slice(body)
        .map(Content::Json)
        .map_err(|e| ApiError::decode(endpoint, format!("invalid JSON body: {e}")))
}
