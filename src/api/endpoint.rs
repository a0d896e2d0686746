//! Declarative table of the remote endpoints.
//!
//! Each [`Endpoint`] knows its path template and HTTP method. Identifier
//! bearing paths contain an `{id}` placeholder that is substituted verbatim:
//! identifiers are not validated here, a malformed one surfaces as a
//! server-side 404.

use std::fmt;
use std::str::FromStr;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use super::error::ApiError;

const ID_PLACEHOLDER: &str = "{id}";

/// Identifier of one server-side analysis (a UUID in practice).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(String);

impl AnalysisId {
    /// Wraps an identifier without validating it.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AnalysisId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AnalysisId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Remote operations offered by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Service version.
    Version,
    /// Liveness check.
    Ping,
    /// Usage statistics of the license key.
    Stats,
    /// Original document of an analysis.
    Download,
    /// Sanitized document of an analysis.
    DisarmAnalysis,
    /// Upload of a local file.
    UploadFile,
    /// Upload of a remote file by URL.
    UploadUrl,
    /// Upload of an Outlook attachment by URL and token.
    UploadOwa,
    /// One-shot sanitization of a local file.
    DisarmFile,
    /// List of analyses of the license key.
    ListAnalyses,
    /// Status or result of an analysis.
    Check,
}

impl Endpoint {
    /// Every endpoint, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Version,
        Self::Ping,
        Self::Stats,
        Self::Download,
        Self::DisarmAnalysis,
        Self::UploadFile,
        Self::UploadUrl,
        Self::UploadOwa,
        Self::DisarmFile,
        Self::ListAnalyses,
        Self::Check,
    ];

    /// Path template relative to the base URL.
    #[must_use]
    pub fn template(self) -> &'static str {
        match self {
            Self::Version => "/version",
            Self::Ping => "/ping",
            Self::Stats => "/api/stats",
            Self::Download => "/api/analysis/{id}/download",
            Self::DisarmAnalysis => "/api/analysis/{id}/disarm",
            Self::UploadFile => "/api/files/",
            Self::UploadUrl => "/api/files/url",
            Self::UploadOwa => "/api/files/owa",
            Self::DisarmFile => "/api/files/disarm",
            Self::ListAnalyses => "/api/analysis",
            Self::Check => "/api/analysis/{id}",
        }
    }

    /// HTTP method of the endpoint.
    #[must_use]
    pub fn method(self) -> Method {
        match self {
            Self::UploadFile | Self::UploadUrl | Self::UploadOwa | Self::DisarmFile => {
                Method::POST
            }
            Self::Version
            | Self::Ping
            | Self::Stats
            | Self::Download
            | Self::DisarmAnalysis
            | Self::ListAnalyses
            | Self::Check => Method::GET,
        }
    }

    /// Whether the path contains the `{id}` placeholder.
    #[must_use]
    pub fn takes_id(self) -> bool {
        self.template().contains(ID_PLACEHOLDER)
    }

    /// Relative path with the identifier substituted.
    ///
    /// ```
    /// use inlyse_core::api::{AnalysisId, Endpoint};
    ///
    /// let id = AnalysisId::new("abc");
    /// assert_eq!(Endpoint::Check.path(Some(&id)), "/api/analysis/abc");
    /// assert_eq!(Endpoint::Ping.path(None), "/ping");
    /// ```
    #[must_use]
    pub fn path(self, id: Option<&AnalysisId>) -> String {
        let template = self.template();
        match id {
            Some(id) => template.replace(ID_PLACEHOLDER, id.as_str()),
            None => template.to_string(),
        }
    }

    /// Absolute URL of the endpoint below `base`.
    ///
    /// The path is appended to the base URL as-is, so a base with a path
    /// prefix (e.g. a reverse proxy mount point) keeps its prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the combined URL does not parse.
    pub fn url(self, base: &Url, id: Option<&AnalysisId>) -> Result<Url, ApiError> {
        let joined = format!(
            "{}{}",
            base.as_str().trim_end_matches('/'),
            self.path(id)
        );
        Url::parse(&joined).map_err(|_| ApiError::invalid_url(joined))
    }
}

/// Filter for [`Endpoint::ListAnalyses`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnalysisFilter {
    /// Every analysis.
    #[default]
    All,
    /// Completed analyses.
    Finished,
    /// Analyses still in progress.
    Unfinished,
    /// Analyses that failed.
    Error,
}

impl AnalysisFilter {
    /// Accepted filter names.
    pub const NAMES: [&'static str; 4] = ["all", "finished", "unfinished", "error"];

    /// Query value sent to the service.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Finished => "finished",
            Self::Unfinished => "unfinished",
            Self::Error => "error",
        }
    }

    /// Parses a filter case-insensitively, falling back to [`AnalysisFilter::All`].
    ///
    /// Unknown values are logged at warn level.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!(
                filter = value,
                allowed = ?Self::NAMES,
                "unknown analysis filter, using \"all\""
            );
            Self::All
        })
    }
}

impl FromStr for AnalysisFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "finished" => Ok(Self::Finished),
            "unfinished" => Ok(Self::Unfinished),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "invalid filter '{value}' (expected one of: {})",
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for AnalysisFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_only_uploads_are_post() {
        for endpoint in Endpoint::ALL {
            let expected_post = matches!(
                endpoint,
                Endpoint::UploadFile
                    | Endpoint::UploadUrl
                    | Endpoint::UploadOwa
                    | Endpoint::DisarmFile
            );
            assert_eq!(
                endpoint.method() == Method::POST,
                expected_post,
                "{endpoint:?}"
            );
        }
    }

    #[test]
    fn test_id_bearing_endpoints() {
        let with_id: Vec<_> = Endpoint::ALL
            .into_iter()
            .filter(|e| e.takes_id())
            .collect();
        assert_eq!(
            with_id,
            vec![Endpoint::Download, Endpoint::DisarmAnalysis, Endpoint::Check]
        );
    }

    #[test]
    fn test_path_substitutes_id_verbatim() {
        let id = AnalysisId::new("not-a-uuid");
        assert_eq!(
            Endpoint::Download.path(Some(&id)),
            "/api/analysis/not-a-uuid/download"
        );
    }

    #[test]
    fn test_url_keeps_base_prefix() {
        let base = Url::parse("https://proxy.example/inlyse/").unwrap();
        let url = Endpoint::Stats.url(&base, None).unwrap();
        assert_eq!(url.as_str(), "https://proxy.example/inlyse/api/stats");
    }

    #[test]
    fn test_url_default_origin() {
        let base = Url::parse("https://malware.ai").unwrap();
        let url = Endpoint::UploadFile.url(&base, None).unwrap();
        assert_eq!(url.as_str(), "https://malware.ai/api/files/");
    }

    #[test]
    fn test_filter_parse_case_insensitive() {
        assert_eq!("FINISHED".parse(), Ok(AnalysisFilter::Finished));
        assert_eq!(" Unfinished ".parse(), Ok(AnalysisFilter::Unfinished));
        assert_eq!("error".parse(), Ok(AnalysisFilter::Error));
    }

    #[test]
    fn test_filter_strict_parse_rejects_unknown() {
        let error = "pending".parse::<AnalysisFilter>().unwrap_err();
        assert!(error.contains("pending"));
        assert!(error.contains("unfinished"));
    }

    #[test]
    fn test_filter_lenient_falls_back_to_all() {
        assert_eq!(AnalysisFilter::parse_lenient("bogus"), AnalysisFilter::All);
        assert_eq!(
            AnalysisFilter::parse_lenient("Finished"),
            AnalysisFilter::Finished
        );
    }

    #[test]
    fn test_analysis_id_serializes_as_string() {
        let id = AnalysisId::new("X");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"X\"");
        let parsed: AnalysisId = serde_json::from_str("\"Y\"").unwrap();
        assert_eq!(parsed.as_str(), "Y");
    }
}
