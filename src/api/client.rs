//! Client for the INLYSE analysis service.
//!
//! [`WebClient`] binds one license key to one HTTP session and exposes one
//! method per remote endpoint. The submit-and-poll operations built on top
//! of these bindings live in [`super::analysis`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, instrument};
use url::Url;

use super::analysis::Backoff;
use super::constants::DEFAULT_BASE_URL;
use super::endpoint::{AnalysisFilter, AnalysisId, Endpoint};
use super::envelope::ResponseEnvelope;
use super::error::ApiError;
use super::retry::TransportRetry;
use super::transport::{RequestBody, Timeout, Transport};

/// Bearer credential of the service.
///
/// The key never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Wraps a raw license key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for building the authorization header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LicenseKey(***)")
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Origin of the service.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Timeout,
    /// Automatic retry of idempotent requests.
    pub transport_retry: TransportRetry,
    /// Backoff between status checks of a pending analysis.
    pub backoff: Backoff,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Timeout::default(),
            transport_retry: TransportRetry::default(),
            backoff: Backoff::default(),
        }
    }
}

impl ClientConfig {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the transport retry policy.
    #[must_use]
    pub fn with_transport_retry(mut self, retry: TransportRetry) -> Self {
        self.transport_retry = retry;
        self
    }

    /// Sets the poll backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Observable lifecycle state of the HTTP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been created yet.
    Unopened,
    /// A session is live and pooling connections.
    Open,
    /// The session was released by [`WebClient::close`].
    Closed,
}

#[derive(Debug)]
enum Session {
    Unopened,
    Open(Transport),
    Closed,
}

impl Session {
    fn state(&self) -> SessionState {
        match self {
            Self::Unopened => SessionState::Unopened,
            Self::Open(_) => SessionState::Open,
            Self::Closed => SessionState::Closed,
        }
    }
}

#[derive(Debug)]
struct Inner {
    license_key: LicenseKey,
    base_url: Url,
    config: ClientConfig,
    session: Mutex<Session>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(session, Session::Open(_)) {
            debug!("closing HTTP session on drop");
        }
        *session = Session::Closed;
    }
}

/// Client of the analysis service.
///
/// Cloning yields another handle to the same session, so one client can be
/// shared by many concurrent tasks. The session is released by
/// [`WebClient::close`] or when the last handle is dropped.
///
/// # Example
///
/// ```no_run
/// use inlyse_core::api::{ClientConfig, LicenseKey, WebClient};
///
/// # async fn example() -> Result<(), inlyse_core::api::ApiError> {
/// let client = WebClient::new(LicenseKey::new("my-key"), ClientConfig::default())?;
/// let result = client.scan_url("https://example.com/invoice.pdf").await?;
/// println!("{}", result.content());
/// client.close();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WebClient {
    inner: Arc<Inner>,
}

impl WebClient {
    /// Creates a client. No connection is made until the first request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the configured base URL does not parse.
    pub fn new(license_key: LicenseKey, config: ClientConfig) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(&config.base_url).map_err(|_| ApiError::invalid_url(&config.base_url))?;
        Ok(Self {
            inner: Arc::new(Inner {
                license_key,
                base_url,
                config,
                session: Mutex::new(Session::Unopened),
            }),
        })
    }

    /// Base URL of the service.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Configuration the client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current session state.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.lock_session().state()
    }

    /// Opens the session if it is not open yet.
    ///
    /// Every request does this implicitly; a session that was closed is
    /// replaced by a freshly built one.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidCredential`] or [`ApiError::ClientBuild`]
    /// if the session cannot be built.
    pub fn open(&self) -> Result<(), ApiError> {
        self.transport().map(|_| ())
    }

    /// Releases the session and its connection pool.
    ///
    /// Requests in flight keep their own handle and complete normally.
    pub fn close(&self) {
        let mut session = self.lock_session();
        if matches!(*session, Session::Open(_)) {
            debug!("HTTP session closed");
        }
        *session = Session::Closed;
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Result<Transport, ApiError> {
        let mut session = self.lock_session();
        if let Session::Open(transport) = &*session {
            return Ok(transport.clone());
        }
        let previous = session.state();
        let transport = Transport::build(
            &self.inner.license_key,
            self.inner.config.timeout,
            self.inner.config.transport_retry.clone(),
        )?;
        debug!(from = ?previous, "opening HTTP session");
        *session = Session::Open(transport.clone());
        Ok(transport)
    }

    async fn call(
        &self,
        endpoint: Endpoint,
        id: Option<&AnalysisId>,
        query: Option<(&str, &str)>,
        body: RequestBody,
    ) -> Result<ResponseEnvelope, ApiError> {
        let url = endpoint.url(&self.inner.base_url, id)?;
        let mut request_url = url.clone();
        if let Some((key, value)) = query {
            request_url.query_pairs_mut().append_pair(key, value);
        }

        let transport = self.transport()?;
        let response = transport
            .send(endpoint.method(), &request_url, &body)
            .await?;
        ResponseEnvelope::from_response(url.into(), response).await
    }

    /// Service version.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self))]
    pub async fn version(&self) -> Result<ResponseEnvelope, ApiError> {
        self.call(Endpoint::Version, None, None, RequestBody::Empty)
            .await
    }

    /// Liveness check.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<ResponseEnvelope, ApiError> {
        self.call(Endpoint::Ping, None, None, RequestBody::Empty)
            .await
    }

    /// Usage statistics of the license key (401 for an invalid key, 429 once
    /// the quota is used up).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<ResponseEnvelope, ApiError> {
        self.call(Endpoint::Stats, None, None, RequestBody::Empty)
            .await
    }

    /// Original document of an analysis (404 once expired).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn download(&self, id: &AnalysisId) -> Result<ResponseEnvelope, ApiError> {
        self.call(Endpoint::Download, Some(id), None, RequestBody::Empty)
            .await
    }

    /// Absolute download URL of an analysis, without making a request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the URL cannot be built.
    pub fn download_link(&self, id: &AnalysisId) -> Result<Url, ApiError> {
        Endpoint::Download.url(&self.inner.base_url, Some(id))
    }

    /// Sanitized document of an analysis.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn disarm_analysis(&self, id: &AnalysisId) -> Result<ResponseEnvelope, ApiError> {
        self.call(Endpoint::DisarmAnalysis, Some(id), None, RequestBody::Empty)
            .await
    }

    /// Uploads a local document for analysis.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn upload_file(
        &self,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<ResponseEnvelope, ApiError> {
        let body = RequestBody::Multipart {
            filename: filename.to_string(),
            content,
        };
        self.call(Endpoint::UploadFile, None, None, body).await
    }

    /// Asks the service to fetch and analyze a remote document.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self))]
    pub async fn upload_url(&self, url: &str) -> Result<ResponseEnvelope, ApiError> {
        let body = RequestBody::Json(serde_json::json!({ "url": url }));
        self.call(Endpoint::UploadUrl, None, None, body).await
    }

    /// Asks the service to fetch and analyze an Outlook attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self, token))]
    pub async fn upload_owa(&self, url: &str, token: &str) -> Result<ResponseEnvelope, ApiError> {
        let body = RequestBody::Json(serde_json::json!({ "url": url, "token": token }));
        self.call(Endpoint::UploadOwa, None, None, body).await
    }

    /// Sends a local document for one-shot sanitization.
    ///
    /// Returns the raw envelope; [`WebClient::disarm`] interprets the status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn disarm_file(
        &self,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<ResponseEnvelope, ApiError> {
        let body = RequestBody::Multipart {
            filename: filename.to_string(),
            content,
        };
        self.call(Endpoint::DisarmFile, None, None, body).await
    }

    /// Lists the analyses of the license key.
    ///
    /// The filter is matched case-insensitively; unknown values are replaced
    /// by `all` before the request is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self))]
    pub async fn list_analyses(&self, filter: &str) -> Result<ResponseEnvelope, ApiError> {
        let filter = AnalysisFilter::parse_lenient(filter);
        self.call(
            Endpoint::ListAnalyses,
            None,
            Some(("filter", filter.as_str())),
            RequestBody::Empty,
        )
        .await
    }

    /// Current status or result of an analysis (200 done, 202 pending, 404 unknown).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn check(&self, id: &AnalysisId) -> Result<ResponseEnvelope, ApiError> {
        self.call(Endpoint::Check, Some(id), None, RequestBody::Empty)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::api::envelope::Content;
    use crate::api::error::ErrorKind;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn client_for(base_url: &str) -> WebClient {
        let config = ClientConfig::default()
            .with_base_url(base_url)
            .with_transport_retry(TransportRetry::disabled());
        WebClient::new(LicenseKey::new("test-key"), config).unwrap()
    }

    #[test]
    fn test_license_key_debug_is_redacted() {
        let key = LicenseKey::new("super-secret");
        let debug = format!("{key:?}");
        assert!(!debug.contains("super-secret"));
        assert_eq!(key.expose(), "super-secret");
    }

    #[test]
    fn test_new_rejects_invalid_base_url() {
        let config = ClientConfig::default().with_base_url("not a url");
        let result = WebClient::new(LicenseKey::new("k"), config);
        assert!(matches!(result, Err(ApiError::InvalidUrl { .. })));
    }

    #[test]
    fn test_session_lifecycle() {
        let client = client_for("https://malware.ai");
        assert_eq!(client.session_state(), SessionState::Unopened);
        client.open().unwrap();
        assert_eq!(client.session_state(), SessionState::Open);
        client.close();
        assert_eq!(client.session_state(), SessionState::Closed);
        client.open().unwrap();
        assert_eq!(client.session_state(), SessionState::Open);
    }

    #[test]
    fn test_clones_share_session() {
        let client = client_for("https://malware.ai");
        let other = client.clone();
        client.open().unwrap();
        assert_eq!(other.session_state(), SessionState::Open);
        other.close();
        assert_eq!(client.session_state(), SessionState::Closed);
    }

    #[test]
    fn test_download_link_makes_no_request() {
        let client = client_for("https://malware.ai");
        let link = client.download_link(&AnalysisId::new("abc")).unwrap();
        assert_eq!(link.as_str(), "https://malware.ai/api/analysis/abc/download");
        assert_eq!(client.session_state(), SessionState::Unopened);
    }

    #[test]
    fn test_unreachable_service_is_transport_error() {
        let client = client_for("http://127.0.0.1:1");
        let error = tokio_test::block_on(client.ping()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transport);
        assert_eq!(client.session_state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_ping_decodes_json_string() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"\"Pong\"".to_vec(), "application/json"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let envelope = client.ping().await.unwrap();
        assert_eq!(envelope.status(), 200);
        assert_eq!(envelope.content(), &Content::Json(json!("Pong")));
        assert_eq!(envelope.endpoint(), format!("{}/ping", server.uri()));
        assert!(envelope.rate_limit().is_none());
    }

    #[tokio::test]
    async fn test_download_keeps_binary_body() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/api/analysis/abc/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.7".to_vec()),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let envelope = client.download(&AnalysisId::new("abc")).await.unwrap();
        assert_eq!(envelope.content_type().mime(), "application/pdf");
        assert_eq!(envelope.content(), &Content::Bytes(b"%PDF-1.7".to_vec()));
    }

    #[tokio::test]
    async fn test_stats_reads_rate_limit_headers() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/api/stats"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .insert_header("X-Ratelimit-Limit", "100")
                    .insert_header("X-Ratelimit-Remaining", "99")
                    .insert_header("X-Ratelimit-Reset", "01-01-2030 00:00:00")
                    .set_body_json(json!({"analyses": 1})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let envelope = client.stats().await.unwrap();
        let snapshot = envelope.rate_limit().unwrap();
        assert_eq!(snapshot.limit, 100);
        assert_eq!(snapshot.remaining, 99);
    }

    #[tokio::test]
    async fn test_list_analyses_unknown_filter_sends_all() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/api/analysis"))
            .and(query_param("filter", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let envelope = client.list_analyses("bogus").await.unwrap();
        assert_eq!(envelope.status(), 200);
    }

    #[tokio::test]
    async fn test_list_analyses_filter_is_lower_cased() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/api/analysis"))
            .and(query_param("filter", "unfinished"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        client.list_analyses("UnFinished").await.unwrap();
    }

    #[tokio::test]
    async fn test_request_after_close_reopens_session() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.0"))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        client.version().await.unwrap();
        client.close();
        assert_eq!(client.session_state(), SessionState::Closed);

        let envelope = client.version().await.unwrap();
        assert_eq!(envelope.status(), 200);
        assert_eq!(client.session_state(), SessionState::Open);
    }
}
