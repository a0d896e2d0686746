//! User-Agent sent with every API request.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://malware.ai";

/// Default User-Agent for API requests (identifies the tool and its version).
#[must_use]
pub(crate) fn default_api_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("inlyse/{version} (+{PROJECT_UA_URL})")
}
