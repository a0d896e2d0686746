//! INLYSE Core Library
//!
//! Client library behind the `inlyse` command-line tool. It uploads files
//! and URLs to the INLYSE malware analysis service, waits for the
//! asynchronous results and fetches disarmed documents.
//!
//! # Architecture
//!
//! - [`api`] - HTTP client, endpoint bindings, response envelope, error
//!   taxonomy and the submit-and-poll protocol
//! - [`batch`] - bounded worker pool that runs one operation per asset and
//!   reports successes and failures side by side

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod batch;
mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use api::{
    AnalysisFilter, AnalysisId, ApiError, ClientConfig, Content, ErrorKind, LicenseKey,
    RateLimitSnapshot, ResponseEnvelope, Timeout, TransportRetry, WebClient,
};
pub use batch::{BatchError, BatchReport, BatchRunner, DEFAULT_CONCURRENCY};
