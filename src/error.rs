//! Error types for each stage of the ingest pipeline.
//!
//! Every per-unit operation (one subject, one page, one record) returns its
//! own error type so the poller can contain failures at the right
//! granularity. Only [`CycleError`] crosses the cycle boundary.

use std::time::Duration;
use thiserror::Error;

/// Listing fetch failures. Contained per subject.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("listing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("listing API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("listing response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid listing endpoint: {0}")]
    Url(#[from] url::ParseError),
}

/// Page render/extraction failures. Contained per item; the item keeps an
/// empty `full_content`.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to launch headless browser: {0}")]
    Launch(String),

    #[error("browser protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{0} is on a blocked ad or tracker host")]
    Blocked(String),

    #[error("render session has been shut down")]
    SessionClosed,
}

/// Persistence failures. Contained per item; the item is skipped.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("news item {0} has no title")]
    MissingTitle(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("store rejected record: {0}")]
    Rejected(String),
}

/// Watermark cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cached watermark {0} is not a valid timestamp")]
    InvalidWatermark(serde_json::Value),
}

/// Anything that escapes a poll cycle. Logged and swallowed by the poller.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to advance cursor: {0}")]
    Cursor(#[from] CacheError),

    #[error("poll cycle panicked: {0}")]
    Panicked(String),
}

/// Startup configuration problems. Fatal to the binary only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("missing listing API key (set CRYPTOPANIC_API_KEY or api.auth_token)")]
    MissingApiKey,

    #[error("no subjects configured")]
    NoSubjects,

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
