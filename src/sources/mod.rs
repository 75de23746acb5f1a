//! News listing sources.
//!
//! A listing source answers one question: "what has been published about
//! this subject lately?". It returns the raw first page of results and leaves
//! enrichment to the [`formatter`](crate::formatter).
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | CryptoPanic | [`cryptopanic`] | Posts API | Requires API key; `rising` filter, news only |
//!
//! # Error Contract
//!
//! Sources never swallow failures. Transport, auth and decode errors are
//! returned to the poller, which is the single place they are contained.

pub mod cryptopanic;

use crate::error::SourceError;
use crate::models::ListingResponse;
use async_trait::async_trait;

/// An external listing API polled once per subject per cycle.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch the first page of recent items for `subject`.
    async fn fetch(&self, subject: &str) -> Result<ListingResponse, SourceError>;

    /// Short tag stored alongside every record from this source.
    fn name(&self) -> &str;
}
