//! # Awful News Ingest
//!
//! A long-running ingestion service that polls a short-form news listing API
//! for a set of subjects, renders each linked page in headless Chrome to
//! recover its full text, and stores the enriched items as memories for
//! retrieval-augmented generation.
//!
//! ## Architecture
//!
//! The service follows a pipeline architecture, driven by [`poller::NewsPoller`]:
//! 1. **Listing**: fetch recent items per subject ([`sources`])
//! 2. **Enrichment**: render each page with ads blocked and keep its main text ([`extract`], [`formatter`])
//! 3. **Persistence**: write one idempotent record per item URL ([`sink`])
//! 4. **Watermark**: remember the newest item seen ([`cursor`])

pub mod cli;
pub mod config;
pub mod cursor;
pub mod error;
pub mod extract;
pub mod formatter;
pub mod models;
pub mod poller;
pub mod sink;
pub mod sources;
pub mod utils;
