//! Page content extraction.
//!
//! Turns a news URL into the readable text of the page behind it. Pages are
//! rendered in a shared headless browser ([`session`]) with ad and tracker
//! requests blocked ([`adfilter`]), then reduced to their main text
//! ([`document`]).
//!
//! # Failure Policy
//!
//! Extraction is best effort. [`PageExtractor::extract`] never fails: any
//! navigation, render or parse problem is logged and reported as an empty
//! string, so callers can degrade the item instead of dropping it.

pub mod adfilter;
pub mod document;
pub mod session;

use crate::error::ExtractError;
use crate::utils::truncate_for_log;
use adfilter::AdFilterRegistry;
use async_trait::async_trait;
use session::RenderSession;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// HTML of a rendered page and the ruleset that was active while rendering.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub blocker: Arc<AdFilterRegistry>,
}

/// Something that can load a URL and hand back its rendered HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, ExtractError>;

    /// Release the underlying engine. Must be idempotent.
    async fn shutdown(&self);
}

/// Best-effort URL to main-text extraction.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Main text of the page at `url`, or an empty string on any failure.
    async fn extract(&self, url: &str) -> String;

    /// Release rendering resources. Safe to call more than once.
    async fn cleanup(&self);
}

/// Extractor backed by a [`PageRenderer`], headless Chrome by default.
pub struct ContentExtractor<R = RenderSession> {
    renderer: R,
}

impl<R: PageRenderer> ContentExtractor<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Render `url` and recover its main text, surfacing failures.
    pub async fn try_extract(&self, url: &str) -> Result<String, ExtractError> {
        let page = self.renderer.render(url).await?;
        Ok(document::main_text(
            &page.html,
            page.blocker.cosmetic_selectors(),
        ))
    }
}

#[async_trait]
impl<R: PageRenderer> PageExtractor for ContentExtractor<R> {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn extract(&self, url: &str) -> String {
        match self.try_extract(url).await {
            Ok(text) => {
                debug!(
                    chars = text.chars().count(),
                    preview = %truncate_for_log(&text, 120),
                    "Extracted page text"
                );
                text
            }
            Err(e) => {
                warn!(error = %e, "Failed to extract page content; continuing without it");
                String::new()
            }
        }
    }

    async fn cleanup(&self) {
        self.renderer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves canned HTML, or a timeout for URLs containing "slow".
    struct FakeRenderer {
        shutdowns: AtomicUsize,
    }

    impl FakeRenderer {
        fn new() -> Self {
            Self {
                shutdowns: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render(&self, url: &str) -> Result<RenderedPage, ExtractError> {
            if url.contains("slow") {
                return Err(ExtractError::Timeout {
                    url: url.to_string(),
                    timeout: Duration::from_secs(30),
                });
            }
            Ok(RenderedPage {
                html: r#"<html><body><nav>Menu</nav><article><p>Story body.</p>
                    <div class="sponsored">Ad copy</div></article></body></html>"#
                    .to_string(),
                blocker: Arc::new(AdFilterRegistry::builtin()),
            })
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_extract_returns_main_text_without_ads() {
        let extractor = ContentExtractor::new(FakeRenderer::new());
        assert_eq!(extractor.extract("https://example.com/story").await, "Story body.");
    }

    #[tokio::test]
    async fn test_extract_failure_becomes_empty_string() {
        let extractor = ContentExtractor::new(FakeRenderer::new());
        assert!(extractor.try_extract("https://example.com/slow").await.is_err());
        assert_eq!(extractor.extract("https://example.com/slow").await, "");
    }

    #[tokio::test]
    async fn test_cleanup_delegates_to_renderer() {
        let extractor = ContentExtractor::new(FakeRenderer::new());
        extractor.cleanup().await;
        assert_eq!(extractor.renderer().shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_session_degrades_to_empty_text() {
        let session = RenderSession::new(session::RenderConfig::default());
        let extractor = ContentExtractor::new(session);
        extractor.cleanup().await;
        assert_eq!(extractor.extract("https://example.com").await, "");
    }
}
