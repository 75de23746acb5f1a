//! CryptoPanic posts API client.
//!
//! Queries the [CryptoPanic](https://cryptopanic.com/developers/api/) posts
//! endpoint for one currency at a time.
//!
//! # Request Shape
//!
//! ```text
//! GET {base}?auth_token=…&public=true&currencies=SOL&filter=rising
//!     &metadata=true&kind=news&page=1
//! ```
//!
//! Only the first page is read. The `next` cursor in the response is ignored.

use crate::error::SourceError;
use crate::models::ListingResponse;
use crate::sources::ListingSource;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://cryptopanic.com/api/pro/v1/posts/";
pub const DEFAULT_FILTER: &str = "rising";
pub const DEFAULT_KIND: &str = "news";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Listing client for the CryptoPanic posts API.
pub struct CryptoPanicClient {
    http: reqwest::Client,
    base_url: Url,
    auth_token: String,
    filter: String,
    kind: String,
}

impl CryptoPanicClient {
    /// Create a client against `base_url` authenticated with `auth_token`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, auth_token: impl Into<String>) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            auth_token: auth_token.into(),
            filter: DEFAULT_FILTER.to_string(),
            kind: DEFAULT_KIND.to_string(),
        })
    }

    /// Freshness filter (`rising`, `hot`, `bullish`, ...).
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Item kind filter (`news` or `media`).
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Build the request URL for one subject.
    pub fn listing_url(&self, subject: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("auth_token", &self.auth_token)
            .append_pair("public", "true")
            .append_pair("currencies", subject)
            .append_pair("filter", &self.filter)
            .append_pair("metadata", "true")
            .append_pair("kind", &self.kind)
            .append_pair("page", "1");
        url
    }
}

#[async_trait]
impl ListingSource for CryptoPanicClient {
    #[instrument(level = "info", skip_all, fields(%subject, filter = %self.filter))]
    async fn fetch(&self, subject: &str) -> Result<ListingResponse, SourceError> {
        // The URL carries the auth token; transport errors are stripped of it.
        let response = self
            .http
            .get(self.listing_url(subject))
            .send()
            .await
            .map_err(|e| SourceError::Http(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Listing API returned an error status");
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body, 300),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Http(e.without_url()))?;
        let listing: ListingResponse = serde_json::from_slice(&bytes)?;

        debug!(
            count = listing.count,
            next = ?listing.next,
            results = ?listing
                .results
                .iter()
                .flatten()
                .map(|r| (r.title.as_str(), r.published_at))
                .collect::<Vec<_>>(),
            "Listing API response"
        );

        Ok(listing)
    }

    fn name(&self) -> &str {
        "cryptopanic"
    }
}
