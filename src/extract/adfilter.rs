//! Ad and tracker blocking rules.
//!
//! The registry understands a small, practical subset of the EasyList filter
//! syntax:
//!
//! | Rule | Example | Effect |
//! |------|---------|--------|
//! | Network host rule | `\|\|doubleclick.net^` | Requests to the host (and its subdomains) are blocked in the page |
//! | Generic cosmetic rule | `##.ad-banner` | Matching elements are stripped before text extraction |
//!
//! Everything else (exceptions, domain-scoped cosmetics, scriptlets, path
//! rules) is ignored. After construction the registry is immutable and shared
//! behind an `Arc`.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};
use url::Url;

pub const EASYLIST_URL: &str = "https://easylist.to/easylist/easylist.txt";
pub const EASYPRIVACY_URL: &str = "https://easylist.to/easylist/easyprivacy.txt";

/// Rules compiled into the binary so blocking works even when list
/// downloads fail.
const BUILTIN_RULES: &str = r#"
! Advertising networks
||doubleclick.net^
||googlesyndication.com^
||googleadservices.com^
||adservice.google.com^
||amazon-adsystem.com^
||adnxs.com^
||criteo.com^
||criteo.net^
||pubmatic.com^
||rubiconproject.com^
||openx.net^
||taboola.com^
||outbrain.com^
||moatads.com^
||media.net^
! Trackers
||google-analytics.com^
||googletagmanager.com^
||scorecardresearch.com^
||quantserve.com^
||hotjar.com^
||chartbeat.com^
||connect.facebook.net^
||bat.bing.com^
! Ad containers
##.ad
##.ads
##.advert
##.advertisement
##.ad-container
##.ad-slot
##.sponsored
##.sponsored-content
##ins.adsbygoogle
##[id^="google_ads_"]
##[id^="div-gpt-ad"]
##.OUTBRAIN
##.trc_related_container
"#;

static NETWORK_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\|\|([a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+)+)\^(?:\$[^/]*)?$")
        .expect("network rule pattern is valid")
});

/// Where to get rules from and how many to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdFilterConfig {
    /// Include the compiled-in ruleset.
    pub builtin: bool,
    /// EasyList-format list URLs downloaded once at session start.
    pub lists: Vec<String>,
    pub max_network_rules: usize,
    pub max_cosmetic_rules: usize,
}

impl Default for AdFilterConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            lists: vec![EASYLIST_URL.to_string(), EASYPRIVACY_URL.to_string()],
            max_network_rules: 10_000,
            max_cosmetic_rules: 2_000,
        }
    }
}

/// Compiled blocking ruleset: blocked hosts plus cosmetic selectors.
#[derive(Debug, Default)]
pub struct AdFilterRegistry {
    hosts: BTreeSet<String>,
    patterns: Vec<String>,
    cosmetic: Vec<Selector>,
}

impl AdFilterRegistry {
    /// The compiled-in ruleset only.
    pub fn builtin() -> Self {
        Self::from_rules(BUILTIN_RULES)
    }

    /// Parse a filter list.
    pub fn from_rules(text: &str) -> Self {
        let mut rules = RuleSet::default();
        rules.add_list(text);
        rules.build(usize::MAX, usize::MAX)
    }

    /// Build the registry described by `config`, downloading any lists.
    ///
    /// A list that fails to download or decode is logged and skipped; the
    /// rest of the ruleset still applies.
    #[instrument(level = "info", skip_all, fields(lists = config.lists.len()))]
    pub async fn load(config: &AdFilterConfig, http: &reqwest::Client) -> Self {
        let mut rules = RuleSet::default();
        if config.builtin {
            rules.add_list(BUILTIN_RULES);
        }

        for list_url in &config.lists {
            match fetch_list(http, list_url).await {
                Ok(text) => {
                    let before = (rules.hosts.len(), rules.selectors.len());
                    rules.add_list(&text);
                    info!(
                        list = %list_url,
                        hosts = rules.hosts.len() - before.0,
                        selectors = rules.selectors.len() - before.1,
                        "Loaded filter list"
                    );
                }
                Err(e) => {
                    warn!(list = %list_url, error = %e, "Failed to download filter list; skipping")
                }
            }
        }

        let registry = rules.build(config.max_network_rules, config.max_cosmetic_rules);
        info!(
            hosts = registry.hosts.len(),
            selectors = registry.cosmetic.len(),
            "Ad filter registry ready"
        );
        registry
    }

    /// Wildcard URL patterns in the form the browser's request blocker
    /// expects (`*://host/*`).
    pub fn blocked_url_patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Selectors for elements to strip from rendered documents.
    pub fn cosmetic_selectors(&self) -> &[Selector] {
        &self.cosmetic
    }

    /// Whether a request to `url` would be blocked.
    pub fn is_blocked(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let mut candidate = host.as_str();
        loop {
            if self.hosts.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, rest)) if rest.contains('.') => candidate = rest,
                _ => return false,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.cosmetic.is_empty()
    }
}

/// Accumulates rules from several lists before capping and compiling.
#[derive(Default)]
struct RuleSet {
    hosts: Vec<String>,
    selectors: Vec<String>,
}

impl RuleSet {
    fn add_list(&mut self, text: &str) {
        for line in text.lines().map(str::trim) {
            if line.is_empty()
                || line.starts_with('!')
                || line.starts_with('[')
                || line.starts_with("@@")
            {
                continue;
            }
            if let Some(selector) = line.strip_prefix("##") {
                self.selectors.push(selector.to_string());
            } else if let Some(caps) = NETWORK_RULE.captures(line) {
                self.hosts.push(caps[1].to_string());
            }
        }
    }

    fn build(self, max_hosts: usize, max_selectors: usize) -> AdFilterRegistry {
        let hosts: BTreeSet<String> = self.hosts.into_iter().unique().take(max_hosts).collect();
        let patterns = hosts
            .iter()
            .flat_map(|h| [format!("*://{h}/*"), format!("*://*.{h}/*")])
            .collect();
        let cosmetic = self
            .selectors
            .into_iter()
            .unique()
            .filter_map(|s| Selector::parse(&s).ok())
            .take(max_selectors)
            .collect();

        AdFilterRegistry {
            hosts,
            patterns,
            cosmetic,
        }
    }
}

async fn fetch_list(http: &reqwest::Client, url: &str) -> Result<String, reqwest::Error> {
    http.get(url).send().await?.error_for_status()?.text().await
}
