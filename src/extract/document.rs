//! Main-text recovery from rendered HTML.
//!
//! Rendered pages carry a lot of chrome around the story. This module strips
//! the non-content elements, picks the primary content container and
//! flattens it into readable text.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

/// Elements that never hold article text.
static NON_CONTENT: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "header, footer, nav, aside, script, style, noscript, iframe, template, svg, ads",
    )
    .expect("non-content selector is valid")
});
static ARTICLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article").expect("article selector is valid"));
static BODY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("body selector is valid"));
static INLINE_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{a0}]{2,}").expect("whitespace pattern is valid"));

/// Extract the readable text of `html`.
///
/// Removes navigation chrome, scripts, styles, frames and anything matching
/// `cosmetic` (ad containers), then returns the text of the first `<article>`,
/// or of `<body>` when there is no article. Lines are trimmed, blank lines
/// dropped and runs of spaces collapsed. Returns an empty string for pages
/// with no body text.
pub fn main_text(html: &str, cosmetic: &[Selector]) -> String {
    let mut document = Html::parse_document(html);

    let doomed: Vec<_> = document
        .select(&NON_CONTENT)
        .chain(cosmetic.iter().flat_map(|s| document.select(s)))
        .map(|el| el.id())
        .collect();
    for id in doomed {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    let root = document
        .select(&ARTICLE)
        .next()
        .or_else(|| document.select(&BODY).next());

    match root {
        Some(el) => tidy(&el.text().collect::<String>()),
        None => String::new(),
    }
}

fn tidy(raw: &str) -> String {
    raw.lines()
        .map(|line| INLINE_WS.replace_all(line.trim(), " "))
        .filter(|line| !line.is_empty())
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html>
  <head><title>t</title><style>body { color: red }</style></head>
  <body>
    <header>Site header</header>
    <nav><a href="/">Home</a></nav>
    <article>
      <h1>Solana   hits new high</h1>
      <p>First paragraph.</p>
      <div class="ad-slot">Buy now!</div>
      <script>var tracking = 1;</script>
      <p>Second paragraph.</p>
    </article>
    <aside>Related stories</aside>
    <footer>Copyright</footer>
  </body>
</html>"#;

    #[test]
    fn test_prefers_article_and_strips_chrome() {
        let ads = vec![Selector::parse(".ad-slot").unwrap()];
        let text = main_text(PAGE, &ads);

        assert_eq!(
            text,
            "Solana hits new high\nFirst paragraph.\nSecond paragraph."
        );
    }

    #[test]
    fn test_cosmetic_selectors_are_optional() {
        let text = main_text(PAGE, &[]);
        assert!(text.contains("Buy now!"));
        assert!(!text.contains("tracking"));
    }

    #[test]
    fn test_falls_back_to_body() {
        let html = r#"<html><body>
            <nav>Menu</nav>
            <div><p>Only body text.</p></div>
            <iframe src="https://ads.example.com"></iframe>
            <footer>Footer</footer>
        </body></html>"#;
        assert_eq!(main_text(html, &[]), "Only body text.");
    }

    #[test]
    fn test_empty_document_yields_empty_text() {
        assert_eq!(main_text("", &[]), "");
        assert_eq!(main_text("<html><body><script>x()</script></body></html>", &[]), "");
    }
}
