//! Heuristic article extraction.
//!
//! Help-center themes vary widely, so extraction is an ordered chain of
//! strategies: known container markers first, then a generic scan for the
//! largest non-navigational block. No fixed selector list is exhaustive.

use std::sync::LazyLock;

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

/// Floor for the largest-block fallback; anything shorter is noise.
const FALLBACK_MIN_TEXT_LEN: usize = 100;

/// Elements whose text never belongs in an article body.
const STRIP_TAGS: &[&str] = &[
    "script", "style", "form", "button", "nav", "header", "footer",
];

/// Class/id fragments marking navigation chrome, excluded from the fallback
/// scan even when their text is long.
const EXCLUDED_MARKERS: &[&str] = &[
    "nav", "menu", "header", "footer", "sidebar", "breadcrumb",
];

static H1_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("hardcoded selector"));

static TITLE_HEADING_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h2[class*='article-title'], h3[class*='article-title']")
        .expect("hardcoded selector")
});

// Content-area conventions seen across help-desk themes, most specific
// first.
static BODY_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        ".article-body",
        ".description-text",
        ".g-content",
        "[itemprop='articleBody']",
        "[role='main']",
    ]
    .iter()
    .map(|raw| Selector::parse(raw).expect("hardcoded selector"))
    .collect()
});

static FALLBACK_BLOCK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div[class], div[id], section[class], section[id], article[class], article[id]")
        .expect("hardcoded selector")
});

static IMG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("hardcoded selector"));

/// Extraction output before visual annotation and length validation.
#[derive(Debug, Clone)]
pub struct ArticleDraft {
    pub title: String,
    pub body: String,
    /// `img` references found in the selected container, captured before any
    /// stripping so images inside removed regions still get captioned.
    pub image_urls: Vec<String>,
}

/// Extracts title, body text and image references from an article page.
///
/// Returns `None` when no plausible content container exists; a missing
/// title alone never fails extraction.
pub fn extract(html: &str) -> Option<ArticleDraft> {
    let document = Html::parse_document(html);

    let title = extract_title(&document);

    let container = select_container(&document)?;

    let image_urls: Vec<String> = container
        .select(&IMG_SELECTOR)
        .filter_map(|img| img.value().attr("src"))
        .map(str::to_string)
        .collect();

    let body = container_text(container);
    if body.is_empty() {
        return None;
    }

    Some(ArticleDraft {
        title,
        body,
        image_urls,
    })
}

fn extract_title(document: &Html) -> String {
    if let Some(h1) = document.select(&H1_SELECTOR).next() {
        let text = joined_text(h1);
        if !text.is_empty() {
            return text;
        }
    }

    if let Some(heading) = document.select(&TITLE_HEADING_SELECTOR).next() {
        let text = joined_text(heading);
        if !text.is_empty() {
            return text;
        }
    }

    "No Title".to_string()
}

fn select_container(document: &Html) -> Option<ElementRef<'_>> {
    for selector in BODY_SELECTORS.iter() {
        if let Some(element) = document.select(selector).next() {
            if !container_text(element).is_empty() {
                return Some(element);
            }
        }
    }

    largest_content_block(document)
}

/// Final strategy in the chain: scan every marked block-level element and
/// pick the one with the most text, skipping navigation-flavored markers.
fn largest_content_block(document: &Html) -> Option<ElementRef<'_>> {
    let mut best: Option<(usize, ElementRef<'_>)> = None;

    for element in document.select(&FALLBACK_BLOCK_SELECTOR) {
        if has_excluded_marker(element) {
            continue;
        }

        let len = container_text(element).chars().count();
        if len < FALLBACK_MIN_TEXT_LEN {
            continue;
        }

        if best.map_or(true, |(best_len, _)| len > best_len) {
            best = Some((len, element));
        }
    }

    best.map(|(_, element)| element)
}

fn has_excluded_marker(element: ElementRef<'_>) -> bool {
    let value = element.value();
    let mut markers = String::new();
    if let Some(class) = value.attr("class") {
        markers.push_str(class);
        markers.push(' ');
    }
    if let Some(id) = value.attr("id") {
        markers.push_str(id);
    }
    let markers = markers.to_lowercase();

    EXCLUDED_MARKERS.iter().any(|word| markers.contains(word))
}

/// Document-order text of a container with non-content subtrees stripped:
/// lines trimmed, blanks dropped, rejoined with single newlines.
pub fn container_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    push_text(element, &mut raw);

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push('\n');
            }
            Node::Element(child_el) => {
                if STRIP_TAGS.contains(&child_el.name()) {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    push_text(child_ref, out);
                }
            }
            _ => {}
        }
    }
}

fn joined_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_container_wins_over_fallback() {
        let html = r#"
            <html><body>
                <h1>Reset your password</h1>
                <div class="article-body">
                    <p>Open the login page and click "Forgot password".</p>
                    <script>track();</script>
                </div>
            </body></html>
        "#;

        let draft = extract(html).expect("should extract");
        assert_eq!(draft.title, "Reset your password");
        assert!(draft.body.contains("Forgot password"));
        assert!(!draft.body.contains("track()"));
    }

    #[test]
    fn title_falls_back_to_article_title_heading_then_placeholder() {
        let html = r#"
            <html><body>
                <h2 class="article-title heading">Billing cycles</h2>
                <div class="description-text">Invoices are issued monthly on the 1st.</div>
            </body></html>
        "#;
        let draft = extract(html).expect("should extract");
        assert_eq!(draft.title, "Billing cycles");

        let html = r#"
            <html><body>
                <div class="g-content">Invoices are issued monthly on the 1st.</div>
            </body></html>
        "#;
        let draft = extract(html).expect("should extract");
        assert_eq!(draft.title, "No Title");
    }

    #[test]
    fn fallback_skips_navigation_flavored_blocks() {
        let nav_filler = "Home Products Pricing Docs Support Contact About Careers Blog \
                          Community Status Legal Privacy Terms Sitemap Search Login Register";
        let story = "Our support desk answers tickets within one business day, \
                     seven days a week, including public holidays worldwide.";
        assert!(story.len() >= 100 && story.len() < nav_filler.len());

        let html = format!(
            r#"<html><body>
                <div class="nav-wrapper">{nav_filler}</div>
                <div class="story-detail">{story}</div>
            </body></html>"#
        );

        let draft = extract(&html).expect("should extract");
        assert!(draft.body.contains("one business day"));
        assert!(!draft.body.contains("Sitemap"));
    }

    #[test]
    fn fallback_prefers_longer_of_two_plain_blocks() {
        let short = "x".repeat(80);
        let long = "y".repeat(120);
        let html = format!(
            r#"<html><body>
                <div class="intro">{short}</div>
                <div class="detail">{long}</div>
            </body></html>"#
        );

        let draft = extract(&html).expect("should extract");
        assert_eq!(draft.body, long);
    }

    #[test]
    fn no_container_yields_none() {
        let html = r#"<html><body><p>Just a stray paragraph.</p></body></html>"#;
        assert!(extract(html).is_none());
    }

    #[test]
    fn image_urls_are_captured_before_stripping() {
        let html = r#"
            <html><body>
                <div class="article-body">
                    <p>Follow the highlighted steps below to file a claim today.</p>
                    <img src="/images/step1.png">
                    <form><img src="/images/inside-form.png"></form>
                </div>
            </body></html>
        "#;

        let draft = extract(html).expect("should extract");
        assert_eq!(
            draft.image_urls,
            vec!["/images/step1.png", "/images/inside-form.png"]
        );
        assert!(!draft.body.contains("inside-form"));
    }

    #[test]
    fn body_lines_are_trimmed_and_joined() {
        let html = r#"
            <html><body>
                <div class="article-body">
                    <p>  First step.  </p>

                    <p>Second step.</p>
                </div>
            </body></html>
        "#;

        let draft = extract(html).expect("should extract");
        assert_eq!(draft.body, "First step.\nSecond step.");
    }
}
