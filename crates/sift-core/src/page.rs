//! Read-only page model shared by the detector and the extractor.
//!
//! A [`PageSnapshot`] is the owned, `Send` value a [`crate::traits::PageDriver`]
//! hands back after every navigation or scroll step. Parsing it produces a
//! [`ParsedPage`], which is *not* `Send` (the DOM uses non-atomic reference
//! counting), so it only ever lives inside a synchronous block of the
//! control loop and is dropped before the next suspension point.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use url::Url;

use crate::models::compute_hash;

/// Tags whose text never counts as content.
const SKIP_TEXT_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

/// Tags that imply a visual line break between their text and the neighbours'.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p",
    "pre", "section", "td", "th", "tr", "ul",
];

/// Point-in-time view of the loaded page. Superseded, never mutated.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// Address the page was rendered from (after redirects).
    pub url: String,
    /// Rendered DOM serialized as HTML.
    pub html: String,
    /// Document (or scroll container) scroll height in CSS pixels; 0 if unknown.
    pub scroll_height: u64,
    /// Viewport height in CSS pixels; 0 if unknown.
    pub viewport_height: u64,
    pub taken_at: DateTime<Utc>,
}

impl PageSnapshot {
    /// Snapshot without scroll metrics (static pages).
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            scroll_height: 0,
            viewport_height: 0,
            taken_at: Utc::now(),
        }
    }

    pub fn with_scroll_metrics(mut self, scroll_height: u64, viewport_height: u64) -> Self {
        self.scroll_height = scroll_height;
        self.viewport_height = viewport_height;
        self
    }

    pub fn content_hash(&self) -> String {
        compute_hash(&self.html)
    }
}

/// A parsed snapshot: DOM plus the base address for relative references.
pub struct ParsedPage {
    document: Html,
    base_url: Option<Url>,
    scroll_height: u64,
    viewport_height: u64,
}

impl ParsedPage {
    pub fn parse(snapshot: &PageSnapshot) -> Self {
        let document = Html::parse_document(&snapshot.html);
        let page_url = Url::parse(&snapshot.url).ok();
        // <base href> wins over the page address, as in a browser.
        let base_url = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "base")
            .and_then(|e| e.value().attr("href"))
            .and_then(|href| match &page_url {
                Some(page) => page.join(href).ok(),
                None => Url::parse(href).ok(),
            })
            .or(page_url);

        Self {
            document,
            base_url,
            scroll_height: snapshot.scroll_height,
            viewport_height: snapshot.viewport_height,
        }
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    pub fn root(&self) -> ElementRef<'_> {
        self.document.root_element()
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn scroll_height(&self) -> u64 {
        self.scroll_height
    }

    pub fn viewport_height(&self) -> u64 {
        self.viewport_height
    }

    /// All elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.root().descendants().filter_map(ElementRef::wrap)
    }
}

/// Visible text of an element with whitespace collapsed to single spaces.
pub fn element_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(element, &mut raw);
    collapse_whitespace(&raw)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if SKIP_TEXT_TAGS.contains(&name) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&name);
            if block {
                out.push(' ');
            }
            collect_text(child_el, out);
            if block {
                out.push(' ');
            }
        }
    }
}

/// Direct text children only, collapsed.
pub fn own_text(element: ElementRef<'_>) -> String {
    let raw: String = element
        .children()
        .filter_map(|c| c.value().as_text().map(|t| format!("{} ", &**t)))
        .collect();
    collapse_whitespace(&raw)
}

/// Trim and collapse internal whitespace runs to one space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_text_skipped(name: &str) -> bool {
    SKIP_TEXT_TAGS.contains(&name)
}

/// A CSS selector that addresses exactly this element in the snapshot it
/// came from (`#id` anchored when a usable id exists, `:nth-child` otherwise).
pub fn css_path(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    let mut current = Some(element);
    while let Some(el) = current {
        let name = el.value().name();
        if let Some(id) = el.value().id().filter(|id| is_css_ident(id)) {
            parts.push(format!("{name}#{id}"));
            break;
        }
        if name == "html" {
            parts.push(name.to_string());
            break;
        }
        let index = el.prev_siblings().filter(|n| n.value().is_element()).count() + 1;
        parts.push(format!("{name}:nth-child({index})"));
        current = el.parent().and_then(ElementRef::wrap);
    }
    parts.reverse();
    parts.join(" > ")
}

fn is_css_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Resolve a possibly relative reference against the page base.
///
/// `javascript:`/`data:` references and blanks resolve to `None`.
pub fn resolve_url(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("data:") || lower.starts_with("mailto:") {
        return None;
    }
    match Url::parse(raw) {
        Ok(url) => Some(url.to_string()),
        Err(_) => base.and_then(|b| b.join(raw).ok()).map(|u| u.to_string()),
    }
}
