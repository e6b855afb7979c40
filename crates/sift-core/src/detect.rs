//! Structure detection: classify a parsed page as Table / List / Mixed / None
//! and locate its pagination and scroll affordances.
//!
//! Precedence:
//!
//! ```text
//! qualifying <table>s ──┐
//!                       ├── both ──> Mixed { tables, lists }
//! repeating siblings ───┘   one  ──> Table(..) | List(..)
//!                           none ──> None
//! ```
//!
//! Affordances are detected independently of the content shape. Detection is
//! a pure function of the snapshot: nothing here touches the live page.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use scraper::ElementRef;

use crate::config::DetectionConfig;
use crate::models::SourceKey;
use crate::page::{ParsedPage, collapse_whitespace, css_path, element_text, own_text, resolve_url};

/// Scroll height must exceed the viewport by this much to count as scrollable.
const SCROLL_MARGIN: u64 = 50;

/// Tags that never form list items.
const NON_ITEM_TAGS: &[&str] = &[
    "tr", "td", "th", "thead", "tbody", "tfoot", "col", "colgroup", "option", "optgroup",
    "script", "style", "noscript", "template", "br", "hr", "meta", "link", "source", "input",
    "img", "svg", "path", "head", "title", "base",
];

/// Regions whose repeated children are chrome, not content.
const EXCLUDED_REGION_TAGS: &[&str] = &["nav", "header", "footer", "select", "head"];
const EXCLUDED_REGION_HINTS: &[&str] = &["pagination", "pager", "breadcrumb", "navbar", "menu"];

const NEXT_CLASS_TOKENS: &[&str] = &[
    "next", "pager-next", "page-next", "pg-next", "pagination-next", "next-page", "nextpage",
];
const NEXT_LABELS: &[&str] = &["next", "next page", "go to next page", "older posts", "older"];
const NEXT_ARROWS: &[&str] = &["›", "»", ">", "→", "next ›", "next »", "next >", "next →"];
const LOAD_MORE_LABELS: &[&str] = &["load more", "show more", "more results", "see more"];

/// Overall content shape, used in events and as a sheet-routing hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictKind {
    Table,
    List,
    Mixed,
    None,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::Table => "table",
            VerdictKind::List => "list",
            VerdictKind::Mixed => "mixed",
            VerdictKind::None => "none",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A native table that qualified as primary content.
#[derive(Debug, Clone)]
pub struct TableContainer<'a> {
    pub source: SourceKey,
    pub element: ElementRef<'a>,
    /// Header cell texts; blanks are renamed by the extractor.
    pub header: Vec<String>,
    /// Data rows in document order, header row excluded.
    pub rows: Vec<ElementRef<'a>>,
}

/// A run of same-signature siblings that qualified as a list.
#[derive(Debug, Clone)]
pub struct ListContainer<'a> {
    pub source: SourceKey,
    pub parent: ElementRef<'a>,
    /// `tag.class1.class2` shared by every item.
    pub signature: String,
    pub items: Vec<ElementRef<'a>>,
}

#[derive(Debug, Clone)]
pub enum ContentShape<'a> {
    Table(Vec<TableContainer<'a>>),
    List(Vec<ListContainer<'a>>),
    Mixed {
        tables: Vec<TableContainer<'a>>,
        lists: Vec<ListContainer<'a>>,
    },
    None,
}

/// A located "next page" control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationControl {
    /// Selector addressing the control in the snapshot it was found in.
    pub selector: String,
    pub label: String,
    /// Absolute target for link-style controls.
    pub href: Option<String>,
    pub enabled: bool,
}

/// Evidence that scrolling may load more content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollAffordance {
    /// Scrollable element, `None` for the window.
    pub container: Option<String>,
    pub scroll_height: u64,
    pub viewport_height: u64,
}

/// Navigation affordances; owned so they outlive the parsed page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affordances {
    pub pagination: Option<PaginationControl>,
    pub scroll: Option<ScrollAffordance>,
}

impl Affordances {
    pub fn is_empty(&self) -> bool {
        self.pagination.is_none() && self.scroll.is_none()
    }
}

/// Detector output for one snapshot. Borrows the parsed page.
#[derive(Debug, Clone)]
pub struct StructureVerdict<'a> {
    pub content: ContentShape<'a>,
    pub affordances: Affordances,
}

impl<'a> StructureVerdict<'a> {
    pub fn kind(&self) -> VerdictKind {
        match &self.content {
            ContentShape::Table(_) => VerdictKind::Table,
            ContentShape::List(_) => VerdictKind::List,
            ContentShape::Mixed { .. } => VerdictKind::Mixed,
            ContentShape::None => VerdictKind::None,
        }
    }

    pub fn tables(&self) -> &[TableContainer<'a>] {
        match &self.content {
            ContentShape::Table(tables) | ContentShape::Mixed { tables, .. } => tables,
            _ => &[],
        }
    }

    pub fn lists(&self) -> &[ListContainer<'a>] {
        match &self.content {
            ContentShape::List(lists) | ContentShape::Mixed { lists, .. } => lists,
            _ => &[],
        }
    }
}

/// Heuristic page classifier.
#[derive(Debug, Clone, Default)]
pub struct StructureDetector {
    config: DetectionConfig,
}

impl StructureDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn detect<'a>(&self, page: &'a ParsedPage) -> StructureVerdict<'a> {
        let tables = self.find_tables(page);
        let lists = self.find_lists(page, &tables);

        let content = match (tables.is_empty(), lists.is_empty()) {
            (false, false) => ContentShape::Mixed { tables, lists },
            (false, true) => ContentShape::Table(tables),
            (true, false) => ContentShape::List(lists),
            (true, true) => ContentShape::None,
        };

        let affordances = Affordances {
            pagination: self.find_pagination(page),
            scroll: self.find_scroll(page),
        };

        StructureVerdict {
            content,
            affordances,
        }
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    fn find_tables<'a>(&self, page: &'a ParsedPage) -> Vec<TableContainer<'a>> {
        let mut found = Vec::new();
        for table in page.elements().filter(|e| e.value().name() == "table") {
            if let Some(container) = self.qualify_table(table, found.len()) {
                found.push(container);
            }
        }
        found
    }

    fn qualify_table<'a>(&self, table: ElementRef<'a>, ordinal: usize) -> Option<TableContainer<'a>> {
        let rows = own_rows(table);
        if rows.is_empty() {
            return None;
        }
        // Layout tables wrap other tables; the inner ones are judged on their own.
        if rows
            .iter()
            .any(|r| r.descendants().filter_map(ElementRef::wrap).any(|e| e.value().name() == "table"))
        {
            return None;
        }

        let header_idx = rows
            .iter()
            .position(|r| is_header_row(*r))
            .unwrap_or(0);
        let header: Vec<String> = cells(rows[header_idx]).map(element_text).collect();
        if header.is_empty() {
            return None;
        }

        let data_rows: Vec<ElementRef<'a>> = rows[header_idx + 1..]
            .iter()
            .copied()
            .filter(|r| cells(*r).next().is_some())
            .collect();
        if data_rows.len() < self.config.min_table_rows {
            return None;
        }

        // At least one data row must agree in width with the header or with
        // the most common data-row width.
        let mut widths: BTreeMap<usize, usize> = BTreeMap::new();
        for row in &data_rows {
            *widths.entry(cells(*row).count()).or_default() += 1;
        }
        let modal_width = widths
            .iter()
            .max_by_key(|(width, count)| (**count, **width))
            .map(|(width, _)| *width)
            .unwrap_or(0);
        let consistent = data_rows
            .iter()
            .filter(|r| {
                let w = cells(**r).count();
                w == header.len() || w == modal_width
            })
            .count();
        if consistent == 0 {
            return None;
        }

        Some(TableContainer {
            source: SourceKey::table(ordinal),
            element: table,
            header,
            rows: data_rows,
        })
    }

    // -----------------------------------------------------------------------
    // Lists
    // -----------------------------------------------------------------------

    fn find_lists<'a>(
        &self,
        page: &'a ParsedPage,
        tables: &[TableContainer<'a>],
    ) -> Vec<ListContainer<'a>> {
        let table_ids: HashSet<_> = tables.iter().map(|t| t.element.id()).collect();
        let mut best: Option<(usize, ListContainer<'a>)> = None;

        for parent in page.elements() {
            if in_excluded_region(parent) || inside_any(parent, tables) {
                continue;
            }

            let mut groups: BTreeMap<String, Vec<ElementRef<'a>>> = BTreeMap::new();
            for child in parent.children().filter_map(ElementRef::wrap) {
                if NON_ITEM_TAGS.contains(&child.value().name()) {
                    continue;
                }
                groups.entry(signature(child)).or_default().push(child);
            }

            for (sig, items) in groups {
                if items.len() < self.config.min_list_items {
                    continue;
                }
                // Wrappers around whole tables are page layout, not items.
                if items.iter().any(|i| {
                    i.descendants()
                        .filter_map(ElementRef::wrap)
                        .any(|e| table_ids.contains(&e.id()))
                }) {
                    continue;
                }

                let mut with_text = 0;
                let mut structure = 0;
                for item in &items {
                    if element_text(*item).chars().count() >= self.config.min_item_text {
                        with_text += 1;
                    }
                    structure += text_bearing_count(*item).min(10);
                }
                if with_text < self.config.min_list_items {
                    continue;
                }

                let score = with_text * (1 + structure / items.len().max(1));
                let better = match &best {
                    Some((best_score, _)) => score > *best_score,
                    None => true,
                };
                if better {
                    tracing::trace!(signature = %sig, items = items.len(), score, "List candidate");
                    best = Some((
                        score,
                        ListContainer {
                            source: SourceKey::list(0),
                            parent,
                            signature: sig,
                            items,
                        },
                    ));
                }
            }
        }

        best.map(|(_, list)| vec![list]).unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Affordances
    // -----------------------------------------------------------------------

    fn find_pagination(&self, page: &ParsedPage) -> Option<PaginationControl> {
        let mut best: Option<(u8, ElementRef<'_>)> = None;
        for el in page.elements().filter(|e| is_clickable(*e)) {
            let score = next_score(el);
            if score > 0 && best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, el));
            }
        }

        let control = best
            .map(|(_, el)| el)
            .or_else(|| numbered_pager_next(page))?;

        Some(PaginationControl {
            selector: css_path(control),
            label: control_label(control),
            href: control
                .value()
                .attr("href")
                .and_then(|h| resolve_url(page.base_url(), h)),
            enabled: is_enabled(control),
        })
    }

    fn find_scroll(&self, page: &ParsedPage) -> Option<ScrollAffordance> {
        // Static drivers report no metrics; nothing can be scrolled there.
        if page.viewport_height() == 0 {
            return None;
        }
        let container = page.elements().find(|e| is_scroll_container(*e)).map(css_path);
        let window_scrolls = page.scroll_height() > page.viewport_height() + SCROLL_MARGIN;
        if container.is_none() && !window_scrolls {
            return None;
        }
        Some(ScrollAffordance {
            container,
            scroll_height: page.scroll_height(),
            viewport_height: page.viewport_height(),
        })
    }
}

/// `tr` elements whose nearest enclosing table is `table`.
fn own_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    table
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "tr")
        .filter(|tr| {
            tr.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "table")
                .is_some_and(|t| t.id() == table.id())
        })
        .collect()
}

/// `td`/`th` children of a row.
pub(crate) fn cells<'a>(row: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
}

fn is_header_row(row: ElementRef<'_>) -> bool {
    let in_thead = row
        .parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|p| p.value().name() == "thead");
    let mut any = false;
    let all_th = cells(row).all(|c| {
        any = true;
        c.value().name() == "th"
    });
    any && (in_thead || all_th)
}

fn signature(el: ElementRef<'_>) -> String {
    let mut classes: Vec<&str> = el.value().classes().collect();
    classes.sort_unstable();
    classes.dedup();
    let mut sig = el.value().name().to_string();
    for class in classes {
        sig.push('.');
        sig.push_str(class);
    }
    sig
}

fn text_bearing_count(item: ElementRef<'_>) -> usize {
    item.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| !own_text(*e).is_empty())
        .count()
}

fn in_excluded_region(el: ElementRef<'_>) -> bool {
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|e| {
            let v = e.value();
            if EXCLUDED_REGION_TAGS.contains(&v.name()) || v.attr("role") == Some("navigation") {
                return true;
            }
            let hint = format!(
                "{} {}",
                v.attr("class").unwrap_or_default(),
                v.id().unwrap_or_default()
            )
            .to_ascii_lowercase();
            EXCLUDED_REGION_HINTS.iter().any(|h| hint.contains(h))
        })
}

fn inside_any(el: ElementRef<'_>, tables: &[TableContainer<'_>]) -> bool {
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|e| tables.iter().any(|t| t.element.id() == e.id()))
}

fn is_clickable(el: ElementRef<'_>) -> bool {
    let v = el.value();
    match v.name() {
        "a" | "button" => true,
        "input" => matches!(v.attr("type"), Some("button" | "submit")),
        _ => v.attr("role") == Some("button"),
    }
}

fn control_label(el: ElementRef<'_>) -> String {
    let text = element_text(el);
    if !text.is_empty() {
        return text;
    }
    let v = el.value();
    v.attr("aria-label")
        .or_else(|| v.attr("title"))
        .or_else(|| v.attr("value"))
        .map(collapse_whitespace)
        .unwrap_or_default()
}

/// How strongly an element looks like a "next page" control; 0 = not at all.
fn next_score(el: ElementRef<'_>) -> u8 {
    let v = el.value();
    if v
        .attr("rel")
        .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("next")))
    {
        return 5;
    }

    let attr_label = v
        .attr("aria-label")
        .or_else(|| v.attr("title"))
        .map(|s| collapse_whitespace(s).to_lowercase());
    if attr_label
        .as_deref()
        .is_some_and(|l| NEXT_LABELS.contains(&l) || l.starts_with("next"))
    {
        return 4;
    }

    let class_hit = |e: ElementRef<'_>| {
        e.value()
            .classes()
            .any(|c| NEXT_CLASS_TOKENS.contains(&c.to_ascii_lowercase().as_str()))
    };
    let parent_hit = el
        .parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|p| p.value().name() == "li" && class_hit(p));
    if class_hit(el) || parent_hit {
        return 3;
    }

    let text = control_label(el).to_lowercase();
    if NEXT_LABELS.contains(&text.as_str()) {
        return 3;
    }
    if NEXT_ARROWS.contains(&text.as_str()) {
        return 2;
    }
    if LOAD_MORE_LABELS.contains(&text.as_str()) {
        return 2;
    }
    0
}

/// Numbered pagers without a "next" control: the link labelled `current + 1`.
fn numbered_pager_next(page: &ParsedPage) -> Option<ElementRef<'_>> {
    let current = page.elements().find(|e| {
        let v = e.value();
        let marked = v.attr("aria-current") == Some("page")
            || v.classes().any(|c| matches!(c, "active" | "current" | "selected"));
        marked && in_pager(*e) && element_text(*e).parse::<u32>().is_ok()
    })?;
    let number: u32 = element_text(current).parse().ok()?;
    let pager = current
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| is_pager_element(*a))?;
    let wanted = number.checked_add(1)?.to_string();
    pager
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| is_clickable(*e) && element_text(*e) == wanted)
}

fn is_pager_element(el: ElementRef<'_>) -> bool {
    let v = el.value();
    let hint = format!(
        "{} {} {}",
        v.attr("class").unwrap_or_default(),
        v.attr("aria-label").unwrap_or_default(),
        v.id().unwrap_or_default()
    )
    .to_ascii_lowercase();
    hint.contains("pagination") || hint.contains("pager")
}

fn in_pager(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .take(4)
        .any(is_pager_element)
}

fn is_enabled(el: ElementRef<'_>) -> bool {
    let disabled = |e: ElementRef<'_>| {
        let v = e.value();
        v.attr("disabled").is_some()
            || v.attr("aria-disabled") == Some("true")
            || v.classes().any(|c| c.eq_ignore_ascii_case("disabled"))
    };
    let parent_disabled = el
        .parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|p| p.value().name() == "li" && disabled(p));
    !disabled(el) && !parent_disabled
}

fn is_scroll_container(el: ElementRef<'_>) -> bool {
    let v = el.value();
    if matches!(v.name(), "html" | "body") {
        return false;
    }
    let style: String = v
        .attr("style")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect();
    if ["overflow-y:auto", "overflow-y:scroll", "overflow:auto", "overflow:scroll"]
        .iter()
        .any(|s| style.contains(s))
    {
        return true;
    }
    v.classes().any(|c| {
        let c = c.to_ascii_lowercase();
        c.contains("virtualized") || c.contains("infinite") || c == "scrollable" || c == "scroll-container"
    })
}
