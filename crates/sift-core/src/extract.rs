//! Record extraction: turn a verdict's containers into [`RawRecord`]s.
//!
//! Records are produced lazily, tables first (in document order), then
//! lists. The iterator borrows the verdict, so it cannot outlive the parsed
//! snapshot it came from.

use std::collections::HashSet;

use scraper::ElementRef;

use crate::detect::{ListContainer, StructureVerdict, TableContainer, cells};
use crate::models::{RESERVED_FIELDS, RawRecord};
use crate::page::{element_text, is_text_skipped, own_text};

const HEADINGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// Lazy sequence of raw records for every container in the verdict.
pub fn extract<'v>(verdict: &'v StructureVerdict<'_>) -> impl Iterator<Item = RawRecord> + 'v {
    let tables = verdict.tables().iter().flat_map(table_records);
    let lists = verdict.lists().iter().flat_map(list_records);
    tables.chain(lists)
}

fn table_records<'v>(table: &'v TableContainer<'_>) -> impl Iterator<Item = RawRecord> + 'v {
    let names = header_names(&table.header);
    table.rows.iter().map(move |row| table_record(table, &names, *row))
}

fn list_records<'v>(list: &'v ListContainer<'_>) -> impl Iterator<Item = RawRecord> + 'v {
    list.items.iter().map(move |item| list_record(list, *item))
}

/// Header texts as unique, non-reserved field names.
///
/// Blank cells become `column_N` (1-based position); repeats get `_2`, `_3`...
pub fn header_names(header: &[String]) -> Vec<String> {
    let mut names = FieldNames::default();
    header
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let text = text.trim();
            if text.is_empty() {
                names.claim(&format!("column_{}", i + 1))
            } else {
                names.claim(text)
            }
        })
        .collect()
}

fn table_record(table: &TableContainer<'_>, header: &[String], row: ElementRef<'_>) -> RawRecord {
    let mut record = RawRecord::new(table.source);
    let mut names = FieldNames::from_existing(header);

    let values: Vec<String> = cells(row).map(element_text).collect();
    for (i, name) in header.iter().enumerate() {
        // Short rows keep every header column, recorded empty.
        let value = values.get(i).cloned().unwrap_or_default();
        record.fields.push((name.clone(), value));
    }
    for (i, value) in values.into_iter().enumerate().skip(header.len()) {
        let name = names.claim(&format!("column_{}", i + 1));
        record.fields.push((name, value));
    }

    record.link = first_link(row);
    record.image_url = first_image(row);
    record
}

fn list_record(list: &ListContainer<'_>, item: ElementRef<'_>) -> RawRecord {
    let mut record = RawRecord::new(list.source);
    let mut names = FieldNames::default();
    let mut generic = 0usize;
    let mut seen_heading = false;

    let direct = own_text(item);
    if !direct.is_empty() {
        record.fields.push((names.claim("text"), direct));
    }

    for field in field_elements(item) {
        let value = element_text(field);
        if value.is_empty() {
            continue;
        }
        let v = field.value();
        let label = v
            .attr("itemprop")
            .or_else(|| v.attr("data-field"))
            .or_else(|| v.attr("data-label"))
            .map(str::to_string)
            .or_else(|| {
                if !seen_heading && HEADINGS.contains(&v.name()) {
                    seen_heading = true;
                    Some("title".to_string())
                } else {
                    None
                }
            })
            .or_else(|| v.classes().next().map(str::to_string));
        let name = match label.filter(|l| !l.trim().is_empty()) {
            Some(label) => names.claim(label.trim()),
            None => {
                generic += 1;
                names.claim(&format!("field_{generic}"))
            }
        };
        record.fields.push((name, value));
    }

    record.link = first_link(item);
    record.image_url = first_image(item);
    record
}

/// Topmost descendants of `item` carrying their own text.
///
/// An element with direct text is taken whole (its nested markup becomes
/// part of the value); elements without direct text are descended into.
fn field_elements(item: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut out = Vec::new();
    collect_fields(item, &mut out);
    out
}

fn collect_fields<'a>(parent: ElementRef<'a>, out: &mut Vec<ElementRef<'a>>) {
    for child in parent.children().filter_map(ElementRef::wrap) {
        if is_text_skipped(child.value().name()) {
            continue;
        }
        if own_text(child).is_empty() {
            collect_fields(child, out);
        } else {
            out.push(child);
        }
    }
}

/// `href` of the element itself or its first descendant link, unresolved.
fn first_link(scope: ElementRef<'_>) -> Option<String> {
    std::iter::once(scope)
        .chain(scope.descendants().filter_map(ElementRef::wrap))
        .filter(|e| e.value().name() == "a")
        .filter_map(|e| e.value().attr("href"))
        .map(str::trim)
        .find(|h| !h.is_empty() && !h.starts_with('#'))
        .map(str::to_string)
}

/// Source of the first image, looking past lazy-loading placeholders.
fn first_image(scope: ElementRef<'_>) -> Option<String> {
    scope
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "img")
        .find_map(image_source)
}

fn image_source(img: ElementRef<'_>) -> Option<String> {
    let v = img.value();
    let usable = |s: &&str| {
        let s = s.trim();
        !s.is_empty() && !s.to_ascii_lowercase().starts_with("data:")
    };
    v.attr("src")
        .filter(usable)
        .or_else(|| v.attr("data-src").filter(usable))
        .or_else(|| v.attr("data-lazy-src").filter(usable))
        .or_else(|| {
            v.attr("srcset")
                .and_then(|set| set.split(',').next())
                .and_then(|candidate| candidate.split_whitespace().next())
                .filter(usable)
        })
        .map(|s| s.trim().to_string())
}

/// Allocator of unique field names within one record.
#[derive(Default)]
struct FieldNames {
    taken: HashSet<String>,
}

impl FieldNames {
    fn from_existing(names: &[String]) -> Self {
        Self {
            taken: names.iter().cloned().collect(),
        }
    }

    fn claim(&mut self, wanted: &str) -> String {
        let free = |n: &str, taken: &HashSet<String>| {
            !taken.contains(n) && !RESERVED_FIELDS.contains(&n)
        };
        let mut name = wanted.to_string();
        let mut suffix = 2;
        while !free(&name, &self.taken) {
            name = format!("{wanted}_{suffix}");
            suffix += 1;
        }
        self.taken.insert(name.clone());
        name
    }
}
