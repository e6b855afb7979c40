//! End-to-end sessions against scripted pages.

use std::path::Path;
use std::time::Duration;

use calamine::{Data, Reader, Xlsx, open_workbook};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{ExportFormat, ScrapeTuning, SessionConfig};
use crate::error::AppError;
use crate::events::{ChannelReporter, EventCategory, ShellEvent, TracingReporter};
use crate::navigation::TerminationReason;
use crate::session::{CompletionStatus, ScrapeSession, SessionSummary};
use crate::testutil::{MockImage, MockImageClient, MockPage, MockScreen};
use crate::traits::{ImageClient, NoImages};

const URL: &str = "https://shop.test/catalog";

fn tuning() -> ScrapeTuning {
    ScrapeTuning::default()
        .with_retry_backoff(Duration::from_millis(1))
        .with_scroll_settle(Duration::from_millis(10), Duration::from_millis(2))
        .with_navigation_timeout(Duration::from_secs(5))
}

fn config(dir: &Path) -> SessionConfig {
    SessionConfig::new(URL, "results")
        .with_output_dir(dir)
        .with_image_validation(false)
        .with_image_download(false)
}

fn item(name: &str) -> String {
    format!(r#"<div class="item"><h3>{name}</h3><span class="price">${}</span></div>"#, name.len())
}

/// A catalog page; `next` is `Some(enabled)` when a pager is rendered.
fn catalog(names: &[String], next: Option<bool>) -> String {
    let items: String = names.iter().map(|n| item(n)).collect();
    let pager = match next {
        Some(true) => r#"<ul class="pagination"><li class="next"><a href="?page=next">Next</a></li></ul>"#,
        Some(false) => r#"<ul class="pagination"><li class="next disabled"><a>Next</a></li></ul>"#,
        None => "",
    };
    format!(r#"<html><body><div class="results">{items}</div>{pager}</body></html>"#)
}

fn names(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("{prefix} {i}")).collect()
}

async fn run<C: ImageClient>(
    page: MockPage,
    images: C,
    config: SessionConfig,
    cancel: Option<CancellationToken>,
) -> (SessionSummary, Vec<ShellEvent>) {
    let (reporter, mut rx) = ChannelReporter::channel();
    let mut session = ScrapeSession::new(config, tuning(), page, images, reporter).unwrap();
    if let Some(token) = cancel {
        session = session.with_cancel_token(token);
    }
    let summary = session.run().await;
    (summary, drain(&mut rx))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ShellEvent>) -> Vec<ShellEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn messages(events: &[ShellEvent], wanted: EventCategory) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ShellEvent::Event {
                category, message, ..
            } if *category == wanted => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn read_rows(path: &Path, sheet: &str) -> Vec<Vec<String>> {
    let mut book: Xlsx<_> = open_workbook(path).unwrap();
    book.worksheet_range(sheet)
        .unwrap()
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::Empty => String::new(),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect()
}

fn serials(rows: &[Vec<String>]) -> Vec<u64> {
    rows[1..].iter().map(|r| r[0].parse().unwrap()).collect()
}

// ---------------------------------------------------------------------------
// Scenario A: static table
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_static_table() {
    let tmp = TempDir::new().unwrap();
    let html = r#"<html><body><table>
        <thead><tr><th>Name</th><th>Role</th></tr></thead>
        <tbody>
          <tr><td>Ada</td><td>Analyst</td></tr>
          <tr><td>Grace</td><td>Admiral</td></tr>
          <tr><td>Linus</td><td>Maintainer</td></tr>
        </tbody></table></body></html>"#;
    let page = MockPage::paged(URL, vec![html.to_string()]);

    let (summary, events) = run(page.clone(), NoImages, config(tmp.path()), None).await;

    assert_eq!(summary.status, CompletionStatus::Completed);
    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.sheets, vec!["Table".to_string()]);
    assert_eq!(summary.termination, Some(TerminationReason::NoAffordance));
    assert!(page.clicks().is_empty());
    assert_eq!(page.scroll_count(), 0);

    let rows = read_rows(&tmp.path().join("results.xlsx"), "Table");
    assert_eq!(rows[0], vec!["serial_no", "Name", "Role"]);
    assert_eq!(serials(&rows), vec![1, 2, 3]);
    assert_eq!(rows[2][1], "Grace");

    assert!(!messages(&events, EventCategory::Detection).is_empty());
    assert!(matches!(events.last(), Some(ShellEvent::Finished(_))));
}

// ---------------------------------------------------------------------------
// Scenario B: paginated list with an overlapping second page
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_paginated_list_with_duplicate() {
    let tmp = TempDir::new().unwrap();
    let page_one = names("Item", 0..4);
    let mut page_two = names("Item", 4..7);
    page_two.push("Item 2".to_string());
    let page = MockPage::paged(
        URL,
        vec![catalog(&page_one, Some(true)), catalog(&page_two, Some(false))],
    );

    let (summary, events) = run(page.clone(), NoImages, config(tmp.path()), None).await;

    assert_eq!(summary.status, CompletionStatus::Completed);
    assert_eq!(summary.total_records, 7);
    assert_eq!(summary.termination, Some(TerminationReason::LastPage));
    assert_eq!(page.clicks().len(), 1);

    let rows = read_rows(&tmp.path().join("results.xlsx"), "Items");
    assert_eq!(rows.len(), 8);
    assert_eq!(serials(&rows), (1..=7).collect::<Vec<_>>());
    let extraction = messages(&events, EventCategory::Extraction);
    assert!(extraction[1].contains("3 new record(s), 1 duplicate(s), 7 total"));
}

// ---------------------------------------------------------------------------
// Scenario C: infinite scroll that stops growing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_infinite_scroll_exhausts() {
    let tmp = TempDir::new().unwrap();
    let screens = (1..=3)
        .map(|batch| {
            MockScreen::new(URL, catalog(&names("Post", 0..batch * 5), None))
                .with_heights(1000 + batch as u64 * 1000, 800)
        })
        .collect();
    let page = MockPage::new(screens);

    let (summary, events) = run(page.clone(), NoImages, config(tmp.path()), None).await;

    assert_eq!(summary.status, CompletionStatus::Completed);
    assert_eq!(summary.termination, Some(TerminationReason::ScrollExhausted));
    assert_eq!(summary.total_records, 15);
    // Two productive scrolls, then three without growth or new records.
    assert_eq!(page.scroll_count(), 5);
    let scrolls = messages(&events, EventCategory::Scroll);
    assert_eq!(scrolls.len(), 5);
    assert!(scrolls[0].contains("grew to 3000px"));
    assert!(scrolls[1].contains("grew to 4000px"));
    assert!(scrolls[4].contains("no new content"));
}

// ---------------------------------------------------------------------------
// Scenario D: stop while page 2 is being captured
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_stop_mid_chain() {
    let tmp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let pages = (0..5)
        .map(|p| catalog(&names(&format!("P{p}"), 0..4), Some(p < 4)))
        .collect();
    let page = MockPage::paged(URL, pages).cancel_on_snapshot(2, cancel.clone());

    let (summary, events) = run(page.clone(), NoImages, config(tmp.path()), Some(cancel)).await;

    assert_eq!(summary.status, CompletionStatus::StoppedEarly);
    assert_eq!(summary.termination, Some(TerminationReason::Stopped));
    assert_eq!(summary.total_records, 8);
    assert_eq!(page.clicks().len(), 1);
    assert_eq!(page.snapshot_count(), 2);
    assert_eq!(messages(&events, EventCategory::Stop).len(), 1);

    let rows = read_rows(&tmp.path().join("results.xlsx"), "Items");
    assert_eq!(serials(&rows), (1..=8).collect::<Vec<_>>());
    assert!(rows.iter().all(|r| r.len() == rows[0].len()));
}

#[tokio::test]
async fn stop_during_scroll_cycle_skips_the_scroll() {
    let tmp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let screens = (1..=3)
        .map(|batch| {
            MockScreen::new(URL, catalog(&names("Post", 0..batch * 5), None))
                .with_heights(1000 + batch as u64 * 1000, 800)
        })
        .collect();
    let page = MockPage::new(screens).cancel_on_scroll_height(1, cancel.clone());

    let (summary, events) = run(page.clone(), NoImages, config(tmp.path()), Some(cancel)).await;

    assert_eq!(summary.status, CompletionStatus::StoppedEarly);
    assert_eq!(summary.termination, Some(TerminationReason::Stopped));
    assert_eq!(summary.total_records, 5);
    assert_eq!(page.scroll_count(), 0);
    assert_eq!(messages(&events, EventCategory::Stop).len(), 1);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn attempt_cap_bounds_an_endless_chain() {
    let tmp = TempDir::new().unwrap();
    let pages = (0..10)
        .map(|p| catalog(&names(&format!("P{p}"), 0..4), Some(true)))
        .collect();
    let page = MockPage::paged(URL, pages);

    let (summary, _) = run(
        page.clone(),
        NoImages,
        config(tmp.path()).with_max_pagination(3),
        None,
    )
    .await;

    assert_eq!(summary.termination, Some(TerminationReason::AttemptCap));
    assert_eq!(page.clicks().len(), 3);
    assert_eq!(summary.total_records, 16);
}

#[tokio::test]
async fn repeated_page_after_click_terminates() {
    let tmp = TempDir::new().unwrap();
    let same = catalog(&names("Same", 0..4), Some(true));
    let page = MockPage::paged(URL, vec![same.clone(), same]);

    let (summary, _) = run(page.clone(), NoImages, config(tmp.path()), None).await;

    assert_eq!(summary.termination, Some(TerminationReason::NoStructuralChange));
    assert_eq!(summary.total_records, 4);
    assert_eq!(page.clicks().len(), 1);
}

#[tokio::test]
async fn mixed_page_gets_one_sheet_per_container() {
    let tmp = TempDir::new().unwrap();
    let html = format!(
        r#"<html><body>
             <table><tr><th>Metric</th><th>Value</th></tr>
               <tr><td>Visitors</td><td>10</td></tr><tr><td>Orders</td><td>3</td></tr></table>
             {}
           </body></html>"#,
        catalog(&names("Card", 0..3), None)
    );
    let page = MockPage::paged(URL, vec![html]);

    let (summary, _) = run(page, NoImages, config(tmp.path()), None).await;

    assert_eq!(summary.sheets, vec!["Table".to_string(), "Items".to_string()]);
    assert_eq!(summary.total_records, 5);
    let path = tmp.path().join("results.xlsx");
    assert_eq!(serials(&read_rows(&path, "Table")), vec![1, 2]);
    assert_eq!(serials(&read_rows(&path, "Items")), vec![3, 4, 5]);
}

#[tokio::test]
async fn images_are_validated_and_downloaded() {
    let tmp = TempDir::new().unwrap();
    let html = r#"<html><body><ul>
        <li class="p"><img src="/img/1.png"><h3>One</h3></li>
        <li class="p"><img src="/img/2.png"><h3>Two</h3></li>
        <li class="p"><h3>Three</h3></li>
      </ul></body></html>"#;
    let page = MockPage::paged(URL, vec![html.to_string()]);
    let images = MockImageClient::new()
        .with_image("https://shop.test/img/1.png", "image/png", b"one")
        .with_response(
            "https://shop.test/img/2.png",
            MockImage::NotImage("text/html".into()),
        );
    let config = SessionConfig::new(URL, "results")
        .with_output_dir(tmp.path())
        .with_image_dir("pics");

    let (summary, events) = run(page, images.clone(), config, None).await;

    assert_eq!(summary.status, CompletionStatus::Completed);
    let rows = read_rows(&tmp.path().join("results.xlsx"), "Items");
    let header = &rows[0];
    let status = header.iter().position(|h| h == "image_status").unwrap();
    let local = header.iter().position(|h| h == "image_local").unwrap();
    assert_eq!(rows[1][status], "downloaded");
    assert_eq!(rows[2][status], "invalid");
    assert_eq!(rows[3][status], "missing");

    let saved = tmp.path().join("pics").join("1.png");
    assert_eq!(rows[1][local], saved.display().to_string());
    assert_eq!(std::fs::read(saved).unwrap(), b"one");
    assert_eq!(images.download_calls().len(), 1);
    assert_eq!(messages(&events, EventCategory::Image).len(), 2);
}

#[tokio::test]
async fn in_place_pagination_waits_out_the_click_timeout() {
    let tmp = TempDir::new().unwrap();
    let pages = (0..3)
        .map(|p| catalog(&names(&format!("P{p}"), 0..4), Some(p < 2)))
        .collect();
    let page = MockPage::paged(URL, pages).with_in_place_clicks();
    let tuning = tuning().with_navigation_timeout(Duration::from_millis(50));
    let session = ScrapeSession::new(
        config(tmp.path()),
        tuning,
        page.clone(),
        NoImages,
        TracingReporter,
    )
    .unwrap();

    let summary = session.run().await;

    assert_eq!(summary.status, CompletionStatus::Completed);
    assert_eq!(summary.termination, Some(TerminationReason::LastPage));
    assert_eq!(summary.total_records, 12);
    assert_eq!(page.clicks().len(), 2);
}

#[tokio::test]
async fn transient_click_failure_is_retried_once() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::paged(
        URL,
        vec![
            catalog(&names("A", 0..4), Some(true)),
            catalog(&names("B", 0..4), Some(false)),
        ],
    )
    .with_click_errors(vec![AppError::Timeout(30)]);

    let (summary, _) = run(page.clone(), NoImages, config(tmp.path()), None).await;

    assert_eq!(summary.total_records, 8);
    assert_eq!(summary.termination, Some(TerminationReason::LastPage));
    assert_eq!(page.clicks().len(), 2);
}

#[tokio::test]
async fn persistent_click_failure_ends_navigation() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::paged(
        URL,
        vec![
            catalog(&names("A", 0..4), Some(true)),
            catalog(&names("B", 0..4), Some(false)),
        ],
    )
    .with_click_errors(vec![
        AppError::NavigationError("no idle".into()),
        AppError::NavigationError("no idle".into()),
    ]);

    let (summary, events) = run(page, NoImages, config(tmp.path()), None).await;

    assert_eq!(summary.status, CompletionStatus::Completed);
    assert_eq!(summary.termination, Some(TerminationReason::NavigationFailed));
    assert_eq!(summary.total_records, 4);
    assert!(
        messages(&events, EventCategory::Navigation)
            .iter()
            .any(|m| m.contains("no idle"))
    );
}

#[tokio::test]
async fn unwritable_output_fails_with_state_report() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("occupied");
    std::fs::write(&blocker, b"file").unwrap();
    let page = MockPage::paged(URL, vec![catalog(&names("X", 0..3), None)]);

    let (summary, events) = run(page, NoImages, config(&blocker.join("out")), None).await;

    assert_eq!(summary.status, CompletionStatus::Failed);
    assert_eq!(summary.output_path, None);
    assert!(summary.error.is_some());
    let saves = messages(&events, EventCategory::Save);
    assert!(saves.iter().any(|m| m.contains("3 records in memory")));
}

#[tokio::test]
async fn csv_output_mirrors_sheets() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::paged(URL, vec![catalog(&names("Row", 0..3), None)]);

    let (summary, _) = run(
        page,
        NoImages,
        config(tmp.path()).with_format(ExportFormat::Csv),
        None,
    )
    .await;

    let dir = tmp.path().join("results");
    assert_eq!(summary.output_path, Some(dir.clone()));
    let mut reader = csv::Reader::from_path(dir.join("Items.csv")).unwrap();
    assert_eq!(
        reader.headers().unwrap().iter().collect::<Vec<_>>(),
        vec!["serial_no", "title", "price"]
    );
    assert_eq!(reader.records().count(), 3);
}
