use std::time::Duration;

use sift_client::{HttpPageDriver, ReqwestImageClient};
use sift_core::config::{ExportFormat, ScrapeTuning, SessionConfig};
use sift_core::events::TracingReporter;
use sift_core::navigation::TerminationReason;
use sift_core::session::{CompletionStatus, ScrapeSession};
use tempfile::TempDir;

use crate::integration::common::{Route, serve};

fn item(n: usize) -> String {
    format!(
        r#"<div class="item"><img src="/img/{n}.png"><h3>Lamp {n}</h3><span class="price">${n}0</span></div>"#
    )
}

fn page(items: std::ops::Range<usize>, next: Option<&str>) -> String {
    let items: String = items.map(item).collect();
    let pager = match next {
        Some(href) => format!(r#"<li class="next"><a href="{href}">Next</a></li>"#),
        None => r#"<li class="next disabled"><a>Next</a></li>"#.to_string(),
    };
    format!(
        r#"<html><body><div class="results">{items}</div><ul class="pagination">{pager}</ul></body></html>"#
    )
}

#[tokio::test]
async fn paginated_catalog_over_http() {
    let server = serve(vec![
        Route::html("/lamps", page(1..4, Some("/lamps?page=2"))),
        Route::html("/lamps?page=2", page(4..7, None)),
        Route::bytes("/img/1.png", "image/png", b"one"),
        Route::bytes("/img/2.png", "image/png", b"two"),
        Route::html("/img/3.png", "<p>moved</p>"),
        Route::bytes("/img/4.png", "image/png", b"four"),
    ])
    .await;
    let tmp = TempDir::new().unwrap();

    let config = SessionConfig::new(server.url("/lamps"), "lamps")
        .with_output_dir(tmp.path())
        .with_format(ExportFormat::Csv)
        .with_image_concurrency(2);
    let tuning = ScrapeTuning::default().with_retry_backoff(Duration::from_millis(10));
    let session = ScrapeSession::new(
        config,
        tuning,
        HttpPageDriver::with_timeout(Duration::from_secs(5)).unwrap(),
        ReqwestImageClient::with_timeout(Duration::from_secs(5)).unwrap(),
        TracingReporter,
    )
    .unwrap();

    let summary = session.run().await;
    assert_eq!(summary.status, CompletionStatus::Completed, "{summary}");
    assert_eq!(summary.total_records, 6);
    assert_eq!(summary.termination, Some(TerminationReason::LastPage));

    let images = tmp.path().join("scraped_images");
    assert_eq!(std::fs::read(images.join("1.png")).unwrap(), b"one");
    assert_eq!(std::fs::read(images.join("4.png")).unwrap(), b"four");
    assert!(!images.join("3.png").exists());

    let csv = std::fs::read_to_string(tmp.path().join("lamps").join("Items.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 7);
    assert!(lines[0].starts_with("serial_no,"));
    assert!(lines[0].ends_with("image_status,image_local"));
    assert!(lines[1].starts_with("1,") && lines[1].contains(",downloaded,"));
    assert!(lines[3].contains(",invalid,"));
    assert!(lines[5].contains(",invalid,"), "404 image: {}", lines[5]);
}
