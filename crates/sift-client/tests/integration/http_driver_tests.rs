use std::time::Duration;

use sift_client::HttpPageDriver;
use sift_core::error::AppError;
use sift_core::traits::PageDriver;
use tempfile::TempDir;
use url::Url;

use crate::integration::common::{Route, dead_address, serve};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn open_snapshot_and_follow_next_link() {
    let server = serve(vec![
        Route::html(
            "/list?page=1",
            r#"<ul><li>one</li></ul><a class="next" href="/list?page=2">Next</a>"#,
        ),
        Route::html("/list?page=2", "<ul><li>two</li></ul>"),
    ])
    .await;
    let driver = HttpPageDriver::with_timeout(TIMEOUT).unwrap();

    driver.open(&server.url("/list?page=1")).await.unwrap();
    let first = driver.snapshot().await.unwrap();
    assert_eq!(first.url, server.url("/list?page=1"));
    assert!(first.html.contains("one"));
    assert_eq!(first.scroll_height, 0);
    assert_eq!(first.viewport_height, 0);

    driver.click("a.next", TIMEOUT).await.unwrap();
    let second = driver.snapshot().await.unwrap();
    assert_eq!(second.url, server.url("/list?page=2"));
    assert!(second.html.contains("two"));

    assert_eq!(
        server.requests(),
        vec!["GET /list?page=1", "GET /list?page=2"]
    );
}

#[tokio::test]
async fn error_status_is_http_error() {
    let server = serve(vec![Route::html("/broken", "oops").status(500)]).await;
    let driver = HttpPageDriver::with_timeout(TIMEOUT).unwrap();

    let err = driver.open(&server.url("/broken")).await.unwrap_err();
    assert!(matches!(err, AppError::HttpError(_)));
    assert!(err.to_string().contains("HTTP 500"));
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let driver = HttpPageDriver::with_timeout(TIMEOUT).unwrap();
    let err = driver
        .open(&format!("{}/", dead_address().await))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err}");
}

#[tokio::test]
async fn local_files_are_readable() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("page1.html"),
        r#"<p>first</p><a rel="next" href="page2.html">Next</a>"#,
    )
    .unwrap();
    std::fs::write(tmp.path().join("page2.html"), "<p>second</p>").unwrap();

    let start = Url::from_file_path(tmp.path().join("page1.html")).unwrap();
    let driver = HttpPageDriver::new().unwrap();
    driver.open(start.as_str()).await.unwrap();
    driver.click("a[rel=\"next\"]", TIMEOUT).await.unwrap();

    let snapshot = driver.snapshot().await.unwrap();
    assert!(snapshot.url.ends_with("/page2.html"));
    assert!(snapshot.html.contains("second"));

    driver.close().await.unwrap();
    assert!(driver.snapshot().await.is_err());
}

#[tokio::test]
async fn missing_local_file_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let url = Url::from_file_path(tmp.path().join("absent.html")).unwrap();
    let driver = HttpPageDriver::new().unwrap();
    assert!(matches!(
        driver.open(url.as_str()).await,
        Err(AppError::Io(_))
    ));
}
