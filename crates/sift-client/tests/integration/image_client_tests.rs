use std::time::Duration;

use sift_client::ReqwestImageClient;
use sift_core::traits::ImageClient;

use crate::integration::common::{Route, serve};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

fn client() -> ReqwestImageClient {
    ReqwestImageClient::with_timeout(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn probe_uses_head() {
    let server = serve(vec![Route::bytes("/a.png", "image/png", PNG)]).await;

    let probe = client().probe(&server.url("/a.png")).await.unwrap();
    assert_eq!(probe.status, 200);
    assert!(probe.is_image());
    assert_eq!(server.requests(), vec!["HEAD /a.png"]);
}

#[tokio::test]
async fn probe_falls_back_to_ranged_get() {
    let server = serve(vec![
        Route::html("/b.jpg", "").only("HEAD").status(405),
        Route::bytes("/b.jpg", "image/jpeg", b"j").status(206),
    ])
    .await;

    let probe = client().probe(&server.url("/b.jpg")).await.unwrap();
    assert_eq!(probe.status, 206);
    assert_eq!(probe.content_type.as_deref(), Some("image/jpeg"));
    assert!(probe.is_image());
    assert_eq!(server.requests(), vec!["HEAD /b.jpg", "GET /b.jpg"]);
}

#[tokio::test]
async fn probe_reports_non_images() {
    let server = serve(vec![Route::html("/page", "<p>hi</p>")]).await;
    let images = client();

    let html = images.probe(&server.url("/page")).await.unwrap();
    assert!(!html.is_image());

    let missing = images.probe(&server.url("/gone.png")).await.unwrap();
    assert_eq!(missing.status, 404);
    assert!(!missing.is_image());
}

#[tokio::test]
async fn download_returns_body() {
    let server = serve(vec![Route::bytes("/a.png", "image/png", PNG)]).await;
    let images = client();

    let body = images.download(&server.url("/a.png")).await.unwrap();
    assert_eq!(body.bytes, PNG);
    assert_eq!(body.content_type.as_deref(), Some("image/png"));

    let err = images.download(&server.url("/gone.png")).await.unwrap_err();
    assert!(err.to_string().contains("HTTP 404"));
}
