/// Smoke-test for `ChromiumDriver`.
///
/// Launches a headless Chromium, opens <https://example.com>, and verifies
/// the snapshot carries the rendered `<h1>` and real scroll metrics.
///
/// Run with:
///   cargo run --example browser_smoke --features browser
use sift_client::ChromiumDriver;
use sift_core::traits::PageDriver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser…");
    let driver = ChromiumDriver::launch(true).await?;

    let url = "https://example.com";
    println!("Opening {url} …");
    driver.open(url).await?;
    let snapshot = driver.snapshot().await?;

    assert!(
        snapshot.html.contains("<h1>Example Domain</h1>"),
        "Expected <h1> not found in rendered HTML"
    );
    assert!(snapshot.viewport_height > 0, "Viewport height not reported");

    driver.scroll_to_bottom(None).await?;
    let height = driver.scroll_height(None).await?;
    println!(
        "OK — {} bytes of HTML, scroll height {height}px, viewport {}px",
        snapshot.html.len(),
        snapshot.viewport_height
    );

    driver.close().await?;
    Ok(())
}
