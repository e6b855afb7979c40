use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use sift_client::{HttpPageDriver, ReqwestImageClient};
use sift_core::config::{DEFAULT_IMAGE_CONCURRENCY, DEFAULT_IMAGE_DIR, DEFAULT_MAX_PAGINATION};
use sift_core::traits::PageDriver;
use sift_core::{
    ChannelReporter, CompletionStatus, ExportFormat, LogFileReporter, ScrapeSession, ScrapeTuning,
    SessionConfig, SessionHandle, SessionSummary, ShellEvent,
};

#[derive(Parser)]
#[command(name = "sift", version, about = "Adaptive table and list scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every table or repeated list reachable from a page
    Scrape {
        /// Target URL (http, https or file)
        #[arg(short, long, env = "SIFT_URL")]
        url: String,

        /// Output name; ".xlsx" is appended when no extension is given
        #[arg(short, long, env = "SIFT_OUTPUT", default_value = "scraped_data")]
        output: String,

        /// Directory receiving the output, images and the session log
        #[arg(long, env = "SIFT_OUTPUT_DIR", default_value = ".")]
        output_dir: PathBuf,

        /// Output format: xlsx (one workbook) or csv (one file per sheet)
        #[arg(short, long, env = "SIFT_FORMAT", default_value_t = ExportFormat::Xlsx)]
        format: ExportFormat,

        /// Run the browser without a window
        #[arg(long, env = "SIFT_HEADLESS", default_value_t = false)]
        headless: bool,

        /// Fetch pages over plain HTTP instead of driving a browser
        #[arg(long = "static", env = "SIFT_STATIC", default_value_t = false)]
        static_html: bool,

        /// Maximum number of pagination clicks and scroll cycles
        #[arg(long, env = "SIFT_MAX_PAGES", default_value_t = DEFAULT_MAX_PAGINATION)]
        max_pages: u32,

        /// Concurrent image checks/downloads
        #[arg(long, env = "SIFT_IMAGE_CONCURRENCY", default_value_t = DEFAULT_IMAGE_CONCURRENCY)]
        image_concurrency: usize,

        /// Skip checking that image links resolve to images
        #[arg(long, env = "SIFT_NO_IMAGE_VALIDATION", default_value_t = false)]
        no_image_validation: bool,

        /// Do not download images
        #[arg(long, env = "SIFT_NO_IMAGES", default_value_t = false)]
        no_images: bool,

        /// Image directory, relative to the output directory
        #[arg(long, env = "SIFT_IMAGE_DIR", default_value = DEFAULT_IMAGE_DIR)]
        image_dir: PathBuf,

        /// Page load and click timeout in seconds
        #[arg(long, env = "SIFT_TIMEOUT", default_value_t = 30)]
        timeout: u64,

        /// Directory for the session log file (defaults to the output directory)
        #[arg(long, env = "SIFT_LOG_DIR")]
        log_dir: Option<PathBuf>,

        /// Print events and the summary as JSON lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sift=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            url,
            output,
            output_dir,
            format,
            headless,
            static_html,
            max_pages,
            image_concurrency,
            no_image_validation,
            no_images,
            image_dir,
            timeout,
            log_dir,
            json,
        } => {
            let config = SessionConfig::new(url, output)
                .with_output_dir(output_dir)
                .with_format(format)
                .with_headless(headless)
                .with_max_pagination(max_pages)
                .with_image_concurrency(image_concurrency)
                .with_image_validation(!no_image_validation)
                .with_image_download(!no_images)
                .with_image_dir(image_dir);
            let tuning =
                ScrapeTuning::default().with_navigation_timeout(Duration::from_secs(timeout));
            let log_dir = log_dir.unwrap_or_else(|| config.output_dir.clone());

            let summary = cmd_scrape(config, tuning, log_dir, static_html, json).await?;
            if summary.status == CompletionStatus::Failed {
                anyhow::bail!(
                    "Scrape failed: {}",
                    summary.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    Ok(())
}

async fn cmd_scrape(
    config: SessionConfig,
    tuning: ScrapeTuning,
    log_dir: PathBuf,
    static_html: bool,
    json: bool,
) -> Result<SessionSummary> {
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let images = ReqwestImageClient::with_timeout(tuning.image_timeout)
        .context("Failed to create image HTTP client")?;

    #[cfg(feature = "browser")]
    if !static_html {
        tracing::info!(headless = config.headless, "Launching browser");
        let driver =
            sift_client::ChromiumDriver::launch_with_timeout(config.headless, tuning.navigation_timeout)
                .await
                .context("Failed to launch browser (use --static to scrape without one)")?;
        return run_session(config, tuning, driver, images, log_dir, json).await;
    }

    #[cfg(not(feature = "browser"))]
    if !static_html {
        tracing::info!("Built without browser support; fetching pages over HTTP");
    }

    let driver = HttpPageDriver::with_timeout(tuning.navigation_timeout)
        .context("Failed to create HTTP client")?;
    run_session(config, tuning, driver, images, log_dir, json).await
}

async fn run_session<D: PageDriver>(
    config: SessionConfig,
    tuning: ScrapeTuning,
    driver: D,
    images: ReqwestImageClient,
    log_dir: PathBuf,
    json: bool,
) -> Result<SessionSummary> {
    let log = LogFileReporter::create(&log_dir, Local::now())
        .with_context(|| format!("Failed to open session log in {}", log_dir.display()))?;
    tracing::info!(log = %log.path().display(), "Session log opened");

    let (channel, rx) = ChannelReporter::channel();
    let session = ScrapeSession::new(config, tuning, driver, images, (channel, log))
        .map_err(|e| anyhow::anyhow!(e))?;

    tokio::spawn(stop_on_ctrl_c(session.handle()));
    let printer = tokio::spawn(print_events(rx, json));

    // The session owns the sending half; the printer ends when it is dropped.
    let summary = session.run().await;
    printer.await.context("Event printer panicked")??;

    Ok(summary)
}

/// First Ctrl-C requests a cooperative stop; later ones are swallowed until
/// the session has saved and the process exits.
async fn stop_on_ctrl_c(handle: SessionHandle) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("Stopping: finishing the current page and saving what was collected...");
    handle.stop();

    while tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("Already stopping; waiting for the save to finish");
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ShellEvent>, json: bool) -> Result<()> {
    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match event {
            ShellEvent::Event {
                at,
                category,
                message,
            } => {
                println!(
                    "{} [{category}] {message}",
                    at.with_timezone(&Local).format("%H:%M:%S")
                );
            }
            ShellEvent::Finished(summary) => {
                println!("\n{summary}");
                if !summary.sheets.is_empty() {
                    println!("Sheets: {}", summary.sheets.join(", "));
                }
            }
        }
    }
    Ok(())
}
