//! Bounded-concurrency image validation and download.
//!
//! Tasks run on a [`JoinSet`] gated by a [`Semaphore`]; finished tasks are
//! handed back over an unbounded channel the session drains before each
//! checkpoint. A task never fails its owning record: every error ends in a
//! terminal [`ImageStatus`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{ImageStatus, ImageTask};
use crate::navigation::bounded;
use crate::traits::ImageClient;

/// How each task is carried out.
#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub download: bool,
    pub dir: PathBuf,
    pub timeout: Duration,
}

pub struct ImagePool<C: ImageClient> {
    client: C,
    settings: Arc<ImageSettings>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    tx: mpsc::UnboundedSender<ImageTask>,
    rx: mpsc::UnboundedReceiver<ImageTask>,
    cancel: CancellationToken,
    submitted: usize,
}

impl<C: ImageClient> ImagePool<C> {
    /// `concurrency` is clamped to at least one worker.
    pub fn new(
        client: C,
        concurrency: usize,
        settings: ImageSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client,
            settings: Arc::new(settings),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            tx,
            rx,
            cancel,
            submitted: 0,
        }
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Queue a task. Tasks still waiting for a permit when the session is
    /// stopped are skipped and stay `Pending`.
    pub fn submit(&mut self, task: ImageTask) {
        let client = self.client.clone();
        let settings = self.settings.clone();
        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        let tx = self.tx.clone();
        self.submitted += 1;

        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(serial_no = task.serial_no, "Image task skipped after stop");
                    return;
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            let done = run_task(&client, task, &settings).await;
            // Receiver gone means the session already finished.
            let _ = tx.send(done);
        });
    }

    /// Outcomes that have arrived so far, without waiting.
    pub fn drain(&mut self) -> Vec<ImageTask> {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Image task panicked");
            }
        }
        let mut done = Vec::new();
        while let Ok(task) = self.rx.try_recv() {
            done.push(task);
        }
        done
    }

    /// Wait for every started task, then return all outstanding outcomes.
    pub async fn finish(mut self) -> Vec<ImageTask> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Image task panicked");
            }
        }
        self.drain()
    }
}

async fn run_task<C: ImageClient>(client: &C, mut task: ImageTask, settings: &ImageSettings) -> ImageTask {
    let probe = match bounded(settings.timeout, client.probe(&task.url)).await {
        Ok(probe) => probe,
        Err(e) => {
            tracing::debug!(serial_no = task.serial_no, url = %task.url, error = %e, "Image probe failed");
            task.status = ImageStatus::Failed;
            return task;
        }
    };
    if !probe.is_image() {
        task.status = ImageStatus::Invalid;
        return task;
    }
    if !settings.download {
        task.status = ImageStatus::Valid;
        return task;
    }

    match download(client, &task, probe.content_type.as_deref(), settings).await {
        Ok(path) => {
            task.status = ImageStatus::Downloaded;
            task.local_path = Some(path);
        }
        Err(e) => {
            tracing::debug!(serial_no = task.serial_no, url = %task.url, error = %e, "Image download failed");
            task.status = ImageStatus::Failed;
        }
    }
    task
}

async fn download<C: ImageClient>(
    client: &C,
    task: &ImageTask,
    probed_type: Option<&str>,
    settings: &ImageSettings,
) -> Result<PathBuf, AppError> {
    let body = bounded(settings.timeout, client.download(&task.url)).await?;
    let ext = body
        .content_type
        .as_deref()
        .or(probed_type)
        .and_then(extension_for_content_type)
        .or_else(|| extension_from_url(&task.url))
        .unwrap_or_else(|| "img".to_string());

    tokio::fs::create_dir_all(&settings.dir).await?;
    let path = settings.dir.join(format!("{}.{ext}", task.serial_no));
    tokio::fs::write(&path, &body.bytes).await?;
    Ok(path)
}

/// File extension for an `image/*` MIME type.
pub fn extension_for_content_type(content_type: &str) -> Option<String> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let subtype = mime.strip_prefix("image/")?;
    let ext = match subtype {
        "jpeg" | "jpg" | "pjpeg" => "jpg",
        "svg+xml" => "svg",
        "x-icon" | "vnd.microsoft.icon" => "ico",
        "tiff" => "tif",
        "" => return None,
        other => other,
    };
    Some(ext.to_string())
}

fn extension_from_url(url: &str) -> Option<String> {
    let path = url::Url::parse(url).ok()?.path().to_string();
    let ext = Path::new(&path).extension()?.to_str()?.to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}
