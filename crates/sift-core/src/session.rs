//! Session orchestration: the single control loop that ties the page
//! driver, detector, extractor, deduplicator, navigation controller, image
//! pool and export manager together.
//!
//! ```text
//! Idle ─> Running ─┬─> Completed ─┐
//!            │     └─> Stopping ──┴─> Stopped ─> Saved
//!            └──────────────────────────────────> Failed
//! ```
//!
//! The loop only suspends while waiting on the driver (load, click, scroll,
//! settle) or on the image pool at the very end. The cancellation token is
//! re-checked after every one of those waits before the page is touched
//! again.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::config::{ScrapeTuning, SessionConfig};
use crate::dedup::{Admission, Deduplicator, Normalizer};
use crate::detect::{Affordances, StructureDetector, VerdictKind};
use crate::error::AppError;
use crate::events::{SessionEvent, SessionReporter};
use crate::export::{ExportManager, ExportOptions};
use crate::extract::extract;
use crate::images::{ImagePool, ImageSettings};
use crate::models::{CanonicalRecord, ImageCell, ImageStatus, ImageTask, compute_hash};
use crate::navigation::{
    NavDecision, NavigationController, TerminationReason, bounded, retry_once, wait_for_settle,
};
use crate::page::{PageSnapshot, ParsedPage};
use crate::traits::{ImageClient, PageDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Completed,
    Saved,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Saved | SessionState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    StoppedEarly,
    Failed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Completed => "completed",
            CompletionStatus::StoppedEarly => "stopped early",
            CompletionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal completion notice handed to the shell.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub status: CompletionStatus,
    pub total_records: usize,
    /// Set once the artifact has been written at least once.
    pub output_path: Option<PathBuf>,
    pub sheets: Vec<String>,
    pub termination: Option<TerminationReason>,
    pub error: Option<String>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session {}: {} record(s)", self.status, self.total_records)?;
        if let Some(path) = &self.output_path {
            write!(f, " saved to {}", path.display())?;
        }
        if let Some(reason) = &self.termination {
            write!(f, " ({reason})")?;
        }
        if let Some(error) = &self.error {
            write!(f, "; error: {error}")?;
        }
        Ok(())
    }
}

/// Shell-side control of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Request a cooperative stop. The current page is still extracted and
    /// everything admitted so far is saved.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `Saved` or `Failed`.
    pub async fn wait_terminal(&mut self) -> SessionState {
        if let Ok(state) = self.state.wait_for(SessionState::is_terminal).await {
            return *state;
        }
        *self.state.borrow()
    }
}

/// Everything one snapshot produced, owned so it can cross await points.
struct PageCycle {
    kind: VerdictKind,
    tables: usize,
    lists: usize,
    affordances: Affordances,
    records: Vec<CanonicalRecord>,
    duplicates: usize,
    signature: String,
}

/// Mutable state owned by one run.
struct RunState<C: ImageClient> {
    export: ExportManager,
    dedup: Deduplicator,
    nav: NavigationController,
    images: Option<ImagePool<C>>,
    pages: u32,
}

/// One scrape session: configuration plus collaborators.
pub struct ScrapeSession<D, C, R>
where
    D: PageDriver,
    C: ImageClient,
    R: SessionReporter,
{
    id: Uuid,
    config: SessionConfig,
    target: Url,
    tuning: ScrapeTuning,
    detector: StructureDetector,
    driver: D,
    image_client: C,
    reporter: R,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl<D, C, R> ScrapeSession<D, C, R>
where
    D: PageDriver,
    C: ImageClient,
    R: SessionReporter,
{
    /// Validate `config` and assemble an idle session.
    pub fn new(
        config: SessionConfig,
        tuning: ScrapeTuning,
        driver: D,
        image_client: C,
        reporter: R,
    ) -> Result<Self, AppError> {
        let target = config.validate()?;
        let (state, _) = watch::channel(SessionState::Idle);
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            target,
            detector: StructureDetector::new(tuning.detection.clone()),
            tuning,
            driver,
            image_client,
            reporter,
            cancel: CancellationToken::new(),
            state,
        })
    }

    /// Use an externally owned stop token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Run to completion. Never panics on page or storage failures; the
    /// outcome is always described by the returned summary.
    pub async fn run(self) -> SessionSummary {
        self.set_state(SessionState::Running);
        self.reporter.report(SessionEvent::Started {
            session_id: self.id,
            url: self.target.as_str(),
        });

        let mut run = RunState {
            export: ExportManager::new(ExportOptions {
                format: self.config.format,
                path: self.config.output_path(),
                image_status: self.config.images_enabled(),
                image_local: self.config.download_images,
            }),
            dedup: Deduplicator::new(Normalizer::new(&self.tuning.volatile_fields)),
            nav: NavigationController::new(
                self.config.max_pagination,
                self.tuning.stagnant_scroll_limit,
            ),
            images: self.config.images_enabled().then(|| {
                ImagePool::new(
                    self.image_client.clone(),
                    self.config.image_concurrency,
                    ImageSettings {
                        download: self.config.download_images,
                        dir: self.config.output_dir.join(&self.config.image_dir),
                        timeout: self.tuning.image_timeout,
                    },
                    self.cancel.clone(),
                )
            }),
            pages: 0,
        };

        let outcome = self.drive(&mut run).await;

        if let Err(e) = self.driver.close().await {
            tracing::warn!(error = %e, "Failed to close page");
        }

        let summary = match outcome {
            Ok(reason) => self.finish(run, reason).await,
            Err(e) => self.fail(run, e).await,
        };
        self.reporter.complete(&summary);
        summary
    }

    async fn drive(&self, run: &mut RunState<C>) -> Result<TerminationReason, AppError> {
        let timeout = self.tuning.navigation_timeout;
        let backoff = self.tuning.retry_backoff;

        let opened = retry_once("open", backoff, &self.cancel, || {
            bounded(timeout, self.driver.open(self.target.as_str()))
        })
        .await;
        if let Err(e) = opened {
            self.reporter.report(SessionEvent::NavigationFailed {
                error: &e.to_string(),
            });
            return Err(e);
        }
        self.reporter.report(SessionEvent::PageLoaded {
            url: self.target.as_str(),
        });

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.observe_stop(&mut run.nav));
            }

            let snapshot = match retry_once("snapshot", backoff, &self.cancel, || {
                bounded(timeout, self.driver.snapshot())
            })
            .await
            {
                Ok(snapshot) => snapshot,
                Err(e) if run.pages == 0 => {
                    self.reporter.report(SessionEvent::NavigationFailed {
                        error: &e.to_string(),
                    });
                    return Err(e);
                }
                Err(e) => return Ok(self.navigation_failed(&mut run.nav, &e)),
            };
            run.pages += 1;

            // A snapshot in hand is always extracted in full, stop or not.
            let cycle = self.process(&snapshot, &mut run.dedup);
            self.reporter.report(SessionEvent::Detected {
                page: run.pages,
                kind: cycle.kind,
                tables: cycle.tables,
                lists: cycle.lists,
                pagination: cycle.affordances.pagination.is_some(),
                scroll: cycle.affordances.scroll.is_some(),
            });

            let admitted = cycle.records.len();
            for mut record in cycle.records {
                if let Some(pool) = run.images.as_mut()
                    && let Some(url) = record.image_url()
                {
                    pool.submit(ImageTask::new(record.serial_no, record.source, url));
                    record.image = Some(ImageCell {
                        status: ImageStatus::Pending,
                        local_path: None,
                    });
                }
                run.export.append(record)?;
            }
            self.reporter.report(SessionEvent::Extracted {
                page: run.pages,
                admitted,
                duplicates: cycle.duplicates,
                total: run.export.total_records(),
            });

            self.collect_images(run)?;
            self.checkpoint(&mut run.export)?;

            if let Some(reason) = run.nav.observe_cycle(&cycle.signature, admitted) {
                self.reporter.report(SessionEvent::Terminated { reason });
                return Ok(reason);
            }
            if self.cancel.is_cancelled() {
                return Ok(self.observe_stop(&mut run.nav));
            }

            match run.nav.decide(&cycle.affordances) {
                NavDecision::Paginate(control) => {
                    self.reporter.report(SessionEvent::Paginating {
                        attempt: run.nav.attempts(),
                        label: &control.label,
                    });
                    // The driver spends up to `timeout` waiting for a navigation that
                    // in-place pagination never makes; the outer bound must outlast it.
                    let clicked = retry_once("click", backoff, &self.cancel, || {
                        bounded(
                            timeout.saturating_mul(2),
                            self.driver.click(&control.selector, timeout),
                        )
                    })
                    .await;
                    if let Err(e) = clicked {
                        return Ok(self.navigation_failed(&mut run.nav, &e));
                    }
                }
                NavDecision::Scroll(scroll) => {
                    let container = scroll.container.as_deref();
                    let before = self
                        .driver
                        .scroll_height(container)
                        .await
                        .unwrap_or(scroll.scroll_height);
                    if self.cancel.is_cancelled() {
                        return Ok(self.observe_stop(&mut run.nav));
                    }
                    let scrolled = retry_once("scroll", backoff, &self.cancel, || {
                        bounded(timeout, self.driver.scroll_to_bottom(container))
                    })
                    .await;
                    if let Err(e) = scrolled {
                        return Ok(self.navigation_failed(&mut run.nav, &e));
                    }
                    let settled = wait_for_settle(
                        &self.driver,
                        container,
                        before,
                        self.tuning.scroll_settle,
                        self.tuning.scroll_poll,
                        &self.cancel,
                    )
                    .await;
                    let settled = match settled {
                        Ok(settled) => settled,
                        Err(e) => return Ok(self.navigation_failed(&mut run.nav, &e)),
                    };
                    run.nav.scroll_settled(settled.grew);
                    self.reporter.report(SessionEvent::Scrolled {
                        attempt: run.nav.attempts(),
                        grew: settled.grew,
                        height: settled.height,
                    });
                }
                NavDecision::Terminate(reason) => {
                    self.reporter.report(SessionEvent::Terminated { reason });
                    return Ok(reason);
                }
            }
        }
    }

    /// Parse, detect, extract and admit one snapshot. Synchronous: the
    /// parsed DOM never crosses an await.
    fn process(&self, snapshot: &PageSnapshot, dedup: &mut Deduplicator) -> PageCycle {
        let page = ParsedPage::parse(snapshot);
        let verdict = self.detector.detect(&page);

        let mut records = Vec::new();
        let mut duplicates = 0;
        let mut fingerprints = String::new();
        for raw in extract(&verdict) {
            let admission = dedup.admit(raw, page.base_url());
            fingerprints.push_str(admission.fingerprint());
            match admission {
                Admission::Admitted(record) => records.push(record),
                Admission::Rejected { .. } => duplicates += 1,
                Admission::Blank { .. } => {}
            }
        }

        PageCycle {
            kind: verdict.kind(),
            tables: verdict.tables().len(),
            lists: verdict.lists().len(),
            affordances: verdict.affordances.clone(),
            records,
            duplicates,
            signature: compute_hash(&fingerprints),
        }
    }

    fn collect_images(&self, run: &mut RunState<C>) -> Result<(), AppError> {
        let Some(pool) = run.images.as_mut() else {
            return Ok(());
        };
        for task in pool.drain() {
            self.apply_image(&mut run.export, &task)?;
        }
        Ok(())
    }

    fn apply_image(&self, export: &mut ExportManager, task: &ImageTask) -> Result<(), AppError> {
        export.apply_image_outcome(task)?;
        self.reporter.report(SessionEvent::ImageChecked {
            serial_no: task.serial_no,
            url: &task.url,
            status: task.status,
        });
        Ok(())
    }

    fn checkpoint(&self, export: &mut ExportManager) -> Result<PathBuf, AppError> {
        let path = export.checkpoint()?;
        self.reporter.report(SessionEvent::Checkpointed {
            path: &path,
            records: export.total_records(),
        });
        Ok(path)
    }

    fn observe_stop(&self, nav: &mut NavigationController) -> TerminationReason {
        self.set_state(SessionState::Stopping);
        self.reporter.report(SessionEvent::StopRequested);
        nav.terminate(TerminationReason::Stopped)
    }

    fn navigation_failed(&self, nav: &mut NavigationController, error: &AppError) -> TerminationReason {
        self.reporter.report(SessionEvent::NavigationFailed {
            error: &error.to_string(),
        });
        let reason = nav.terminate(TerminationReason::NavigationFailed);
        self.reporter.report(SessionEvent::Terminated { reason });
        reason
    }

    /// Wait for started image tasks, then write the final artifact.
    async fn finish(&self, mut run: RunState<C>, reason: TerminationReason) -> SessionSummary {
        let (state, status) = match reason {
            TerminationReason::Stopped => (SessionState::Stopped, CompletionStatus::StoppedEarly),
            _ => (SessionState::Completed, CompletionStatus::Completed),
        };
        self.set_state(state);

        let mut result = Ok(());
        if let Some(pool) = run.images.take() {
            for task in pool.finish().await {
                if let Err(e) = self.apply_image(&mut run.export, &task) {
                    result = Err(e);
                    break;
                }
            }
        }
        let saved = result.and_then(|()| run.export.finalize());

        match saved {
            Ok(path) => {
                self.reporter.report(SessionEvent::Checkpointed {
                    path: &path,
                    records: run.export.total_records(),
                });
                self.set_state(SessionState::Saved);
                tracing::info!(
                    session_id = %self.id,
                    pages = run.pages,
                    attempts = run.nav.attempts(),
                    duplicates = run.dedup.rejected(),
                    "Session saved"
                );
                self.summary(&run, status, Some(path), Some(reason), None)
            }
            Err(e) => self.fail(run, e).await,
        }
    }

    /// Terminal failure: report what is still held in memory.
    async fn fail(&self, mut run: RunState<C>, error: AppError) -> SessionSummary {
        if error.is_fatal() {
            self.reporter.report(SessionEvent::SaveFailed {
                error: &error.to_string(),
                in_memory: &run.export.describe(),
            });
        }
        // Skip queued image work; wait only for tasks already in flight.
        self.cancel.cancel();
        if let Some(pool) = run.images.take() {
            pool.finish().await;
        }
        self.set_state(SessionState::Failed);
        tracing::error!(session_id = %self.id, error = %error, "Session failed");

        let output = (run.export.checkpoints() > 0).then(|| run.export.path().to_path_buf());
        self.summary(&run, CompletionStatus::Failed, output, None, Some(error.to_string()))
    }

    fn summary(
        &self,
        run: &RunState<C>,
        status: CompletionStatus,
        output_path: Option<PathBuf>,
        termination: Option<TerminationReason>,
        error: Option<String>,
    ) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            status,
            total_records: run.export.total_records(),
            output_path,
            sheets: run.export.sheet_names(),
            termination,
            error,
        }
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, ?state, "Session state");
        self.state.send_replace(state);
    }
}
