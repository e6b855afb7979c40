//! Page-cycle state machine: decides whether to paginate, scroll or stop,
//! plus the bounded/retried waits the control loop performs.
//!
//! ```text
//! AtRest ─> Extracting ─┬─> Paginating ─┐
//!              ^        ├─> Scrolling ──┤
//!              │        └─> Terminating │
//!              └────────────────────────┘
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::detect::{Affordances, PaginationControl, ScrollAffordance};
use crate::error::AppError;
use crate::traits::PageDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavPhase {
    AtRest,
    Extracting,
    Paginating,
    Scrolling,
    Terminating,
}

/// Why the page chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Neither pagination nor scroll affordance on the page.
    NoAffordance,
    /// The "next" control is present but disabled.
    LastPage,
    /// A click produced the same content as the page before it.
    NoStructuralChange,
    /// Consecutive scrolls without growth or new records.
    ScrollExhausted,
    /// Configured maximum of pagination clicks plus scroll cycles reached.
    AttemptCap,
    /// Navigation kept failing after its retry.
    NavigationFailed,
    /// Stop requested by the shell.
    Stopped,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::NoAffordance => "no pagination or scroll affordance",
            TerminationReason::LastPage => "next control disabled",
            TerminationReason::NoStructuralChange => "pagination produced no new content",
            TerminationReason::ScrollExhausted => "scrolling stopped producing content",
            TerminationReason::AttemptCap => "maximum pagination attempts reached",
            TerminationReason::NavigationFailed => "navigation failed",
            TerminationReason::Stopped => "stop requested",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavDecision {
    Paginate(PaginationControl),
    Scroll(ScrollAffordance),
    Terminate(TerminationReason),
}

/// Per-session navigation state.
#[derive(Debug)]
pub struct NavigationController {
    max_attempts: u32,
    stagnant_limit: u32,
    phase: NavPhase,
    attempts: u32,
    stagnant_scrolls: u32,
    /// Growth observed by the last settle, consumed by the next cycle.
    pending_growth: Option<bool>,
    last_signature: Option<String>,
}

impl NavigationController {
    pub fn new(max_attempts: u32, stagnant_limit: u32) -> Self {
        Self {
            max_attempts,
            stagnant_limit: stagnant_limit.max(1),
            phase: NavPhase::AtRest,
            attempts: 0,
            stagnant_scrolls: 0,
            pending_growth: None,
            last_signature: None,
        }
    }

    pub fn phase(&self) -> NavPhase {
        self.phase
    }

    /// Pagination clicks plus scroll cycles issued so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn stagnant_scrolls(&self) -> u32 {
        self.stagnant_scrolls
    }

    /// Account for an extracted snapshot.
    ///
    /// `signature` identifies the page's content; `admitted` counts records
    /// that passed dedup. Returns a reason when the cycle that led here
    /// turned out to be unproductive.
    pub fn observe_cycle(&mut self, signature: &str, admitted: usize) -> Option<TerminationReason> {
        let previous = self.last_signature.replace(signature.to_string());
        let came_from = self.phase;
        self.phase = NavPhase::Extracting;

        match came_from {
            NavPhase::Paginating if previous.as_deref() == Some(signature) => {
                Some(self.terminate(TerminationReason::NoStructuralChange))
            }
            NavPhase::Scrolling => {
                let grew = self.pending_growth.take().unwrap_or(false);
                if grew || admitted > 0 {
                    self.stagnant_scrolls = 0;
                    None
                } else {
                    self.stagnant_scrolls += 1;
                    tracing::debug!(
                        stagnant = self.stagnant_scrolls,
                        limit = self.stagnant_limit,
                        "Scroll cycle produced nothing"
                    );
                    (self.stagnant_scrolls >= self.stagnant_limit)
                        .then(|| self.terminate(TerminationReason::ScrollExhausted))
                }
            }
            _ => None,
        }
    }

    /// Choose the next step from the current page's affordances.
    pub fn decide(&mut self, affordances: &Affordances) -> NavDecision {
        let wanted = match (&affordances.pagination, &affordances.scroll) {
            (Some(control), _) if control.enabled => NavDecision::Paginate(control.clone()),
            (Some(_), _) => NavDecision::Terminate(TerminationReason::LastPage),
            (None, Some(scroll)) => NavDecision::Scroll(scroll.clone()),
            (None, None) => NavDecision::Terminate(TerminationReason::NoAffordance),
        };

        match wanted {
            NavDecision::Terminate(reason) => NavDecision::Terminate(self.terminate(reason)),
            _ if self.attempts >= self.max_attempts => {
                NavDecision::Terminate(self.terminate(TerminationReason::AttemptCap))
            }
            NavDecision::Paginate(control) => {
                self.attempts += 1;
                self.phase = NavPhase::Paginating;
                NavDecision::Paginate(control)
            }
            NavDecision::Scroll(scroll) => {
                self.attempts += 1;
                self.phase = NavPhase::Scrolling;
                NavDecision::Scroll(scroll)
            }
        }
    }

    /// Record whether the last scroll grew the page.
    pub fn scroll_settled(&mut self, grew: bool) {
        self.pending_growth = Some(grew);
    }

    pub fn terminate(&mut self, reason: TerminationReason) -> TerminationReason {
        self.phase = NavPhase::Terminating;
        reason
    }
}

/// Run `fut` with a deadline, mapping expiry to [`AppError::Timeout`].
pub async fn bounded<T, Fut>(timeout: Duration, fut: Fut) -> Result<T, AppError>
where
    Fut: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(timeout.as_secs())),
    }
}

/// Run `op`, retrying exactly once after `backoff` when the error is
/// transient. A stop during the backoff returns the original error.
pub async fn retry_once<T, F, Fut>(
    what: &str,
    backoff: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) if e.is_transient() => {
            tracing::warn!(operation = what, error = %e, "Transient failure, retrying once");
            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                () = cancel.cancelled() => return Err(e),
            }
            op().await
        }
        Err(e) => Err(e),
    }
}

/// Outcome of waiting for a scroll to load content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleOutcome {
    pub grew: bool,
    pub height: u64,
}

/// Poll the scroll height until it exceeds `before` or `settle` elapses.
///
/// A stop cuts the wait short; the caller re-checks the token afterwards.
pub async fn wait_for_settle<D: PageDriver>(
    driver: &D,
    container: Option<&str>,
    before: u64,
    settle: Duration,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<SettleOutcome, AppError> {
    let deadline = tokio::time::Instant::now() + settle;
    let mut height = before;
    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        let nap = poll.min(deadline - now);
        tokio::select! {
            () = tokio::time::sleep(nap) => {}
            () = cancel.cancelled() => break,
        }
        height = driver.scroll_height(container).await?;
        if height > before {
            return Ok(SettleOutcome { grew: true, height });
        }
    }
    Ok(SettleOutcome {
        grew: height > before,
        height,
    })
}
