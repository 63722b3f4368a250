//! Element polling for a host UI that renders asynchronously.
//!
//! [`ElementWaiter::wait`] checks the host root immediately and then once per
//! poll tick until the selector matches or the budget is spent. Every call
//! gets its own poll task; nothing is shared or coalesced between callers.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::error::BridgeError;
use crate::host::{ElementRef, HostRoot};
use crate::timer::TaskHandle;

pub const DEFAULT_POLL_TICK: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ElementWaiter {
    root: Arc<dyn HostRoot>,
    tick: Duration,
}

impl ElementWaiter {
    pub fn new(root: Arc<dyn HostRoot>) -> Self {
        Self::with_tick(root, DEFAULT_POLL_TICK)
    }

    pub fn with_tick(root: Arc<dyn HostRoot>, tick: Duration) -> Self {
        Self {
            root,
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    pub fn root(&self) -> &Arc<dyn HostRoot> {
        &self.root
    }

    /// Start waiting for `selector`. Await the returned handle for the
    /// element, or cancel it to stop polling early.
    pub fn wait(&self, selector: &str, timeout: Duration) -> PendingWait {
        let (tx, rx) = oneshot::channel();
        let root = Arc::clone(&self.root);
        let tick = self.tick;
        let owned = selector.to_string();

        let task = TaskHandle::spawn(async move {
            let result = poll_until_found(root.as_ref(), &owned, timeout, tick).await;
            // Receiver gone means the caller stopped caring
            let _ = tx.send(result);
        });

        PendingWait {
            selector: selector.to_string(),
            rx,
            task,
        }
    }
}

async fn poll_until_found(
    root: &dyn HostRoot,
    selector: &str,
    timeout: Duration,
    tick: Duration,
) -> Result<ElementRef, BridgeError> {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut remaining = timeout;

    loop {
        interval.tick().await;
        if let Some(element) = root.query_selector(selector) {
            return Ok(element);
        }
        if remaining.is_zero() {
            tracing::warn!(selector, timeout_ms = timeout.as_millis() as u64, "element wait timed out");
            return Err(BridgeError::Timeout {
                selector: selector.to_string(),
                timeout,
            });
        }
        remaining = remaining.saturating_sub(tick);
    }
}

/// An outstanding element wait.
///
/// Awaiting yields the element or [`BridgeError::Timeout`]. The poll task is
/// torn down on resolution, on timeout, on [`PendingWait::cancel`] and when
/// the handle is dropped.
#[derive(Debug)]
pub struct PendingWait {
    selector: String,
    rx: oneshot::Receiver<Result<ElementRef, BridgeError>>,
    task: TaskHandle,
}

impl PendingWait {
    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }
}

impl IntoFuture for PendingWait {
    type Output = Result<ElementRef, BridgeError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        let PendingWait { selector, rx, task } = self;
        Box::pin(async move {
            let result = rx.await;
            drop(task);
            result.unwrap_or(Err(BridgeError::Cancelled { selector }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, ElementSpec};
    use tokio::time::Instant;

    fn waiter(doc: &Document) -> ElementWaiter {
        ElementWaiter::new(Arc::new(doc.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn present_element_resolves_without_waiting_a_tick() {
        let doc = Document::new("http://localhost/");
        doc.insert(ElementSpec::with_id("paste"));

        let start = Instant::now();
        let element = waiter(&doc)
            .wait("#paste", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(start.elapsed() < DEFAULT_POLL_TICK);
        element.click();
        assert_eq!(doc.clicks("#paste"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_element_resolves_on_following_tick() {
        let doc = Document::new("http://localhost/");
        let later = doc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            later.insert(ElementSpec::with_id("paste"));
        });

        let start = Instant::now();
        let result = waiter(&doc).wait("#paste", Duration::from_secs(2)).await;

        assert!(result.is_ok());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(350));
        assert!(elapsed <= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_element_times_out_within_one_tick_of_budget() {
        let doc = Document::new("http://localhost/");
        let budget = Duration::from_millis(1000);

        let start = Instant::now();
        let err = waiter(&doc).wait("#never", budget).await.unwrap_err();

        let elapsed = start.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= budget, "failed early after {elapsed:?}");
        assert!(elapsed < budget + DEFAULT_POLL_TICK, "failed late after {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn budget_not_a_multiple_of_tick_still_fails_in_window() {
        let doc = Document::new("http://localhost/");
        let budget = Duration::from_millis(250);

        let start = Instant::now();
        let err = waiter(&doc).wait("#never", budget).await.unwrap_err();

        let elapsed = start.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= budget && elapsed < budget + DEFAULT_POLL_TICK);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_checks_once() {
        let doc = Document::new("http://localhost/");
        let err = waiter(&doc).wait("#never", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { timeout, .. } if timeout.is_zero()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_reports_cancellation() {
        let doc = Document::new("http://localhost/");
        let pending = waiter(&doc).wait("#never", Duration::from_secs(5));
        assert_eq!(pending.selector(), "#never");
        pending.cancel();

        let err = pending.await.unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled { selector } if selector == "#never"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waits_are_independent() {
        let doc = Document::new("http://localhost/");
        doc.insert(ElementSpec::with_id("here"));
        let w = waiter(&doc);

        let (found, missing) = tokio::join!(
            w.wait("#here", Duration::from_millis(500)).into_future(),
            w.wait("#gone", Duration::from_millis(500)).into_future(),
        );

        assert!(found.is_ok());
        assert!(missing.unwrap_err().is_timeout());
    }
}
