use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::MissedTickBehavior;

use super::backend::{self, LinkBackend, RECONNECT_SUCCESS};
use super::state::{ConnectionStatus, LinkTracker};
use crate::error::BridgeError;
use crate::host::{ElementRef, HostRoot, Notification};
use crate::timer::TaskHandle;
use crate::waiter::ElementWaiter;

pub const PRIMARY_INDICATOR_ID: &str = "civitai-status";
pub const ALPHA_INDICATOR_ID: &str = "civitai-alpha-status";
pub const CONNECTED_CLASS: &str = "connected";
pub const ALPHA_CONNECTED_CLASS: &str = "alpha-connected";

/// The two status elements appended to the host container
pub struct StatusIndicators {
    pub primary: ElementRef,
    pub alpha: ElementRef,
}

impl StatusIndicators {
    pub fn mount(root: &dyn HostRoot) -> Self {
        Self {
            primary: root.append_element(PRIMARY_INDICATOR_ID, &[PRIMARY_INDICATOR_ID]),
            alpha: root.append_element(ALPHA_INDICATOR_ID, &[ALPHA_INDICATOR_ID]),
        }
    }
}

#[derive(Default)]
struct Links {
    primary: LinkTracker,
    alpha: LinkTracker,
    /// Fed only by the alpha-only endpoint
    alpha_endpoint: LinkTracker,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mirrors backend link status into the host UI.
///
/// Updates are edge-triggered: an indicator is touched only when the polled
/// value differs from the last one seen for that link.
pub struct StatusPoller {
    backend: Arc<dyn LinkBackend>,
    waiter: ElementWaiter,
    container: String,
    mount_timeout: Duration,
    interval: Duration,
    alpha_poll: bool,
    indicators: OnceCell<StatusIndicators>,
    links: Mutex<Links>,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn LinkBackend>,
        waiter: ElementWaiter,
        container: impl Into<String>,
        mount_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            waiter,
            container: container.into(),
            mount_timeout,
            interval,
            alpha_poll: false,
            indicators: OnceCell::new(),
            links: Mutex::new(Links::default()),
        }
    }

    /// Also poll the alpha-only endpoint on every tick
    pub fn with_alpha_poll(mut self, enabled: bool) -> Self {
        self.alpha_poll = enabled;
        self
    }

    pub fn indicators(&self) -> Option<&StatusIndicators> {
        self.indicators.get()
    }

    /// Wait for the host container, then append the indicators and wire the
    /// alpha indicator's click to [`StatusPoller::reconnect`]. Mounting twice
    /// is a no-op.
    pub async fn mount(self: &Arc<Self>) -> Result<(), BridgeError> {
        self.indicators
            .get_or_try_init(|| async {
                self.waiter.wait(&self.container, self.mount_timeout).await?;
                let indicators = StatusIndicators::mount(self.waiter.root().as_ref());

                let poller: Weak<Self> = Arc::downgrade(self);
                let runtime = tokio::runtime::Handle::current();
                indicators.alpha.add_click_listener(Arc::new(move || {
                    if let Some(poller) = poller.upgrade() {
                        runtime.spawn(async move {
                            poller.reconnect().await;
                        });
                    }
                }));
                Ok::<_, BridgeError>(indicators)
            })
            .await?;
        Ok(())
    }

    /// One poll cycle of the combined endpoint. Returns the number of
    /// indicator updates applied.
    pub async fn poll(&self) -> usize {
        let Some(indicators) = self.indicators.get() else {
            tracing::debug!("status indicators not mounted; skipping poll");
            return 0;
        };

        match backend::call(&self.backend, |b| b.link_status()).await {
            Ok(status) => apply_status(&mut lock(&self.links), indicators, status),
            Err(e) => {
                tracing::warn!(error = %e, "link status poll failed");
                0
            }
        }
    }

    /// One poll cycle of the alpha-only endpoint
    pub async fn poll_alpha(&self) -> usize {
        let Some(indicators) = self.indicators.get() else {
            return 0;
        };

        match backend::call(&self.backend, |b| b.alpha_link_status()).await {
            Ok(connected) => {
                let mut links = lock(&self.links);
                match links.alpha_endpoint.observe(connected) {
                    Some(connected) => {
                        indicators.alpha.set_class(ALPHA_CONNECTED_CLASS, connected);
                        tracing::info!(connected, "alpha link status changed");
                        1
                    }
                    None => 0,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "alpha link status poll failed");
                0
            }
        }
    }

    /// Ask the backend to reconnect and show the outcome. Does not look at
    /// or change the polled state.
    pub async fn reconnect(&self) -> Notification {
        let notification = match backend::call(&self.backend, |b| b.reconnect_link()).await {
            Ok(message) if message == RECONNECT_SUCCESS => Notification::success(message),
            Ok(message) => Notification::failure(message),
            Err(e) => Notification::failure(format!("reconnect failed: {e}")),
        };

        tracing::info!(
            success = notification.success,
            message = %notification.message,
            "reconnect attempted"
        );
        self.waiter.root().notify(&notification);
        notification
    }

    /// Mount, poll once right away, then keep polling every interval until
    /// the returned handle is cancelled or dropped. A failed mount is logged
    /// and ends the task.
    pub fn start(self: Arc<Self>) -> TaskHandle {
        TaskHandle::spawn(async move {
            if let Err(e) = self.mount().await {
                tracing::error!(error = %e, "could not mount status indicators");
                return;
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.poll().await;
                if self.alpha_poll {
                    self.poll_alpha().await;
                }
            }
        })
    }
}

fn apply_status(links: &mut Links, indicators: &StatusIndicators, status: ConnectionStatus) -> usize {
    let mut applied = 0;

    if let Some(connected) = links.primary.observe(status.primary_connected) {
        indicators.primary.set_class(CONNECTED_CLASS, connected);
        tracing::info!(connected, "link status changed");
        applied += 1;
    }

    if let Some(connected) = links.alpha.observe(status.alpha_connected) {
        indicators.alpha.set_class(CONNECTED_CLASS, connected);
        tracing::info!(connected, "alpha link status changed");
        applied += 1;
    }

    applied
}
