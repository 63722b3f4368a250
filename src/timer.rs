use std::future::Future;

use tokio::task::JoinHandle;

/// Owned handle to background work spawned on the runtime.
///
/// The work stops when the handle is cancelled or dropped, so whoever holds
/// the handle owns the timer.
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the work to end. Returns false if it was cancelled or
    /// panicked.
    pub async fn join(mut self) -> bool {
        (&mut self.handle).await.is_ok()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ticking(count: &Arc<AtomicUsize>) -> TaskHandle {
        let counter = Arc::clone(count);
        TaskHandle::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_further_work() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = ticking(&count);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.cancel();
        let seen = count.load(Ordering::SeqCst);
        assert_eq!(seen, 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cancels_work() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = ticking(&count);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn join_waits_for_completion() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = TaskHandle::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.join().await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn join_reports_cancelled_work() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = ticking(&count);
        handle.cancel();
        assert!(!handle.join().await);
    }

    #[tokio::test]
    async fn finished_work_is_reported() {
        let handle = TaskHandle::spawn(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
    }
}
