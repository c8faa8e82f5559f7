//! Trailing-edge debounce.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Cloneable trigger side of a [`Debouncer`].
///
/// [`trigger`](Self::trigger) never blocks and may be called from any thread,
/// including notify's watch thread.
#[derive(Debug, Clone)]
pub struct DebounceHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl DebounceHandle {
    pub fn trigger(&self) {
        // A closed channel means the debouncer was stopped.
        let _ = self.tx.send(());
    }
}

/// Runs an action once a burst of triggers has been quiet for `window`.
pub struct Debouncer {
    name: &'static str,
    handle: DebounceHandle,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Run `action` once `window` has passed with no further trigger.
    pub fn spawn<F, Fut>(name: &'static str, window: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let mut coalesced = 1_usize;
                loop {
                    tokio::select! {
                        next = rx.recv() => {
                            if next.is_none() {
                                break;
                            }
                            coalesced += 1;
                        }
                        () = tokio::time::sleep(window) => break,
                    }
                }
                trace!(debouncer = name, coalesced, "Debounce window elapsed");
                action().await;
            }
            debug!(debouncer = name, "Debouncer finished");
        });
        Self {
            name,
            handle: DebounceHandle { tx },
            task,
        }
    }

    /// A cloneable handle for triggering from other threads.
    pub fn handle(&self) -> DebounceHandle {
        self.handle.clone()
    }

    pub fn trigger(&self) {
        self.handle.trigger();
    }

    /// Cancel any pending run.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        debug!(debouncer = self.name, "Debouncer stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    fn recorder(window: Duration) -> (Debouncer, mpsc::UnboundedReceiver<Instant>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::spawn("test", window, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Instant::now());
            }
        });
        (debouncer, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once_after_last_event() {
        let window = Duration::from_millis(300);
        let (debouncer, mut fired) = recorder(window);
        let start = Instant::now();

        for _ in 0..4 {
            debouncer.trigger();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        debouncer.trigger();
        let last = Instant::now();

        let at = fired.recv().await.unwrap();
        assert_eq!(at - last, window);
        assert_eq!(at - start, Duration::from_millis(700));

        let again = tokio::time::timeout(Duration::from_secs(5), fired.recv()).await;
        assert!(again.is_err(), "burst must produce exactly one run");
        debouncer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn separated_events_fire_separately() {
        let window = Duration::from_millis(300);
        let (debouncer, mut fired) = recorder(window);
        let handle = debouncer.handle();

        handle.trigger();
        fired.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        std::thread::spawn(move || handle.trigger()).join().unwrap();
        fired.recv().await.unwrap();
        debouncer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_run() {
        let (debouncer, mut fired) = recorder(Duration::from_millis(300));
        debouncer.trigger();
        tokio::task::yield_now().await;
        debouncer.stop().await;
        assert_eq!(fired.recv().await, None);
    }
}
