//! Reactive state cells and the effects that follow them.
//!
//! A [`Signal`] owns its value and its subscriber list (a `watch` channel).
//! An [`Effect`] reads the signal at the start of every run and re-runs when
//! the value changes or, optionally, on a fixed interval.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// A value that wakes subscribers when it changes.
pub struct Signal<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Signal<T> {
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(value);
        Self { tx }
    }

    /// A clone of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Store `value`, notifying subscribers only if it differs.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// A receiver woken on every change.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// A spawned computation bound to one signal.
pub struct Effect {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl Effect {
    /// Run `run` now, then again after every change of `source` and every
    /// `interval` tick, until disposed or the signal is dropped.
    pub fn spawn<T, F, Fut>(
        name: &'static str,
        mut source: watch::Receiver<T>,
        interval: Option<Duration>,
        mut run: F,
    ) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut timer = interval.map(|period| {
                let mut timer = tokio::time::interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                timer
            });
            loop {
                let value = source.borrow_and_update().clone();
                run(value).await;
                tokio::select! {
                    changed = source.changed() => {
                        if changed.is_err() {
                            debug!(effect = name, "Signal dropped, effect finished");
                            return;
                        }
                    }
                    () = next_tick(timer.as_mut()) => {}
                }
            }
        });
        Self { name, handle }
    }

    /// Cancel the timer and any in-flight run.
    pub async fn dispose(self) {
        self.handle.abort();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!(effect = self.name, error = %e, "Effect panicked");
            }
        }
        debug!(effect = self.name, "Effect disposed");
    }
}

async fn next_tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
