//! Single-slot "latest success or latest failure" cache cell.
//!
//! The cell is a `watch` channel so every write replaces the visible value in
//! one step; readers either borrow the current outcome or subscribe to it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// What a [`Collector`] currently holds.
pub enum Outcome<T> {
    Empty,
    Ok { value: Arc<T>, at: DateTime<Utc> },
    Err { error: String, at: DateTime<Utc> },
}

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Ok { value, at } => Self::Ok {
                value: Arc::clone(value),
                at: *at,
            },
            Self::Err { error, at } => Self::Err {
                error: error.clone(),
                at: *at,
            },
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Ok { value, at } => f
                .debug_struct("Ok")
                .field("value", value)
                .field("at", at)
                .finish(),
            Self::Err { error, at } => f
                .debug_struct("Err")
                .field("error", error)
                .field("at", at)
                .finish(),
        }
    }
}

impl<T> Outcome<T> {
    /// The value, if the last capture succeeded.
    pub const fn value(&self) -> Option<&Arc<T>> {
        match self {
            Self::Ok { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The error, if the last capture failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Err { error, .. } => Some(error),
            _ => None,
        }
    }

    /// When the last capture landed.
    pub const fn captured_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Empty => None,
            Self::Ok { at, .. } | Self::Err { at, .. } => Some(*at),
        }
    }

    /// Time since capture; zero if the clock went backwards.
    pub fn age(&self) -> Option<Duration> {
        self.captured_at()
            .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Single-writer, multi-reader result cell.
pub struct Collector<T> {
    tx: watch::Sender<Outcome<T>>,
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Collector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector").finish_non_exhaustive()
    }
}

impl<T> Collector<T> {
    /// An empty collector.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Outcome::Empty);
        Self { tx }
    }

    /// Record a success, discarding any previous error.
    pub fn ok(&self, value: T) {
        self.tx.send_replace(Outcome::Ok {
            value: Arc::new(value),
            at: Utc::now(),
        });
    }

    /// Record a failure, discarding any previous value.
    pub fn error(&self, error: impl Into<String>) {
        self.tx.send_replace(Outcome::Err {
            error: error.into(),
            at: Utc::now(),
        });
    }

    /// The latest outcome. Never waits.
    pub fn snapshot(&self) -> Outcome<T> {
        self.tx.borrow().clone()
    }

    /// A receiver woken on every capture.
    pub fn subscribe(&self) -> watch::Receiver<Outcome<T>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fresh_collector_is_empty() {
        let c: Collector<u32> = Collector::new();
        let snap = c.snapshot();
        assert!(snap.is_empty());
        assert!(snap.captured_at().is_none());
    }

    #[test]
    fn error_replaces_value_entirely() {
        let c = Collector::new();
        c.ok(vec![1, 2, 3]);
        c.error("network down");
        let snap = c.snapshot();
        assert!(snap.value().is_none());
        assert_eq!(snap.error(), Some("network down"));
    }

    #[test]
    fn success_forgets_previous_error() {
        let c = Collector::new();
        c.error("first");
        c.ok(7_u32);
        let snap = c.snapshot();
        assert_eq!(snap.value().map(|v| **v), Some(7));
        assert!(snap.error().is_none());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let c = Collector::new();
        c.ok("before".to_string());
        let held = c.snapshot();
        c.ok("after".to_string());
        assert_eq!(held.value().unwrap().as_str(), "before");
        assert_eq!(c.snapshot().value().unwrap().as_str(), "after");
    }

    #[tokio::test]
    async fn subscribers_observe_writes() {
        let c = Collector::new();
        let mut rx = c.subscribe();
        c.ok(1_u8);
        rx.changed().await.unwrap();
        assert!(rx.borrow().value().is_some());
    }
}
