//! The service container handed to method dependency builders.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use wt_core::Config;

use crate::discovery::DiscoveryService;
use crate::git::SharedGit;
use crate::github::GitHubWatcher;
use crate::store::Store;
use crate::subsystems::WorktreeSubsystems;
use crate::watch::GitRefsWatcher;

/// Process-level state: identity, shutdown signal and request accounting.
pub struct DaemonControl {
    pid: u32,
    started_at: DateTime<Utc>,
    shutdown: watch::Sender<bool>,
    status_in_flight: AtomicUsize,
}

impl DaemonControl {
    /// Control block for the current process, stamped with the current time.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            shutdown,
            status_in_flight: AtomicUsize::new(0),
        }
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Ask the daemon to begin its shutdown sequence.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Turns true once [`request_shutdown`](Self::request_shutdown) is called.
    pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Count a `get_status` call for as long as the guard lives. Returns the
    /// number already in flight when this one started.
    pub fn begin_status(&self) -> (usize, InFlight<'_>) {
        let before = self.status_in_flight.fetch_add(1, Ordering::SeqCst);
        (before, InFlight(&self.status_in_flight))
    }
}

impl Default for DaemonControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts one in-flight `get_status` until dropped.
pub struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Every long-lived singleton a handler may ask for.
pub struct Services {
    pub config: Arc<Config>,
    pub git: SharedGit,
    pub store: Arc<Store>,
    pub discovery: Arc<DiscoveryService>,
    pub subsystems: Arc<WorktreeSubsystems>,
    pub refs: Arc<GitRefsWatcher>,
    pub github: Arc<GitHubWatcher>,
    pub control: Arc<DaemonControl>,
}

/// Build a method's dependency bundle out of the container.
pub trait FromServices: Sized + Send + 'static {
    fn from_services(services: &Services) -> Self;
}

macro_rules! service_field {
    ($ty:ty, $field:ident) => {
        impl FromServices for $ty {
            fn from_services(services: &Services) -> Self {
                services.$field.clone()
            }
        }
    };
}

service_field!(Arc<Config>, config);
service_field!(SharedGit, git);
service_field!(Arc<Store>, store);
service_field!(Arc<DiscoveryService>, discovery);
service_field!(Arc<WorktreeSubsystems>, subsystems);
service_field!(Arc<GitRefsWatcher>, refs);
service_field!(Arc<GitHubWatcher>, github);
service_field!(Arc<DaemonControl>, control);

impl FromServices for () {
    fn from_services(_: &Services) -> Self {}
}

impl<A: FromServices, B: FromServices> FromServices for (A, B) {
    fn from_services(services: &Services) -> Self {
        (A::from_services(services), B::from_services(services))
    }
}

impl<A: FromServices, B: FromServices, C: FromServices> FromServices for (A, B, C) {
    fn from_services(services: &Services) -> Self {
        (
            A::from_services(services),
            B::from_services(services),
            C::from_services(services),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_counts_overlapping_calls() {
        let control = DaemonControl::new();
        let (first, a) = control.begin_status();
        let (second, b) = control.begin_status();
        assert_eq!((first, second), (0, 1));
        drop(a);
        drop(b);
        assert_eq!(control.begin_status().0, 0);
    }

    #[test]
    fn shutdown_flag_reaches_subscribers() {
        let control = DaemonControl::new();
        let rx = control.shutdown_requested();
        assert!(!*rx.borrow());
        control.request_shutdown();
        assert!(*rx.borrow());
    }
}
