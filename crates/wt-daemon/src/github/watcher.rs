//! Pull request cache following the active branch set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};
use wt_core::Config;
use wt_core::protocol::{ComponentState, PrData, PrInfo};

use super::client::{GitHubClient, GitHubError};
use super::source::{FixtureSource, PullRequestSource};
use crate::collector::{Collector, Outcome};
use crate::reactive::Effect;
use crate::store::Store;

/// One batch result: every requested branch maps to its PR or `None`.
pub type PrMap = HashMap<String, Option<PrData>>;

/// Pull request state for the active branches.
pub struct GitHubWatcher {
    source: Option<Arc<dyn PullRequestSource>>,
    store: Arc<Store>,
    cache: Collector<PrMap>,
    /// Serialises fetches so cache writes land in request order.
    fetch_lock: tokio::sync::Mutex<()>,
    queried: Mutex<HashSet<String>>,
    effect: Mutex<Option<Effect>>,
    errors: AtomicU32,
}

impl GitHubWatcher {
    fn build(source: Option<Arc<dyn PullRequestSource>>, store: Arc<Store>) -> Arc<Self> {
        Arc::new(Self {
            source,
            store,
            cache: Collector::new(),
            fetch_lock: tokio::sync::Mutex::new(()),
            queried: Mutex::new(HashSet::new()),
            effect: Mutex::new(None),
            errors: AtomicU32::new(0),
        })
    }

    /// A watcher that never fetches and reports every branch as disabled.
    pub fn disabled(store: Arc<Store>) -> Arc<Self> {
        Self::build(None, store)
    }

    /// A watcher reading pull requests from `source`.
    pub fn new(source: Arc<dyn PullRequestSource>, store: Arc<Store>) -> Arc<Self> {
        Self::build(Some(source), store)
    }

    /// Disabled unless `github.enabled`; prefers the fixtures file when present.
    pub fn from_config(config: &Config, store: Arc<Store>) -> Result<Arc<Self>, GitHubError> {
        if !config.github.enabled {
            return Ok(Self::disabled(store));
        }
        let fixtures = config.pr_fixtures_path();
        let source: Arc<dyn PullRequestSource> = if fixtures.is_file() {
            info!(path = %fixtures.display(), "Using PR fixtures");
            Arc::new(FixtureSource::new(fixtures))
        } else {
            Arc::new(GitHubClient::new(config)?)
        };
        Ok(Self::new(source, store))
    }

    /// Whether a PR source is configured.
    pub const fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    /// The last batch result, or the error that replaced it.
    pub fn snapshot(&self) -> Outcome<PrMap> {
        self.cache.snapshot()
    }

    /// Fetch failures since startup.
    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    /// The `github` entry of the status components.
    pub fn component_state(&self) -> ComponentState {
        if !self.is_enabled() {
            return ComponentState::Disabled;
        }
        match self.cache.snapshot() {
            Outcome::Empty => ComponentState::Starting,
            Outcome::Ok { .. } => ComponentState::Ok,
            Outcome::Err { .. } => ComponentState::Error,
        }
    }

    /// Fetch `branches` plus every branch looked up through
    /// [`pr_info`](Self::pr_info), replacing the whole cache.
    async fn fetch(&self, mut branches: BTreeSet<String>) {
        let Some(source) = &self.source else {
            return;
        };
        let _guard = self.fetch_lock.lock().await;
        if let Ok(seen) = self.queried.lock() {
            branches.extend(seen.iter().cloned());
        }
        if branches.is_empty() {
            self.cache.ok(PrMap::new());
            return;
        }

        let mut batch = PrMap::with_capacity(branches.len());
        for branch in branches {
            match source.pull_request(&branch).await {
                Ok(pr) => {
                    batch.insert(branch, pr);
                }
                Err(e) => {
                    warn!(branch, source = source.describe(), error = %e, "PR fetch failed");
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    self.cache.error(e.to_string());
                    return;
                }
            }
        }
        debug!(branches = batch.len(), source = source.describe(), "PR cache refreshed");
        self.cache.ok(batch);
    }

    /// Fetch for the current active branches and wait for the result.
    pub async fn refresh_now(&self) {
        self.fetch(self.store.active_branches.get()).await;
    }

    /// Cached PR state for `branch`.
    ///
    /// The first lookup of a branch the cache has never seen performs a
    /// one-shot fetch including it. Looked-up branches stay in every later
    /// fetch.
    pub async fn pr_info(&self, branch: Option<&str>) -> PrInfo {
        if !self.is_enabled() {
            return PrInfo::Disabled;
        }
        let Some(branch) = branch else {
            return PrInfo::Ok { pr: None };
        };
        if let Some(info) = self.cached(branch) {
            return info;
        }

        let first_query = self
            .queried
            .lock()
            .is_ok_and(|mut seen| seen.insert(branch.to_string()));
        if first_query {
            self.fetch(self.store.active_branches.get()).await;
            if let Some(info) = self.cached(branch) {
                return info;
            }
        }
        PrInfo::Ok { pr: None }
    }

    fn cached(&self, branch: &str) -> Option<PrInfo> {
        match self.cache.snapshot() {
            Outcome::Empty => None,
            Outcome::Ok { value, .. } => value
                .get(branch)
                .map(|pr| PrInfo::Ok { pr: pr.clone() }),
            Outcome::Err { error, .. } => Some(PrInfo::Error { error }),
        }
    }

    /// Fetch now and whenever the active branches change or `interval` passes.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        if !self.is_enabled() {
            debug!("GitHub watcher disabled");
            return;
        }
        let this = Arc::clone(self);
        let effect = Effect::spawn(
            "github",
            self.store.active_branches.subscribe(),
            Some(interval),
            move |branches| {
                let this = Arc::clone(&this);
                async move { this.fetch(branches).await }
            },
        );
        if let Ok(mut slot) = self.effect.lock() {
            *slot = Some(effect);
        }
        info!(interval_ms = interval.as_millis(), "GitHub watcher started");
    }

    /// Cancel the timer and any in-flight fetch.
    pub async fn stop(&self) {
        let effect = self.effect.lock().ok().and_then(|mut slot| slot.take());
        if let Some(effect) = effect {
            effect.dispose().await;
            info!("GitHub watcher stopped");
        }
    }
}
