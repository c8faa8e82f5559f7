//! notify watcher that feeds a [`DebounceHandle`].

use std::path::{Path, PathBuf};

use notify::event::EventKind;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::debounce::DebounceHandle;

/// Which event paths are allowed to trigger a watch.
///
/// A path under an ignored prefix is dropped unless it is listed in `keep`.
/// An event fires when at least one of its paths survives.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    ignored: Vec<PathBuf>,
    keep: Vec<PathBuf>,
}

impl PathFilter {
    /// Drop events under `prefix`. Both the given and canonical forms match.
    #[must_use]
    pub fn ignore(mut self, prefix: impl AsRef<Path>) -> Self {
        push_forms(&mut self.ignored, prefix.as_ref());
        self
    }

    /// Let `path` through even when it sits under an ignored prefix.
    #[must_use]
    pub fn keep(mut self, path: impl AsRef<Path>) -> Self {
        push_forms(&mut self.keep, path.as_ref());
        self
    }

    /// Whether a change at `path` counts.
    pub fn allows(&self, path: &Path) -> bool {
        self.keep.iter().any(|k| path == k) || !self.ignored.iter().any(|p| path.starts_with(p))
    }

    /// Events without paths always pass; notify uses them for rescans.
    pub fn allows_event(&self, event: &notify::Event) -> bool {
        event.paths.is_empty() || event.paths.iter().any(|p| self.allows(p))
    }
}

fn push_forms(list: &mut Vec<PathBuf>, path: &Path) {
    list.push(path.to_path_buf());
    if let Some(canonical) = canonical_form(path) {
        if canonical != path {
            list.push(canonical);
        }
    }
}

/// Canonicalize the deepest existing ancestor and re-append the rest, so a
/// directory created after the watch starts still matches.
fn canonical_form(path: &Path) -> Option<PathBuf> {
    path.ancestors().find_map(|ancestor| {
        let rest = path.strip_prefix(ancestor).ok()?;
        std::fs::canonicalize(ancestor).ok().map(|base| base.join(rest))
    })
}

/// Keeps a native watch alive for as long as it is held.
pub struct PathWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl PathWatcher {
    /// Watch `path`, triggering `handle` on every non-access event.
    pub fn watch(
        path: &Path,
        mode: RecursiveMode,
        handle: DebounceHandle,
    ) -> Result<Self, notify::Error> {
        Self::watch_filtered(path, mode, PathFilter::default(), handle)
    }

    /// [`watch`](Self::watch), but only events that `filter` allows count.
    pub fn watch_filtered(
        path: &Path,
        mode: RecursiveMode,
        filter: PathFilter,
        handle: DebounceHandle,
    ) -> Result<Self, notify::Error> {
        let label = path.display().to_string();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) if is_relevant(&event.kind) && filter.allows_event(&event) => {
                    handle.trigger();
                }
                Ok(_) => {}
                Err(e) => warn!(path = %label, error = %e, "Filesystem watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(path, mode)?;
        debug!(path = %path.display(), ?mode, "Watching");
        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
        })
    }

    /// The watched root.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

const fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::watch::Debouncer;

    fn counting_debouncer() -> (Debouncer, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::spawn("fs-test", Duration::from_millis(50), move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });
        (debouncer, rx)
    }

    #[test]
    fn access_events_are_ignored() {
        use notify::event::{AccessKind, CreateKind};
        assert!(!is_relevant(&EventKind::Access(AccessKind::Any)));
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
    }

    #[test]
    fn filter_drops_ignored_prefixes_but_honours_keep() {
        let filter = PathFilter::default()
            .ignore("/repo/.wt")
            .ignore("/repo/.git")
            .keep("/repo/.git/index");
        assert!(filter.allows(Path::new("/repo/src/lib.rs")));
        assert!(!filter.allows(Path::new("/repo/.wt/daemon.log")));
        assert!(!filter.allows(Path::new("/repo/.git/objects/ab/cdef")));
        assert!(filter.allows(Path::new("/repo/.git/index")));
        // Prefixes match whole components only.
        assert!(filter.allows(Path::new("/repo/.wtx")));

        let mixed = notify::Event::default()
            .add_path("/repo/.wt/daemon.log".into())
            .add_path("/repo/README".into());
        assert!(filter.allows_event(&mixed));
        let only_log = notify::Event::default().add_path("/repo/.wt/daemon.log".into());
        assert!(!filter.allows_event(&only_log));
        assert!(filter.allows_event(&notify::Event::default()));
    }

    #[tokio::test]
    async fn file_write_triggers_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (debouncer, mut rx) = counting_debouncer();
        let watcher =
            PathWatcher::watch(dir.path(), RecursiveMode::Recursive, debouncer.handle()).unwrap();
        assert_eq!(watcher.path(), dir.path());

        std::fs::write(dir.path().join("touched.txt"), "x").unwrap();
        let fired = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(matches!(fired, Ok(Some(()))));
        drop(watcher);
        debouncer.stop().await;
    }

    #[tokio::test]
    async fn writes_under_an_ignored_dir_never_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join(".wt");
        std::fs::create_dir(&state).unwrap();
        let (debouncer, mut rx) = counting_debouncer();
        let watcher = PathWatcher::watch_filtered(
            dir.path(),
            RecursiveMode::Recursive,
            PathFilter::default().ignore(&state),
            debouncer.handle(),
        )
        .unwrap();

        for i in 0..5 {
            std::fs::write(state.join("daemon.log"), format!("line {i}\n")).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let fired = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(fired.is_err(), "log writes must not trigger a refresh");

        std::fs::write(dir.path().join("edited.txt"), "x").unwrap();
        let fired = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(matches!(fired, Ok(Some(()))));
        drop(watcher);
        debouncer.stop().await;
    }
}
