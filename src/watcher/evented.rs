//! Directory watcher fed by OS file-system notifications.
//!
//! Wraps a `notify::RecommendedWatcher`. The notify callback only flips an
//! atomic flag, so `updated()` is a single load and never touches the disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use notify::{Event, EventKind, RecursiveMode, Watcher};

use super::directory::{ChangeCallback, DirectoryWatcher, WatcherFactory, matches_extension};
use super::{WatchError, WatchResult};

/// Decides whether a notify event touches the watched set.
#[derive(Debug)]
struct EventFilter {
    /// Watched directories, both as given and canonicalized.
    directories: Vec<PathBuf>,
    files: Vec<PathBuf>,
    /// Directories not on disk yet, paired with the existing ancestor watched
    /// in their place.
    pending: Vec<PendingDir>,
    extensions: Vec<String>,
}

#[derive(Debug, Clone)]
struct PendingDir {
    ancestor: PathBuf,
    dir: PathBuf,
}

impl PendingDir {
    /// `path` is the directory itself, or an intermediate directory on the
    /// way to it, showing up.
    fn appears_with(&self, path: &Path) -> bool {
        path != self.ancestor && path.starts_with(&self.ancestor) && self.dir.starts_with(path)
    }
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        event.paths.iter().any(|path| self.matches_path(path))
    }

    fn matches_path(&self, path: &Path) -> bool {
        if self.files.iter().any(|file| file == path) {
            return true;
        }
        if self.pending.iter().any(|pending| pending.appears_with(path)) {
            return true;
        }
        self.directories
            .iter()
            .chain(self.pending.iter().map(|pending| &pending.dir))
            .any(|dir| path.starts_with(dir))
            && matches_extension(path, &self.extensions)
    }
}

/// Directory watcher backed by `notify`.
///
/// Dropping the watcher stops notifications.
pub struct EventedWatcher {
    files: Vec<PathBuf>,
    directories: Vec<PathBuf>,
    on_change: ChangeCallback,
    changed: Arc<AtomicBool>,
    /// Kept alive for as long as this generation exists. `None` when nothing
    /// on disk could be watched.
    _watcher: Option<notify::RecommendedWatcher>,
}

impl EventedWatcher {
    /// Create a watcher and register OS watches.
    ///
    /// A directory that doesn't exist yet is watched through its nearest
    /// existing ancestor, so its creation counts as a change. Listed files
    /// are watched through their parent directory.
    pub fn new(
        files: Vec<PathBuf>,
        directories: Vec<PathBuf>,
        extensions: Vec<String>,
        on_change: ChangeCallback,
    ) -> WatchResult<Self> {
        let changed = Arc::new(AtomicBool::new(false));

        let (existing_dirs, missing_dirs): (Vec<&PathBuf>, Vec<&PathBuf>) =
            directories.iter().partition(|d| d.is_dir());
        let pending: Vec<PendingDir> = missing_dirs
            .into_iter()
            .filter_map(|dir| match existing_ancestor(dir) {
                Some(ancestor) => Some(PendingDir {
                    ancestor: ancestor.to_path_buf(),
                    dir: dir.clone(),
                }),
                None => {
                    crate::debug_event!("evented", "no existing ancestor", "{}", dir.display());
                    None
                }
            })
            .collect();
        // Ancestors already covered by a recursive directory watch need no watch of their own.
        let ancestors: BTreeSet<PathBuf> = pending
            .iter()
            .map(|pending| pending.ancestor.clone())
            .filter(|ancestor| !existing_dirs.iter().any(|dir| ancestor.starts_with(dir)))
            .collect();
        let file_parents: Vec<PathBuf> = files
            .iter()
            .filter_map(|file| file.parent())
            .filter(|parent| !parent.as_os_str().is_empty() && parent.is_dir())
            .map(Path::to_path_buf)
            .collect();

        if existing_dirs.is_empty() && file_parents.is_empty() && pending.is_empty() {
            crate::debug_event!("evented", "nothing to watch");
            return Ok(Self {
                files,
                directories,
                on_change,
                changed,
                _watcher: None,
            });
        }

        let mut filter_dirs = Vec::with_capacity(existing_dirs.len() * 2);
        for dir in &existing_dirs {
            filter_dirs.push((*dir).clone());
            if let Ok(canonical) = dir.canonicalize() {
                if canonical != **dir {
                    filter_dirs.push(canonical);
                }
            }
        }
        let mut filter_files = files.clone();
        filter_files.extend(files.iter().filter_map(|f| f.canonicalize().ok()));

        let mut filter_pending = Vec::with_capacity(pending.len() * 2);
        for entry in &pending {
            filter_pending.push(entry.clone());
            let canonical = entry.ancestor.canonicalize().ok().and_then(|ancestor| {
                let rest = entry.dir.strip_prefix(&entry.ancestor).ok()?;
                Some(PendingDir {
                    dir: ancestor.join(rest),
                    ancestor,
                })
            });
            if let Some(canonical) = canonical {
                if canonical.ancestor != entry.ancestor {
                    filter_pending.push(canonical);
                }
            }
        }

        let filter = EventFilter {
            directories: filter_dirs,
            files: filter_files,
            pending: filter_pending,
            extensions,
        };

        let flag = Arc::clone(&changed);
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if filter.matches(&event) {
                        flag.store(true, Ordering::Release);
                    }
                }
                Err(e) => {
                    // Events may have been dropped; report a change rather than miss one.
                    let err = WatchError::EventError {
                        details: e.to_string(),
                    };
                    tracing::warn!("[evented] {err}");
                    flag.store(true, Ordering::Release);
                }
            })?;

        for dir in existing_dirs {
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: dir.clone(),
                    reason: e.to_string(),
                })?;
            crate::debug_event!("evented", "watching", "{}", dir.display());
        }

        // Recursive so the backend follows the directory once it is created.
        for ancestor in &ancestors {
            watcher
                .watch(ancestor, RecursiveMode::Recursive)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: ancestor.clone(),
                    reason: e.to_string(),
                })?;
            crate::debug_event!("evented", "watching ancestor", "{}", ancestor.display());
        }

        for parent in file_parents {
            watcher
                .watch(&parent, RecursiveMode::NonRecursive)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: parent.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(Self {
            files,
            directories,
            on_change,
            changed,
            _watcher: Some(watcher),
        })
    }
}

fn existing_ancestor(dir: &Path) -> Option<&Path> {
    dir.ancestors()
        .skip(1)
        .find(|ancestor| !ancestor.as_os_str().is_empty() && ancestor.is_dir())
}

impl DirectoryWatcher for EventedWatcher {
    fn updated(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    fn execute(&self) -> WatchResult<bool> {
        if !self.changed.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        (self.on_change)()?;
        Ok(true)
    }

    fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl std::fmt::Debug for EventedWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventedWatcher")
            .field("files", &self.files)
            .field("directories", &self.directories)
            .field("changed", &self.changed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builds [`EventedWatcher`] generations with a fixed extension filter.
#[derive(Debug, Clone, Default)]
pub struct EventedWatcherFactory {
    pub extensions: Vec<String>,
}

impl EventedWatcherFactory {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }
}

impl WatcherFactory for EventedWatcherFactory {
    fn build(
        &self,
        files: &[PathBuf],
        directories: &[PathBuf],
        on_change: ChangeCallback,
    ) -> WatchResult<Arc<dyn DirectoryWatcher>> {
        let watcher = EventedWatcher::new(
            files.to_vec(),
            directories.to_vec(),
            self.extensions.clone(),
            on_change,
        )?;
        Ok(Arc::new(watcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::directory::change_callback;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn counting_callback() -> (ChangeCallback, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback = change_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (callback, calls)
    }

    fn wait_for(watcher: &EventedWatcher, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if watcher.updated() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        watcher.updated()
    }

    #[test]
    fn test_filter_ignores_unrelated_paths() {
        let filter = EventFilter {
            directories: vec![PathBuf::from("/app/views")],
            files: vec![PathBuf::from("/app/config/routes.rb")],
            pending: vec![],
            extensions: vec!["erb".to_string()],
        };

        assert!(filter.matches_path(Path::new("/app/views/users/index.html.erb")));
        assert!(filter.matches_path(Path::new("/app/config/routes.rb")));
        assert!(!filter.matches_path(Path::new("/app/views/users/index.js")));
        assert!(!filter.matches_path(Path::new("/app/models/user.erb")));
    }

    #[test]
    fn test_filter_skips_access_events() {
        let filter = EventFilter {
            directories: vec![PathBuf::from("/app/views")],
            files: vec![],
            pending: vec![],
            extensions: vec![],
        };
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/app/views/index.html.erb"));
        let modify = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/app/views/index.html.erb"));

        assert!(!filter.matches(&access));
        assert!(filter.matches(&modify));
    }

    #[test]
    fn test_empty_watcher_never_reports_change() {
        let (callback, calls) = counting_callback();
        let watcher = EventedWatcher::new(vec![], vec![], vec![], callback).unwrap();

        assert!(!watcher.updated());
        assert!(!watcher.execute().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_write_under_watched_directory_observed() {
        let dir = TempDir::new().unwrap();
        let (callback, calls) = counting_callback();
        let watcher =
            EventedWatcher::new(vec![], vec![dir.path().to_path_buf()], vec![], callback).unwrap();
        assert!(!watcher.updated());

        std::fs::write(dir.path().join("index.html.erb"), "<h1>hi</h1>").unwrap();

        assert!(wait_for(&watcher, Duration::from_secs(5)));
        assert!(watcher.execute().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_filter_matches_directory_created_later() {
        let filter = EventFilter {
            directories: vec![],
            files: vec![],
            pending: vec![PendingDir {
                ancestor: PathBuf::from("/app"),
                dir: PathBuf::from("/app/engines/admin/views"),
            }],
            extensions: vec!["erb".to_string()],
        };

        assert!(filter.matches_path(Path::new("/app/engines")));
        assert!(filter.matches_path(Path::new("/app/engines/admin/views")));
        assert!(filter.matches_path(Path::new("/app/engines/admin/views/index.html.erb")));
        assert!(!filter.matches_path(Path::new("/app/engines/admin/views/notes.txt")));
        assert!(!filter.matches_path(Path::new("/app")));
        assert!(!filter.matches_path(Path::new("/app/models")));
        assert!(!filter.matches_path(Path::new("/app/engines/billing/views/show.erb")));
    }

    #[test]
    fn test_existing_ancestor() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("engines/admin/views");

        assert_eq!(existing_ancestor(&missing), Some(root.path()));
        assert_eq!(existing_ancestor(Path::new("views")), None);
    }

    #[test]
    fn test_directory_created_after_watcher_observed() {
        let root = TempDir::new().unwrap();
        let views = root.path().join("views");
        let (callback, calls) = counting_callback();
        let watcher =
            EventedWatcher::new(vec![], vec![views.clone()], vec!["erb".to_string()], callback)
                .unwrap();
        assert!(!watcher.updated());

        std::fs::create_dir(&views).unwrap();
        std::fs::write(views.join("index.html.erb"), "<h1>hi</h1>").unwrap();

        assert!(wait_for(&watcher, Duration::from_secs(5)));
        assert!(watcher.execute().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The backend keeps following the new directory.
        std::thread::sleep(Duration::from_millis(200));
        watcher.execute().unwrap();
        std::fs::write(views.join("show.html.erb"), "<p>").unwrap();
        assert!(wait_for(&watcher, Duration::from_secs(5)));
    }
}
