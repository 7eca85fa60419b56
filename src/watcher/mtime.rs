//! Polling directory watcher based on file modification times.
//!
//! Each check walks the watched directories, counts the matching files and
//! records the newest modification time. A change is either a different file
//! count (file added or removed) or a newer mtime than the one committed by
//! the last `execute()`.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use walkdir::WalkDir;

use super::directory::{ChangeCallback, DirectoryWatcher, WatcherFactory, matches_extension};
use super::WatchResult;

/// Result of one scan of the watched set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    count: usize,
    updated_at: Option<SystemTime>,
}

impl Snapshot {
    fn is_newer_than(&self, committed: &Snapshot) -> bool {
        if self.count != committed.count {
            return true;
        }
        match (self.updated_at, committed.updated_at) {
            (Some(current), Some(last)) => current > last,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct PollState {
    committed: Snapshot,
    /// Set once `updated()` has seen a change; cleared by `execute()`.
    detected: bool,
}

/// Directory watcher that polls modification times on demand.
pub struct MtimeWatcher {
    files: Vec<PathBuf>,
    directories: Vec<PathBuf>,
    extensions: Vec<String>,
    on_change: ChangeCallback,
    state: Mutex<PollState>,
}

impl MtimeWatcher {
    /// Create a watcher and take the baseline snapshot.
    ///
    /// Missing files and directories are not an error; they simply contribute
    /// nothing until they appear.
    pub fn new(
        files: Vec<PathBuf>,
        directories: Vec<PathBuf>,
        extensions: Vec<String>,
        on_change: ChangeCallback,
    ) -> Self {
        let mut watcher = Self {
            files,
            directories,
            extensions,
            on_change,
            state: Mutex::new(PollState {
                committed: Snapshot {
                    count: 0,
                    updated_at: None,
                },
                detected: false,
            }),
        };
        let baseline = watcher.scan();
        watcher.state.get_mut().committed = baseline;
        watcher
    }

    /// Every existing file this watcher currently covers.
    pub fn watched_files(&self) -> BTreeSet<PathBuf> {
        let mut watched: BTreeSet<PathBuf> = self
            .files
            .iter()
            .filter(|path| path.is_file())
            .cloned()
            .collect();

        for dir in &self.directories {
            if !dir.is_dir() {
                continue;
            }
            let entries = WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| matches_extension(entry.path(), &self.extensions));
            for entry in entries {
                watched.insert(entry.into_path());
            }
        }

        watched
    }

    fn scan(&self) -> Snapshot {
        let now = SystemTime::now();
        let watched = self.watched_files();

        // mtimes in the future would pin `updated_at` and hide every later edit.
        let updated_at = watched
            .iter()
            .filter_map(|path| std::fs::metadata(path).and_then(|m| m.modified()).ok())
            .filter(|mtime| *mtime <= now)
            .max();

        Snapshot {
            count: watched.len(),
            updated_at,
        }
    }
}

impl DirectoryWatcher for MtimeWatcher {
    fn updated(&self) -> bool {
        if self.state.lock().detected {
            return true;
        }

        let current = self.scan();
        let mut state = self.state.lock();
        if current.is_newer_than(&state.committed) {
            state.detected = true;
        }
        state.detected
    }

    fn execute(&self) -> WatchResult<bool> {
        if !self.updated() {
            return Ok(false);
        }

        let fresh = self.scan();
        {
            let mut state = self.state.lock();
            if !state.detected {
                // A concurrent execute() already consumed this change.
                return Ok(false);
            }
            state.detected = false;
            state.committed = fresh;
        }

        crate::debug_event!("mtime", "change committed", "{} files", fresh.count);
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

impl std::fmt::Debug for MtimeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtimeWatcher")
            .field("files", &self.files)
            .field("directories", &self.directories)
            .field("extensions", &self.extensions)
            .finish()
    }
}

/// Builds [`MtimeWatcher`] generations with a fixed extension filter.
#[derive(Debug, Clone, Default)]
pub struct MtimeWatcherFactory {
    pub extensions: Vec<String>,
}

impl MtimeWatcherFactory {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }
}

impl WatcherFactory for MtimeWatcherFactory {
    fn build(
        &self,
        files: &[PathBuf],
        directories: &[PathBuf],
        on_change: ChangeCallback,
    ) -> WatchResult<Arc<dyn DirectoryWatcher>> {
        Ok(Arc::new(MtimeWatcher::new(
            files.to_vec(),
            directories.to_vec(),
            self.extensions.clone(),
            on_change,
        )))
    }
}
