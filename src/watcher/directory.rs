//! Directory watcher trait and the factory used to build watcher generations.

use std::path::PathBuf;
use std::sync::Arc;

use super::WatchResult;

/// Callback a watcher runs when `execute()` finds a change.
pub type ChangeCallback = Arc<dyn Fn() -> WatchResult<()> + Send + Sync>;

/// Wrap a closure as a [`ChangeCallback`].
pub fn change_callback<F>(f: F) -> ChangeCallback
where
    F: Fn() -> WatchResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One generation of file-system observation.
///
/// A watcher is bound to a fixed list of files and directories for its whole
/// life. It is shared behind an `Arc`, so change state lives behind interior
/// mutability.
pub trait DirectoryWatcher: Send + Sync {
    /// Whether a change was observed since the last `execute()`.
    ///
    /// Must not run the callback or clear the change state.
    fn updated(&self) -> bool;

    /// Run the callback if a change was observed, then reset the change state.
    ///
    /// Returns `true` when the callback ran.
    fn execute(&self) -> WatchResult<bool>;

    /// Directories this watcher was built from.
    fn directories(&self) -> &[PathBuf];

    /// Individual files this watcher was built from.
    fn files(&self) -> &[PathBuf];
}

/// Builds a new watcher generation.
///
/// Implemented for any `Fn(&[PathBuf], &[PathBuf], ChangeCallback)` closure,
/// so tests and callers can pass a plain closure.
pub trait WatcherFactory: Send + Sync {
    fn build(
        &self,
        files: &[PathBuf],
        directories: &[PathBuf],
        on_change: ChangeCallback,
    ) -> WatchResult<Arc<dyn DirectoryWatcher>>;
}

impl<F> WatcherFactory for F
where
    F: Fn(&[PathBuf], &[PathBuf], ChangeCallback) -> WatchResult<Arc<dyn DirectoryWatcher>>
        + Send
        + Sync,
{
    fn build(
        &self,
        files: &[PathBuf],
        directories: &[PathBuf],
        on_change: ChangeCallback,
    ) -> WatchResult<Arc<dyn DirectoryWatcher>> {
        self(files, directories, on_change)
    }
}

/// Returns true when `path` has one of `extensions` (compared without the dot,
/// case-insensitively). An empty list accepts every path.
pub(crate) fn matches_extension(path: &std::path::Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => extensions
            .iter()
            .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext)),
        None => false,
    }
}
