//! Lazily rebuilt watcher that invalidates the lookup cache on change.
//!
//! # Protocol
//!
//! The reloader owns exactly one watcher generation at a time. When the
//! registry's set of directories changes, a new generation is built and
//! installed, and only then is the old generation asked whether it saw a
//! change. Anything the old generation saw up to that check lands in the
//! sticky `previous_change` flag; anything after it belongs to the new
//! generation. Both steps happen inside the same critical section, so no
//! change falls between generations.
//!
//! ```text
//!   rebuild()                         execute()
//!   ---------                         ---------
//!   lock                              lock
//!   dirs = dirs_to_watch(registry)    carried = take(previous_change)
//!   dirs == watched? -> unlock        watcher = current
//!   new = factory(dirs)               unlock
//!   old = replace(current, new)       ran = watcher.execute()
//!   previous_change |= old.updated()  carried && !ran -> reload()
//!   unlock
//! ```

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::cache::LookupCache;

use super::WatchResult;
use super::directory::{ChangeCallback, DirectoryWatcher, WatcherFactory};
use super::path_registry::{RegistryObserver, SubscriptionId, ViewPathSource, dirs_to_watch};

/// State guarded as one unit.
struct ReloaderState {
    watcher: Arc<dyn DirectoryWatcher>,
    watched_dirs: Vec<PathBuf>,
    previous_change: bool,
    generation: u64,
}

/// Consistent view of the reloader taken under its guard.
#[derive(Clone)]
pub struct ReloaderSnapshot {
    pub generation: u64,
    pub watched_dirs: Vec<PathBuf>,
    pub previous_change: bool,
    pub watcher: Arc<dyn DirectoryWatcher>,
}

impl std::fmt::Debug for ReloaderSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloaderSnapshot")
            .field("generation", &self.generation)
            .field("watched_dirs", &self.watched_dirs)
            .field("previous_change", &self.previous_change)
            .finish_non_exhaustive()
    }
}

/// Change detector that drives wholesale invalidation of a lookup cache.
///
/// `updated()` is cheap and can be polled from any thread; `execute()` commits
/// the change and clears the cache. The watcher is rebuilt automatically
/// whenever the path source reports a mutation that changes the directory set.
pub struct ViewReloader {
    factory: Arc<dyn WatcherFactory>,
    source: Arc<dyn ViewPathSource>,
    on_change: ChangeCallback,
    state: Mutex<ReloaderState>,
    subscription: OnceLock<SubscriptionId>,
}

impl ViewReloader {
    /// Build the first watcher generation and subscribe to `source`.
    ///
    /// The subscription holds a weak reference; dropping the returned `Arc`
    /// stops rebuilds and unsubscribes.
    pub fn new(
        factory: Arc<dyn WatcherFactory>,
        source: Arc<dyn ViewPathSource>,
        cache: Arc<dyn LookupCache>,
    ) -> WatchResult<Arc<Self>> {
        let on_change = reload_callback(cache);
        let watched_dirs = dirs_to_watch(source.view_paths());
        let watcher = factory.build(&[], &watched_dirs, Arc::clone(&on_change))?;

        crate::debug_event!("reloader", "initial generation", "{} directories", watched_dirs.len());

        let reloader = Arc::new(Self {
            factory,
            source: Arc::clone(&source),
            on_change,
            state: Mutex::new(ReloaderState {
                watcher,
                watched_dirs,
                previous_change: false,
                generation: 1,
            }),
            subscription: OnceLock::new(),
        });

        let weak = Arc::downgrade(&reloader);
        let observer: RegistryObserver = Arc::new(move || match weak.upgrade() {
            Some(reloader) => reloader.rebuild().map(|_| ()),
            None => Ok(()),
        });
        let id = source.subscribe(observer);
        let _ = reloader.subscription.set(id);

        // Catch mutations that landed between the first enumeration and subscribe.
        reloader.rebuild()?;

        Ok(reloader)
    }

    /// Whether a change is pending, either carried over from a replaced
    /// generation or reported by the current one.
    ///
    /// Never clears state. The current watcher is asked outside the guard.
    pub fn updated(&self) -> bool {
        let (carried, watcher) = {
            let state = self.state.lock();
            (state.previous_change, Arc::clone(&state.watcher))
        };
        carried || watcher.updated()
    }

    /// Commit pending changes, clearing the cache if anything changed.
    ///
    /// Returns `true` when the cache was cleared. A carried change always
    /// produces exactly one reload, even if the current generation has
    /// nothing to report.
    pub fn execute(&self) -> WatchResult<bool> {
        let (carried, watcher) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.previous_change),
                Arc::clone(&state.watcher),
            )
        };

        let ran = watcher.execute()?;
        if carried && !ran {
            (self.on_change)()?;
            return Ok(true);
        }
        Ok(ran)
    }

    /// `execute()` if `updated()`. Returns whether the cache was cleared.
    ///
    /// Another caller may commit the change between the two calls, in which
    /// case nothing is reloaded and this returns `false`.
    pub fn execute_if_updated(&self) -> WatchResult<bool> {
        if !self.updated() {
            return Ok(false);
        }
        self.execute()
    }

    /// Rebuild the watcher if the source's directory set changed.
    ///
    /// Returns `true` when a new generation was installed. Factory errors
    /// propagate and leave the current generation in place.
    pub fn rebuild(&self) -> WatchResult<bool> {
        let mut state = self.state.lock();

        let dirs = dirs_to_watch(self.source.view_paths());
        if dirs == state.watched_dirs {
            return Ok(false);
        }

        let new_watcher = self.factory.build(&[], &dirs, Arc::clone(&self.on_change))?;
        let old_watcher = std::mem::replace(&mut state.watcher, new_watcher);
        state.watched_dirs = dirs;
        state.generation += 1;

        // The old generation is checked only after its successor is installed.
        if !state.previous_change {
            state.previous_change = old_watcher.updated();
        }

        crate::debug_event!(
            "reloader",
            "rebuilt",
            "generation {} watching {} directories (carried change: {})",
            state.generation,
            state.watched_dirs.len(),
            state.previous_change
        );
        Ok(true)
    }

    /// Directories the current generation was built from.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.state.lock().watched_dirs.clone()
    }

    /// Number of generations installed so far, starting at 1.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Whether a change from a replaced generation awaits `execute()`.
    pub fn pending_change(&self) -> bool {
        self.state.lock().previous_change
    }

    pub fn snapshot(&self) -> ReloaderSnapshot {
        let state = self.state.lock();
        ReloaderSnapshot {
            generation: state.generation,
            watched_dirs: state.watched_dirs.clone(),
            previous_change: state.previous_change,
            watcher: Arc::clone(&state.watcher),
        }
    }
}

impl Drop for ViewReloader {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.get() {
            self.source.unsubscribe(*id);
        }
    }
}

impl std::fmt::Debug for ViewReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ViewReloader")
            .field("generation", &state.generation)
            .field("watched_dirs", &state.watched_dirs)
            .field("previous_change", &state.previous_change)
            .finish_non_exhaustive()
    }
}

/// The reload action: clear the whole cache.
fn reload_callback(cache: Arc<dyn LookupCache>) -> ChangeCallback {
    Arc::new(move || {
        cache.clear_all()?;
        crate::log_event!("reloader", "cache cleared");
        Ok(())
    })
}
