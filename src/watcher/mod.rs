//! Change detection for view directories.
//!
//! # Architecture
//!
//! ```text
//! PathRegistry --(after every mutation)--> ViewReloader::rebuild
//!                                               |
//!                                   current DirectoryWatcher generation
//!                                     (MtimeWatcher | EventedWatcher)
//!                                               |
//!                          execute() --> reload --> LookupCache::clear_all
//! ```
//!
//! Callers poll `ViewReloader::updated()` and call `execute()` when it returns
//! true. The reloader swaps watcher generations when the registry's directory
//! set changes without dropping changes seen by the outgoing generation.

mod directory;
mod error;
mod evented;
mod mtime;
mod path_registry;
mod reloader;

use std::sync::Arc;

use crate::config::{WatcherBackend, WatcherConfig};

pub use directory::{ChangeCallback, DirectoryWatcher, WatcherFactory, change_callback};
pub(crate) use directory::matches_extension;
pub use error::{WatchError, WatchResult};
pub use evented::{EventedWatcher, EventedWatcherFactory};
pub use mtime::{MtimeWatcher, MtimeWatcherFactory};
pub use path_registry::{
    PathRegistry, RegistryObserver, SubscriptionId, ViewPathSource, dirs_to_watch,
};
pub use reloader::{ReloaderSnapshot, ViewReloader};

/// Watcher factory for the configured backend.
pub fn factory_for(config: &WatcherConfig) -> Arc<dyn WatcherFactory> {
    let extensions = config.extensions.clone();
    match config.backend {
        WatcherBackend::Polling => Arc::new(MtimeWatcherFactory::new(extensions)),
        WatcherBackend::Evented => Arc::new(EventedWatcherFactory::new(extensions)),
    }
}
