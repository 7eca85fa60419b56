pub mod cache;
pub mod cli;
pub mod config;
pub mod logging;
pub mod watcher;

pub use cache::{DetailsCache, LookupCache};
pub use config::{LoggingConfig, Settings, WatcherBackend, WatcherConfig};
pub use watcher::{
    ChangeCallback, DirectoryWatcher, EventedWatcher, EventedWatcherFactory, MtimeWatcher,
    MtimeWatcherFactory, PathRegistry, ViewPathSource, ViewReloader, WatchError, WatchResult,
    WatcherFactory,
};
