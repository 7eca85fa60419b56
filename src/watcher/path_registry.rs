//! Registry of view lookup locations with change observers.
//!
//! The registry is the source of truth for which directories hold templates.
//! Every mutation notifies subscribed observers afterwards, which is how the
//! reloader learns it may need a new watcher generation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::WatchResult;

/// Observer invoked after every registry mutation.
pub type RegistryObserver = Arc<dyn Fn() -> WatchResult<()> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Anything that can enumerate view lookup locations and announce changes.
pub trait ViewPathSource: Send + Sync {
    /// Current lookup locations. Order and duplicates are not significant.
    fn view_paths(&self) -> Vec<PathBuf>;

    /// Register an observer called after every mutation.
    fn subscribe(&self, observer: RegistryObserver) -> SubscriptionId;

    /// Remove an observer. Returns false if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Thread-safe registry of lookup locations.
#[derive(Default)]
pub struct PathRegistry {
    paths: RwLock<Vec<PathBuf>>,
    observers: Mutex<Vec<(SubscriptionId, RegistryObserver)>>,
    next_id: AtomicU64,
}

impl PathRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lookup location.
    pub fn register(&self, path: impl Into<PathBuf>) -> WatchResult<()> {
        let path = path.into();
        crate::debug_event!("registry", "register", "{}", path.display());
        self.paths.write().push(path);
        self.notify_observers()
    }

    /// Remove every entry equal to `path`.
    ///
    /// Observers are notified even when nothing was removed.
    pub fn unregister(&self, path: &Path) -> WatchResult<bool> {
        let removed = {
            let mut paths = self.paths.write();
            let before = paths.len();
            paths.retain(|p| p != path);
            paths.len() != before
        };
        crate::debug_event!("registry", "unregister", "{} (removed: {removed})", path.display());
        self.notify_observers()?;
        Ok(removed)
    }

    /// Replace all lookup locations.
    pub fn replace_all(&self, paths: impl IntoIterator<Item = PathBuf>) -> WatchResult<()> {
        let paths: Vec<PathBuf> = paths.into_iter().collect();
        *self.paths.write() = paths;
        self.notify_observers()
    }

    /// Snapshot of the registered locations, in registration order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.read().clone()
    }

    /// Check if a location is registered.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.read().iter().any(|p| p == path)
    }

    /// Number of registered entries, duplicates included.
    pub fn len(&self) -> usize {
        self.paths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.read().is_empty()
    }

    /// Number of subscribed observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Call observers in subscription order, outside of any registry lock.
    ///
    /// The first failing observer stops the chain and its error is returned.
    fn notify_observers(&self) -> WatchResult<()> {
        let observers: Vec<RegistryObserver> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer()?;
        }
        Ok(())
    }
}

impl ViewPathSource for PathRegistry {
    fn view_paths(&self) -> Vec<PathBuf> {
        self.paths()
    }

    fn subscribe(&self, observer: RegistryObserver) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, observer));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }
}

impl std::fmt::Debug for PathRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRegistry")
            .field("paths", &*self.paths.read())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Deduplicated, sorted directory list for a set of lookup locations.
///
/// The result is independent of input order, so two registries holding the
/// same locations produce equal lists.
pub fn dirs_to_watch(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    paths
        .into_iter()
        .collect::<BTreeSet<PathBuf>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::WatchError;
    use std::sync::atomic::AtomicUsize;

    fn counting_observer(registry: &PathRegistry) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        calls
    }

    #[test]
    fn test_path_registry_basic() {
        let registry = PathRegistry::new();
        registry.register("/app/views").unwrap();
        registry.register("/engine/app/views").unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(Path::new("/app/views")));
        assert!(!registry.contains(Path::new("/lib/views")));
        assert_eq!(
            registry.paths(),
            vec![PathBuf::from("/app/views"), PathBuf::from("/engine/app/views")]
        );
    }

    #[test]
    fn test_unregister_removes_duplicates() {
        let registry = PathRegistry::new();
        registry.register("/app/views").unwrap();
        registry.register("/app/views").unwrap();
        registry.register("/admin/views").unwrap();

        assert!(registry.unregister(Path::new("/app/views")).unwrap());
        assert_eq!(registry.paths(), vec![PathBuf::from("/admin/views")]);
        assert!(!registry.unregister(Path::new("/app/views")).unwrap());
    }

    #[test]
    fn test_every_mutation_notifies() {
        let registry = PathRegistry::new();
        let calls = counting_observer(&registry);

        registry.register("/app/views").unwrap();
        registry.register("/app/views").unwrap();
        registry.unregister(Path::new("/missing")).unwrap();
        registry.replace_all(vec![PathBuf::from("/app/views")]).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_observer_sees_mutation_applied() {
        let registry = Arc::new(PathRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&registry);
        let sink = Arc::clone(&seen);
        registry.subscribe(Arc::new(move || {
            if let Some(registry) = weak.upgrade() {
                sink.lock().push(registry.len());
            }
            Ok(())
        }));

        registry.register("/app/views").unwrap();
        registry.register("/admin/views").unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_observer_error_propagates() {
        let registry = PathRegistry::new();
        registry.subscribe(Arc::new(|| {
            Err(WatchError::ObserverFailed {
                reason: "boom".to_string(),
            })
        }));
        let later = counting_observer(&registry);

        let result = registry.register("/app/views");

        assert!(matches!(result, Err(WatchError::ObserverFailed { .. })));
        // The mutation itself is kept; later observers are skipped.
        assert!(registry.contains(Path::new("/app/views")));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = PathRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = registry.subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        registry.register("/app/views").unwrap();
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.register("/admin/views").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.observer_count(), 0);
    }

    #[test]
    fn test_dirs_to_watch_dedups_and_sorts() {
        let dirs = dirs_to_watch(vec![
            PathBuf::from("/b/views"),
            PathBuf::from("/a/views"),
            PathBuf::from("/b/views"),
        ]);

        assert_eq!(dirs, vec![PathBuf::from("/a/views"), PathBuf::from("/b/views")]);
    }

    #[test]
    fn test_dirs_to_watch_order_independent() {
        let forward = dirs_to_watch(vec![PathBuf::from("/x"), PathBuf::from("/y")]);
        let backward = dirs_to_watch(vec![PathBuf::from("/y"), PathBuf::from("/x")]);
        assert_eq!(forward, backward);
        assert!(dirs_to_watch(Vec::new()).is_empty());
    }
}
