//! Watch command - poll the reloader and clear the template cache on change.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::time::{MissedTickBehavior, interval};
use walkdir::WalkDir;

use crate::cache::DetailsCache;
use crate::config::{Settings, WatcherBackend};
use crate::watcher::{PathRegistry, ViewReloader, factory_for, matches_extension};

/// Arguments for the watch command.
#[derive(Debug)]
pub struct WatchArgs {
    pub dirs: Vec<PathBuf>,
    pub interval_ms: Option<u64>,
    pub backend: Option<WatcherBackend>,
    pub once: bool,
}

/// Template lookup cache: logical name (`users/index`) to file on disk.
pub type TemplateCache = DetailsCache<String, PathBuf>;

/// Run the watch command.
pub async fn run(args: WatchArgs, mut settings: Settings) -> Result<()> {
    let WatchArgs {
        dirs,
        interval_ms,
        backend,
        once,
    } = args;

    if let Some(backend) = backend {
        settings.watcher.backend = backend;
    }
    let interval_ms = interval_ms
        .unwrap_or(settings.watcher.poll_interval_ms)
        .max(1);

    let registry = Arc::new(PathRegistry::new());
    registry.replace_all(settings.view_paths.iter().cloned().chain(dirs))?;
    if registry.is_empty() {
        bail!("No view directories to watch. Pass directories or set `view_paths` in settings.toml");
    }

    let cache: Arc<TemplateCache> = Arc::new(DetailsCache::new());
    let reloader = ViewReloader::new(
        factory_for(&settings.watcher),
        registry.clone(),
        cache.clone(),
    )
    .context("failed to start watcher")?;

    let watched = reloader.watched_dirs();
    let indexed = index_templates(&cache, &watched, &settings.watcher.extensions);
    crate::log_event!(
        "watch",
        "monitoring",
        "{} directories, {indexed} templates",
        watched.len()
    );
    println!(
        "Watching {} directories ({:?}, every {interval_ms}ms). Press Ctrl-C to stop.",
        watched.len(),
        settings.watcher.backend
    );

    let mut ticker = interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if reloader.execute_if_updated()? {
                    let indexed = index_templates(
                        &cache,
                        &reloader.watched_dirs(),
                        &settings.watcher.extensions,
                    );
                    println!(
                        "[{}] change detected, cache cleared (reload #{}), {indexed} templates",
                        chrono::Local::now().format("%H:%M:%S"),
                        cache.clear_count()
                    );
                }
                if once {
                    break;
                }
            }
            _ = &mut shutdown => {
                crate::log_event!("watch", "shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

/// Fill the cache with every template under `dirs`. Returns the cache size.
///
/// Earlier directories win when two define the same logical name.
pub fn index_templates(cache: &TemplateCache, dirs: &[PathBuf], extensions: &[String]) -> usize {
    for dir in dirs {
        let templates = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file());
        for entry in templates {
            let path = entry.into_path();
            if !matches_extension(&path, extensions) {
                continue;
            }
            if let Some(name) = logical_name(dir, &path) {
                cache.fetch_or_insert_with(name, || path.clone());
            }
        }
    }
    cache.len()
}

/// `users/index.html.erb` under `dir` becomes `users/index`.
fn logical_name(dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(dir).ok()?;
    let file_name = relative.file_name()?.to_str()?;
    let stem = file_name.split('.').next().filter(|s| !s.is_empty())?;

    let name = match relative.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            format!("{}/{stem}", parent.to_string_lossy().replace('\\', "/"))
        }
        _ => stem.to_string(),
    };
    Some(name)
}
