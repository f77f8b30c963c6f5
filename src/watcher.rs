//! File watcher for folder-config changes.
//!
//! Folder configs are cached by the resolver, so an edit anywhere in the
//! vault must flush that cache before the next pass hands out stale
//! creation defaults. Watches the vault root recursively, reacts only to
//! events touching the reserved config filename, and debounces editor
//! save bursts into a single invalidation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::note_config::ConfigResolver;

/// Debounce window for file system events.
const DEBOUNCE_MS: u64 = 500;

/// Start watching the vault for folder-config changes.
///
/// Returns immediately. The watcher runs for the lifetime of the process.
pub fn start_config_watcher(root: PathBuf, resolver: Arc<ConfigResolver>) {
    tokio::spawn(async move {
        // Channel for forwarding notify events to the async debouncer
        let (fs_tx, mut fs_rx) = mpsc::channel::<()>(64);

        let tx = fs_tx.clone();
        let mut watcher = match RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    // Only care about create, modify, remove events that
                    // touch a reserved config file.
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) && event.paths.iter().any(|p| ConfigResolver::is_config_file(p))
                    {
                        let _ = tx.try_send(());
                    }
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Config watcher: failed to create filesystem watcher: {}", e);
                return;
            }
        };

        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            log::error!("Config watcher: failed to watch {}: {}", root.display(), e);
            return;
        }

        log::info!(
            "Config watcher: watching {} for folder config changes",
            root.display()
        );

        // Debounce loop: coalesce rapid events into a single flush
        loop {
            if fs_rx.recv().await.is_none() {
                break; // Channel closed, watcher dropped
            }

            sleep(Duration::from_millis(DEBOUNCE_MS)).await;
            while fs_rx.try_recv().is_ok() {}

            log::debug!("Config watcher: folder config changed, flushing cache");
            resolver.invalidate();
        }

        log::info!("Config watcher: stopped");
    });
}
