//! Debounced plugin-directory watcher.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::PluginError;
use super::manager::PluginManager;

/// Quiet period before coalesced events trigger a reload. Editors often
/// write via temp-file-plus-rename, which fires several events per save.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Watch the manager's plugin directory and reload each distinct changed
/// `.wasm` path after the debounce window. The returned debouncer keeps
/// the watcher alive; dropping it cancels pending timers.
pub(crate) fn spawn(
    manager: Arc<PluginManager>,
    shutdown: CancellationToken,
) -> Result<Debouncer<RecommendedWatcher>, PluginError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<PathBuf>>();
    let mut debouncer = new_debouncer(
        DEBOUNCE_WINDOW,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                let _ = tx.send(paths);
            }
            Err(e) => warn!(error = %e, "Plugin watcher error"),
        },
    )
    .map_err(|e| PluginError::Load(format!("failed to create watcher: {e}")))?;

    let dir = manager.plugin_dir().to_path_buf();
    debouncer
        .watcher()
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| PluginError::Load(format!("failed to watch '{}': {e}", dir.display())))?;
    info!(dir = %dir.display(), "Watching plugin directory");

    tokio::spawn(async move {
        loop {
            let paths = tokio::select! {
                _ = shutdown.cancelled() => break,
                paths = rx.recv() => match paths {
                    Some(paths) => paths,
                    None => break,
                },
            };
            let distinct: HashSet<PathBuf> = paths.into_iter().collect();
            for path in distinct {
                if path.extension().and_then(|e| e.to_str()) != Some("wasm") {
                    continue;
                }
                if !path.is_file() {
                    debug!(path = %path.display(), "Changed path is gone, skipping reload");
                    continue;
                }
                match manager.load_plugin(&path).await {
                    Ok(runtime) => {
                        info!(name = %runtime.name(), path = %path.display(), "Plugin reloaded");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to reload plugin");
                    }
                }
            }
        }
        debug!("Plugin watcher task exited");
    });

    Ok(debouncer)
}
