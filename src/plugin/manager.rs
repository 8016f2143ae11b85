//! Plugin discovery, registration, reload, and teardown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use notify::RecommendedWatcher;
use notify_debouncer_mini::Debouncer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wasmtime::component::{HasSelf, Linker};
use wasmtime::{Config, Engine};

use super::Plugin;
use super::error::PluginError;
use super::runtime::{HostContext, PluginLifecycle, PluginRuntime};
use super::state::PluginState;
use super::watcher;
use super::wire::{MessageInfo, MessageInput};
use crate::handler::{CliCapable, Handler, HandlerError, HelpInfo, WILDCARD_TOPIC};
use crate::kv::Kv;
use crate::message::MessageEvent;
use crate::transport::Transport;

pub struct PluginManagerConfig {
    /// Directory scanned and watched for `.wasm` files.
    pub plugin_dir: PathBuf,
    /// Parent of the per-plugin confinement roots.
    pub data_dir: PathBuf,
    /// Shared cache; each plugin sees its own namespace of it.
    pub cache: Kv,
    /// Shared permanent store; namespaced per plugin likewise.
    pub store: Kv,
    /// Command base names plugins may execute.
    pub allowed_commands: Vec<String>,
}

/// Owns every loaded plugin and keeps the set in sync with the
/// filesystem.
///
/// The plugin map is behind an `RwLock`; lookups take the read side, and
/// a reload swaps a single map entry under the write side, so a name
/// always resolves to exactly one instance. The manager knows nothing of
/// the handler registry; the registry holds a handle to the manager.
pub struct PluginManager {
    engine: Engine,
    linker: Linker<PluginState>,
    plugin_dir: PathBuf,
    host: HostContext,
    plugins: RwLock<HashMap<String, Arc<PluginRuntime>>>,
    watcher: StdMutex<Option<Debouncer<RecommendedWatcher>>>,
}

impl PluginManager {
    pub fn new(
        config: PluginManagerConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PluginError> {
        let mut engine_config = Config::new();
        engine_config.async_support(true);
        engine_config.consume_fuel(true);
        engine_config.max_wasm_stack(512 * 1024); // 512KB stack limit
        let engine = Engine::new(&engine_config)
            .map_err(|e| PluginError::Load(format!("failed to create engine: {e}")))?;

        let mut linker: Linker<PluginState> = Linker::new(&engine);
        wasmtime_wasi::p2::add_to_linker_async(&mut linker)
            .map_err(|e| PluginError::Load(format!("failed to add WASI to linker: {e}")))?;
        Plugin::add_to_linker::<PluginState, HasSelf<PluginState>>(&mut linker, |state| state)
            .map_err(|e| PluginError::Load(format!("failed to add host functions: {e}")))?;

        crate::paths::ensure_dir(&config.plugin_dir).map_err(|e| {
            PluginError::Load(format!(
                "failed to create plugin dir '{}': {e}",
                config.plugin_dir.display()
            ))
        })?;
        crate::paths::ensure_dir(&config.data_dir).map_err(|e| {
            PluginError::Load(format!(
                "failed to create plugin data dir '{}': {e}",
                config.data_dir.display()
            ))
        })?;

        Ok(Self {
            engine,
            linker,
            plugin_dir: config.plugin_dir,
            host: HostContext {
                data_root: config.data_dir,
                cache: config.cache,
                store: config.store,
                allowed_commands: Arc::new(config.allowed_commands),
                transport,
            },
            plugins: RwLock::new(HashMap::new()),
            watcher: StdMutex::new(None),
        })
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Scan the plugin directory and load every `.wasm` file found.
    /// Failures are logged and skipped; returns the number loaded.
    pub async fn load_all(&self) -> usize {
        let entries = match std::fs::read_dir(&self.plugin_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    dir = %self.plugin_dir.display(),
                    error = %e,
                    "Failed to read plugin directory"
                );
                return 0;
            }
        };

        let mut count = 0;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !is_wasm_file(&path) {
                continue;
            }
            match self.load_plugin(&path).await {
                Ok(runtime) => {
                    info!(name = %runtime.name(), path = %path.display(), "Plugin loaded");
                    count += 1;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        state = %PluginLifecycle::Failed,
                        "Failed to load plugin, skipping"
                    );
                }
            }
        }
        count
    }

    /// Load one plugin, replacing any previous instance with the same
    /// resolved name. The new instance is fully wired before the old one
    /// is closed; readers holding the old handle finish their calls.
    pub async fn load_plugin(&self, path: &Path) -> Result<Arc<PluginRuntime>, PluginError> {
        debug!(path = %path.display(), state = %PluginLifecycle::Loading, "Loading plugin");
        let runtime =
            Arc::new(PluginRuntime::load(&self.engine, &self.linker, path, &self.host).await?);
        let old = {
            let mut plugins = self.write_plugins();
            plugins.insert(runtime.name().to_string(), runtime.clone())
        };
        if let Some(old) = old {
            old.close().await;
            info!(name = %runtime.name(), "Plugin replaced");
        }
        Ok(runtime)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginRuntime>> {
        self.read_plugins().get(name).cloned()
    }

    /// Snapshot of all loaded plugins. Iteration order is not meaningful.
    pub fn plugins(&self) -> Vec<Arc<PluginRuntime>> {
        self.read_plugins().values().cloned().collect()
    }

    /// Handler views over every loaded plugin.
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.plugins()
            .into_iter()
            .map(|runtime| Arc::new(PluginHandler::new(runtime)) as Arc<dyn Handler>)
            .collect()
    }

    /// Unload one plugin by name. Unknown names are not an error.
    pub async fn unload(&self, name: &str) {
        let removed = self.write_plugins().remove(name);
        if let Some(runtime) = removed {
            runtime.close().await;
            info!(name = %name, "Plugin unloaded");
        }
    }

    /// Close every plugin, aggregating failures into one error.
    pub async fn unload_all(&self) -> Result<(), PluginError> {
        let drained: Vec<_> = self.write_plugins().drain().collect();
        let mut errors = Vec::new();
        for (name, runtime) in drained {
            runtime.close().await;
            if runtime.lifecycle() != PluginLifecycle::Closed {
                errors.push(format!("plugin '{name}' did not close"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Shutdown(errors))
        }
    }

    /// Start watching the plugin directory for changes. Reloads are
    /// debounced; the watcher stops when the token is cancelled or
    /// [`PluginManager::stop_watching`] runs.
    pub fn watch(self: &Arc<Self>, shutdown: CancellationToken) -> Result<(), PluginError> {
        let debouncer = watcher::spawn(Arc::clone(self), shutdown)?;
        *self.watcher_guard() = Some(debouncer);
        Ok(())
    }

    /// Drop the watcher, cancelling any pending debounce timers.
    pub fn stop_watching(&self) {
        self.watcher_guard().take();
    }

    fn read_plugins(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<PluginRuntime>>> {
        match self.plugins.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_plugins(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<PluginRuntime>>> {
        match self.plugins.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn watcher_guard(&self) -> std::sync::MutexGuard<'_, Option<Debouncer<RecommendedWatcher>>> {
        match self.watcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn is_wasm_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("wasm")
}

/// [`Handler`] view over a loaded plugin.
pub struct PluginHandler {
    runtime: Arc<PluginRuntime>,
}

impl PluginHandler {
    pub fn new(runtime: Arc<PluginRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<PluginRuntime> {
        &self.runtime
    }
}

#[async_trait]
impl Handler for PluginHandler {
    fn name(&self) -> &str {
        self.runtime.name()
    }

    fn topics(&self) -> Vec<String> {
        let mut topics = self.runtime.topics().to_vec();
        // A plugin declared under the sentinel name is a wildcard
        // subscriber even when its topic list does not say so.
        if self.runtime.is_wildcard() && !topics.iter().any(|t| t == WILDCARD_TOPIC) {
            topics.push(WILDCARD_TOPIC.to_string());
        }
        topics
    }

    fn help(&self) -> HelpInfo {
        let mut help = self.runtime.help().clone();
        if help.name.is_empty() {
            help.name = self.runtime.name().to_string();
        }
        help
    }

    fn version(&self) -> String {
        // Fetched lazily through the async path; empty until someone asks
        // the runtime directly.
        self.runtime.version_cached().unwrap_or_default()
    }

    async fn handle(
        &self,
        event: &MessageEvent,
        args: &str,
    ) -> Result<Option<String>, HandlerError> {
        let input = MessageInput {
            message: args.to_string(),
            sender: event.sender.jid().to_string(),
            info: MessageInfo {
                id: event.id.clone(),
                timestamp: event.timestamp,
                push_name: event.push_name.clone(),
                is_group: event.chat.is_group(),
            },
        };
        let output = self
            .runtime
            .call_message(&input)
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;
        if !output.success {
            return Err(HandlerError::Failed(
                output
                    .error
                    .unwrap_or_else(|| "plugin reported failure".to_string()),
            ));
        }
        Ok(output.reply.filter(|reply| !reply.is_empty()))
    }

    fn cli(&self) -> Option<&dyn CliCapable> {
        if self.runtime.has_cli() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl CliCapable for PluginHandler {
    async fn handle_cli(&self, args: &[String]) -> Result<String, HandlerError> {
        let output = self
            .runtime
            .call_cli(args)
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;
        if output.success {
            Ok(output.output.unwrap_or_default())
        } else {
            Err(HandlerError::Failed(
                output
                    .error
                    .unwrap_or_else(|| "plugin reported failure".to_string()),
            ))
        }
    }
}
