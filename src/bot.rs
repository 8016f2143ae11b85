//! The orchestrator: wires storage, plugins, registry, and dispatcher
//! together and owns their lifetime.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::allowlist::{AllowList, AllowedEntry};
use crate::dispatch::{DEFAULT_TRIGGER, Dispatcher};
use crate::handler::HandlerError;
use crate::handlers::{HelpHandler, PingHandler};
use crate::kv::{DEFAULT_CACHE_TTL, Kv, KvError};
use crate::message::MessageEvent;
use crate::paths;
use crate::plugin::{PluginError, PluginManager, PluginManagerConfig};
use crate::registry::{HandlerRegistry, RegistryError};
use crate::transport::Transport;

#[derive(Debug)]
pub enum BotError {
    /// Invalid or unavailable configuration; fatal at startup.
    Config(String),
    Kv(KvError),
    Plugin(PluginError),
    Registry(RegistryError),
    Handler(HandlerError),
}

impl std::fmt::Display for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotError::Config(msg) => write!(f, "configuration error: {msg}"),
            BotError::Kv(e) => write!(f, "{e}"),
            BotError::Plugin(e) => write!(f, "{e}"),
            BotError::Registry(e) => write!(f, "{e}"),
            BotError::Handler(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BotError {}

impl From<KvError> for BotError {
    fn from(e: KvError) -> Self {
        BotError::Kv(e)
    }
}

impl From<PluginError> for BotError {
    fn from(e: PluginError) -> Self {
        BotError::Plugin(e)
    }
}

impl From<RegistryError> for BotError {
    fn from(e: RegistryError) -> Self {
        BotError::Registry(e)
    }
}

pub struct BotConfig {
    /// Command trigger prefix.
    pub trigger: String,
    /// Data directory; platform-local app directory when absent.
    pub data_dir: Option<PathBuf>,
    /// Plugin discovery directory; `<data-root>/plugins` when absent.
    pub plugin_dir: Option<PathBuf>,
    pub allowed_groups: Vec<AllowedEntry>,
    pub allowed_users: Vec<AllowedEntry>,
    /// Command base names plugins may execute.
    pub allowed_commands: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trigger: DEFAULT_TRIGGER.to_string(),
            data_dir: None,
            plugin_dir: None,
            allowed_groups: Vec::new(),
            allowed_users: Vec::new(),
            allowed_commands: Vec::new(),
        }
    }
}

pub struct Bot {
    registry: Arc<HandlerRegistry>,
    plugin_manager: Arc<PluginManager>,
    dispatcher: Arc<Dispatcher>,
    cache: Kv,
    store: Kv,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
    cleanup_task: tokio::task::JoinHandle<()>,
}

impl Bot {
    /// Build the full pipeline: ensure the data directories exist, open
    /// the cache and store, construct the plugin manager (anchored under
    /// the data root unless a directory was injected), and register the
    /// built-in handlers.
    pub async fn new(config: BotConfig, transport: Arc<dyn Transport>) -> Result<Self, BotError> {
        let data_dir = config
            .data_dir
            .or_else(paths::data_root)
            .ok_or_else(|| BotError::Config("no data directory available".to_string()))?;
        paths::ensure_dir(&data_dir).map_err(|e| {
            BotError::Config(format!(
                "failed to create data dir '{}': {e}",
                data_dir.display()
            ))
        })?;

        let cache_path = data_dir.join("cache.db");
        let store_path = data_dir.join("store.db");
        let cache = Kv::open_cache(&path_str(&cache_path)?, DEFAULT_CACHE_TTL).await?;
        let store = Kv::open(&path_str(&store_path)?).await?;
        let cleanup_task = crate::kv::spawn_cleanup_scheduler(cache.clone(), store.clone());

        let plugin_dir = config
            .plugin_dir
            .or_else(paths::default_plugin_dir)
            .ok_or_else(|| BotError::Config("no plugin directory available".to_string()))?;
        let plugin_manager = Arc::new(PluginManager::new(
            PluginManagerConfig {
                plugin_dir,
                data_dir: data_dir.join("plugin-data"),
                cache: cache.clone(),
                store: store.clone(),
                allowed_commands: config.allowed_commands,
            },
            transport.clone(),
        )?);

        let registry = Arc::new(HandlerRegistry::new());
        registry.attach_plugin_manager(plugin_manager.clone());
        registry.register(Arc::new(PingHandler::new()))?;
        registry.register(Arc::new(HelpHandler::new(registry.clone())))?;

        let allow_list = AllowList::new(&config.allowed_groups, &config.allowed_users);
        if allow_list.is_empty() {
            info!("Allow-list is empty; every inbound message will be dropped");
        }
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            transport.clone(),
            allow_list,
            config.trigger,
        ));

        Ok(Self {
            registry,
            plugin_manager,
            dispatcher,
            cache,
            store,
            transport,
            shutdown: CancellationToken::new(),
            cleanup_task,
        })
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn plugin_manager(&self) -> &Arc<PluginManager> {
        &self.plugin_manager
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn cache(&self) -> &Kv {
        &self.cache
    }

    pub fn store(&self) -> &Kv {
        &self.store
    }

    /// Token observed by the run loop and the plugin watcher. Cancel it
    /// to stop the bot from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Discover and load plugins, then start watching the plugin
    /// directory for changes. Returns the number of plugins loaded.
    pub async fn init_plugins(&self) -> Result<usize, BotError> {
        let count = self.plugin_manager.load_all().await;
        self.plugin_manager.watch(self.shutdown.clone())?;
        Ok(count)
    }

    /// Dispatch inbound events until the stream ends, the token is
    /// cancelled, or SIGINT/SIGTERM arrives. In-flight handler tasks run
    /// to completion; the transport is disconnected on the way out.
    pub async fn start(&self, mut events: mpsc::Receiver<MessageEvent>) -> Result<(), BotError> {
        info!(trigger = %self.dispatcher.trigger(), "Bot started");
        let signal = shutdown_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => {
                        let dispatcher = self.dispatcher.clone();
                        tokio::spawn(async move {
                            dispatcher.dispatch(event).await;
                        });
                    }
                    None => {
                        info!("Transport event stream closed");
                        break;
                    }
                },
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = &mut signal => {
                    info!("Signal received, shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            error!(error = %e, "Failed to disconnect transport");
        }
        Ok(())
    }

    /// Higher-level teardown: stop the watcher and the cleanup scheduler,
    /// then unload every plugin.
    pub async fn shutdown(&self) -> Result<(), BotError> {
        self.shutdown.cancel();
        self.plugin_manager.stop_watching();
        self.cleanup_task.abort();
        self.plugin_manager.unload_all().await?;
        Ok(())
    }

    /// Invoke a handler's CLI entry point with an argv-style list.
    pub async fn run_plugin_cli(&self, name: &str, args: &[String]) -> Result<String, BotError> {
        let handler = self
            .registry
            .get(name)
            .ok_or_else(|| BotError::Config(format!("no handler named '{name}'")))?;
        let cli = handler
            .cli()
            .ok_or_else(|| BotError::Config(format!("handler '{name}' has no CLI entry point")))?;
        cli.handle_cli(args).await.map_err(BotError::Handler)
    }
}

fn path_str(path: &std::path::Path) -> Result<String, BotError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| BotError::Config(format!("path is not valid UTF-8: {}", path.display())))
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
