//! A loaded WASM plugin instance.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::{Mutex, OnceCell};
use wasmtime::component::{
    Component, ComponentNamedList, Instance, Lift, Linker, Lower, TypedFunc,
};
use wasmtime::{Engine, Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::p2::pipe::MemoryOutputPipe;

use super::Plugin;
use super::error::PluginError;
use super::gateway::CapabilityGateway;
use super::helpers::extract_panic_message;
use super::state::PluginState;
use super::wire::{CliInput, CliOutput, MessageInput, MessageOutput};
use crate::handler::{HelpInfo, WILDCARD_TOPIC};
use crate::kv::Kv;
use crate::transport::Transport;

/// Fuel budget per exported call (~1 fuel unit per WASM instruction).
const CALL_FUEL: u64 = 10_000_000;

/// Cap on each linear memory to prevent OOM.
const MEMORY_LIMIT: usize = 10 * 1024 * 1024;

/// Bytes of plugin stderr kept for error reporting.
const STDERR_CAPACITY: usize = 4096;

/// Everything the manager hands a plugin so its gateway can be built.
pub(crate) struct HostContext {
    pub(crate) data_root: PathBuf,
    pub(crate) cache: Kv,
    pub(crate) store: Kv,
    pub(crate) allowed_commands: Arc<Vec<String>>,
    pub(crate) transport: Arc<dyn Transport>,
}

/// Where a plugin instance is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLifecycle {
    Loading,
    Ready,
    Failed,
    Closing,
    Closed,
}

impl std::fmt::Display for PluginLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PluginLifecycle::Loading => "loading",
            PluginLifecycle::Ready => "ready",
            PluginLifecycle::Failed => "failed",
            PluginLifecycle::Closing => "closing",
            PluginLifecycle::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Live wasmtime state for one plugin. Taken out on close.
struct InstanceCell {
    store: Store<PluginState>,
    plugin: Plugin,
    /// Optional `handle-cli` export, probed at load time.
    cli: Option<TypedFunc<(String,), (String,)>>,
}

/// A loaded and validated WASM plugin.
///
/// # Lifecycle
///
/// 1. **Read + compile**: the `.wasm` file becomes a component.
/// 2. **Probe**: a throwaway instance with *no* environment variables and
///    stub host functions answers `get-name` and the optional
///    `get-required-env-vars`, then is torn down. Nothing ambient reaches
///    a module before it has declared what it needs.
/// 3. **Real instance**: constructed with only the declared environment
///    variables copied from the process environment and the live
///    capability gateway bound. `get-help` and `get-topics` are called
///    once and cached.
///
/// A single instance serializes its calls through a `tokio::sync::Mutex`
/// (WASM instances are not re-entrant); different plugins run in
/// parallel. Each call gets a fresh fuel budget.
pub struct PluginRuntime {
    name: String,
    path: PathBuf,
    topics: Vec<String>,
    help: HelpInfo,
    required_env: Vec<String>,
    has_cli: bool,
    lifecycle: StdMutex<PluginLifecycle>,
    version: OnceCell<String>,
    instance: Mutex<Option<InstanceCell>>,
    stderr: MemoryOutputPipe,
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("topics", &self.topics)
            .field("has_cli", &self.has_cli)
            .finish_non_exhaustive()
    }
}

impl PluginRuntime {
    /// Load a plugin from disk, negotiate its environment, and bring up
    /// the real instance. See the struct docs for the full lifecycle.
    pub(crate) async fn load(
        engine: &Engine,
        linker: &Linker<PluginState>,
        path: &Path,
        host: &HostContext,
    ) -> Result<Self, PluginError> {
        let wasm_bytes = std::fs::read(path)
            .map_err(|e| PluginError::Load(format!("failed to read {}: {e}", path.display())))?;
        let component = Component::new(engine, &wasm_bytes)
            .map_err(|e| PluginError::Load(format!("failed to compile {}: {e}", path.display())))?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plugin")
            .to_string();

        // Probe pass: resolve the declared name and the env vars the
        // plugin wants, with nothing granted.
        let probe_stderr = MemoryOutputPipe::new(STDERR_CAPACITY);
        let mut builder = WasiCtxBuilder::new();
        builder.stderr(probe_stderr.clone());
        let mut store = Store::new(
            engine,
            PluginState::probe(stem.clone(), builder.build(), store_limits()),
        );
        store.limiter(|state| &mut state.limits);
        set_fuel(&mut store)?;

        let instance = linker
            .instantiate_async(&mut store, &component)
            .await
            .map_err(|e| PluginError::Runtime(format!("failed to instantiate plugin: {e}")))?;
        let plugin = Plugin::new(&mut store, &instance)
            .map_err(|e| PluginError::Runtime(format!("failed to bind plugin world: {e}")))?;

        let declared = plugin
            .call_get_name(&mut store)
            .await
            .map_err(|e| trap_message("get_name", &probe_stderr, e))?;
        let name = if declared.trim().is_empty() {
            stem
        } else {
            declared.trim().to_string()
        };

        let required_env =
            match optional_func::<(), (String,)>(&instance, &mut store, "get-required-env-vars")? {
                Some(func) => {
                    set_fuel(&mut store)?;
                    let (json,) = func
                        .call_async(&mut store, ())
                        .await
                        .map_err(|e| trap_message("get_required_env_vars", &probe_stderr, e))?;
                    func.post_return_async(&mut store)
                        .await
                        .map_err(|e| PluginError::Runtime(format!("post-return failed: {e}")))?;
                    serde_json::from_str::<Vec<String>>(&json).map_err(|e| {
                        PluginError::InvalidConfig(format!("invalid required env vars: {e}"))
                    })?
                }
                None => Vec::new(),
            };
        drop(store);

        // Real pass: only the declared environment variables, live gateway.
        let stderr = MemoryOutputPipe::new(STDERR_CAPACITY);
        let mut builder = WasiCtxBuilder::new();
        builder.stderr(stderr.clone());
        for var in &required_env {
            if let Ok(value) = std::env::var(var) {
                builder.env(var, &value);
            }
        }
        let gateway = Arc::new(CapabilityGateway::new(
            &name,
            &host.data_root,
            &host.cache,
            &host.store,
            host.allowed_commands.clone(),
            host.transport.clone(),
        )?);
        let mut store = Store::new(
            engine,
            PluginState::live(name.clone(), builder.build(), store_limits(), gateway),
        );
        store.limiter(|state| &mut state.limits);
        set_fuel(&mut store)?;

        let instance = linker
            .instantiate_async(&mut store, &component)
            .await
            .map_err(|e| PluginError::Runtime(format!("failed to instantiate plugin: {e}")))?;
        let plugin = Plugin::new(&mut store, &instance)
            .map_err(|e| PluginError::Runtime(format!("failed to bind plugin world: {e}")))?;

        set_fuel(&mut store)?;
        let help_json = plugin
            .call_get_help(&mut store)
            .await
            .map_err(|e| trap_message("get_help", &stderr, e))?;
        let help: HelpInfo = serde_json::from_str(&help_json)
            .map_err(|e| PluginError::InvalidConfig(format!("invalid help record: {e}")))?;

        set_fuel(&mut store)?;
        let topics_json = plugin
            .call_get_topics(&mut store)
            .await
            .map_err(|e| trap_message("get_topics", &stderr, e))?;
        let topics: Vec<String> = serde_json::from_str(&topics_json)
            .map_err(|e| PluginError::InvalidConfig(format!("invalid topics: {e}")))?;

        let cli = optional_func::<(String,), (String,)>(&instance, &mut store, "handle-cli")?;

        Ok(Self {
            name,
            path: path.to_path_buf(),
            topics,
            help,
            required_env,
            has_cli: cli.is_some(),
            lifecycle: StdMutex::new(PluginLifecycle::Ready),
            version: OnceCell::new(),
            instance: Mutex::new(Some(InstanceCell { store, plugin, cli })),
            stderr,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn help(&self) -> &HelpInfo {
        &self.help
    }

    pub fn required_env(&self) -> &[String] {
        &self.required_env
    }

    pub fn has_cli(&self) -> bool {
        self.has_cli
    }

    /// Whether this plugin takes the wildcard path: declared under the
    /// sentinel name or subscribed to the wildcard topic.
    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD_TOPIC || self.topics.iter().any(|t| t == WILDCARD_TOPIC)
    }

    pub fn lifecycle(&self) -> PluginLifecycle {
        *self.lifecycle_guard()
    }

    fn lifecycle_guard(&self) -> MutexGuard<'_, PluginLifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Invoke `handle-message` with the given input.
    pub async fn call_message(&self, input: &MessageInput) -> Result<MessageOutput, PluginError> {
        let json = serde_json::to_string(input)
            .map_err(|e| PluginError::Runtime(format!("failed to encode input: {e}")))?;
        let mut guard = self.instance.lock().await;
        let cell = guard.as_mut().ok_or(PluginError::Closed)?;
        set_fuel(&mut cell.store)?;
        let out = cell
            .plugin
            .call_handle_message(&mut cell.store, &json)
            .await
            .map_err(|e| self.trap_error("handle_message", e))?;
        serde_json::from_str(&out)
            .map_err(|e| PluginError::Runtime(format!("invalid handle_message output: {e}")))
    }

    /// Invoke the optional `handle-cli` export with an argv-style list.
    pub async fn call_cli(&self, args: &[String]) -> Result<CliOutput, PluginError> {
        let input = CliInput {
            args: args.to_vec(),
        };
        let json = serde_json::to_string(&input)
            .map_err(|e| PluginError::Runtime(format!("failed to encode input: {e}")))?;
        let mut guard = self.instance.lock().await;
        let cell = guard.as_mut().ok_or(PluginError::Closed)?;
        let Some(func) = cell.cli else {
            return Err(PluginError::Denied(
                "plugin does not export handle-cli".to_string(),
            ));
        };
        set_fuel(&mut cell.store)?;
        let (out,) = func
            .call_async(&mut cell.store, (json,))
            .await
            .map_err(|e| self.trap_error("handle_cli", e))?;
        func.post_return_async(&mut cell.store)
            .await
            .map_err(|e| PluginError::Runtime(format!("post-return failed: {e}")))?;
        serde_json::from_str(&out)
            .map_err(|e| PluginError::Runtime(format!("invalid handle_cli output: {e}")))
    }

    /// The plugin's declared version, fetched once on first use.
    pub async fn version(&self) -> Result<String, PluginError> {
        self.version
            .get_or_try_init(|| async {
                let mut guard = self.instance.lock().await;
                let cell = guard.as_mut().ok_or(PluginError::Closed)?;
                set_fuel(&mut cell.store)?;
                cell.plugin
                    .call_get_version(&mut cell.store)
                    .await
                    .map_err(|e| self.trap_error("get_version", e))
            })
            .await
            .cloned()
    }

    /// The declared version if it has already been fetched.
    pub fn version_cached(&self) -> Option<String> {
        self.version.get().cloned()
    }

    /// Tear down the instance. In-flight calls finish first; later calls
    /// fail with [`PluginError::Closed`]. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.lifecycle_guard();
            if matches!(*state, PluginLifecycle::Closing | PluginLifecycle::Closed) {
                return;
            }
            *state = PluginLifecycle::Closing;
        }
        let mut guard = self.instance.lock().await;
        *guard = None;
        *self.lifecycle_guard() = PluginLifecycle::Closed;
    }

    fn trap_error(&self, op: &str, e: wasmtime::Error) -> PluginError {
        trap_message(op, &self.stderr, e)
    }
}

fn store_limits() -> StoreLimits {
    StoreLimitsBuilder::new().memory_size(MEMORY_LIMIT).build()
}

fn set_fuel(store: &mut Store<PluginState>) -> Result<(), PluginError> {
    store
        .set_fuel(CALL_FUEL)
        .map_err(|e| PluginError::Runtime(format!("failed to set fuel limit: {e}")))
}

/// Look up an export that is not part of the world. Absent is fine; a
/// present export with the wrong signature is a config error.
fn optional_func<Params, Results>(
    instance: &Instance,
    store: &mut Store<PluginState>,
    name: &str,
) -> Result<Option<TypedFunc<Params, Results>>, PluginError>
where
    Params: ComponentNamedList + Lower,
    Results: ComponentNamedList + Lift,
{
    let Some(func) = instance.get_func(&mut *store, name) else {
        return Ok(None);
    };
    let typed = func.typed::<Params, Results>(&*store).map_err(|e| {
        PluginError::InvalidConfig(format!("export '{name}' has wrong signature: {e}"))
    })?;
    Ok(Some(typed))
}

/// Build a clean error for a trapped call. When the guest panicked, the
/// stderr capture usually has a better story than the trap itself.
fn trap_message(op: &str, stderr: &MemoryOutputPipe, e: wasmtime::Error) -> PluginError {
    let stderr_bytes = stderr.contents();
    let stderr_output = String::from_utf8_lossy(&stderr_bytes);
    // In verbose mode (RUST_BACKTRACE set), include the full stderr dump.
    // Otherwise, try to extract just the panic message for a cleaner error.
    let verbose = std::env::var_os("RUST_BACKTRACE").is_some();
    let msg = if verbose {
        let mut msg = format!("failed to call {op}(): {e}");
        if !stderr_output.is_empty() {
            msg = format!("{msg}\n\nplugin stderr:\n{stderr_output}");
        }
        msg
    } else {
        extract_panic_message(&stderr_output)
            .unwrap_or_else(|| format!("failed to call {op}(): {e}"))
    };
    PluginError::Runtime(msg)
}
