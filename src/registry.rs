//! Name- and topic-indexed handler lookup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::handler::{Handler, WILDCARD_TOPIC};
use crate::plugin::PluginManager;

#[derive(Debug)]
pub enum RegistryError {
    DuplicateName(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateName(name) => {
                write!(f, "handler '{name}' is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Merged view over built-in handlers and plugin-backed ones.
///
/// Built-ins are registered directly and live as long as the registry;
/// plugin handlers are merged in from the plugin manager on every query,
/// so a reload is visible immediately. Built-ins win on name collision.
/// The reference is one-way: the plugin manager knows nothing about the
/// registry.
pub struct HandlerRegistry {
    builtins: RwLock<HashMap<String, Arc<dyn Handler>>>,
    plugins: OnceLock<Arc<PluginManager>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            builtins: RwLock::new(HashMap::new()),
            plugins: OnceLock::new(),
        }
    }

    /// Wire in the plugin manager. Later calls are ignored.
    pub fn attach_plugin_manager(&self, manager: Arc<PluginManager>) {
        let _ = self.plugins.set(manager);
    }

    pub fn plugin_manager(&self) -> Option<&Arc<PluginManager>> {
        self.plugins.get()
    }

    /// Register a built-in handler. Duplicate names fail loudly.
    pub fn register(&self, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let name = handler.name().to_string();
        let mut builtins = self.write_builtins();
        if builtins.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        builtins.insert(name, handler);
        Ok(())
    }

    /// Look up one handler by name, built-ins first.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        if let Some(handler) = self.read_builtins().get(name) {
            return Some(handler.clone());
        }
        self.plugins
            .get()
            .and_then(|manager| manager.get(name))
            .map(|runtime| {
                Arc::new(crate::plugin::PluginHandler::new(runtime)) as Arc<dyn Handler>
            })
    }

    /// Every known handler, built-ins shadowing plugins on name collision.
    pub fn all(&self) -> Vec<Arc<dyn Handler>> {
        let mut result: Vec<Arc<dyn Handler>> = Vec::new();
        let mut names: HashSet<String> = HashSet::new();
        for handler in self.read_builtins().values() {
            names.insert(handler.name().to_string());
            result.push(handler.clone());
        }
        if let Some(manager) = self.plugins.get() {
            for handler in manager.handlers() {
                if names.insert(handler.name().to_string()) {
                    result.push(handler);
                }
            }
        }
        result
    }

    /// The handlers that should receive a message.
    ///
    /// A handler with no topics receives nothing. A wildcard subscriber
    /// receives every non-command message and nothing else through this
    /// path; other handlers receive commands whose topic they subscribe
    /// to.
    pub fn handlers_for_message(&self, topic: &str, is_command: bool) -> Vec<Arc<dyn Handler>> {
        self.all()
            .into_iter()
            .filter(|handler| {
                let topics = handler.topics();
                if topics.is_empty() {
                    return false;
                }
                if topics.iter().any(|t| t == WILDCARD_TOPIC) {
                    return !is_command;
                }
                is_command && topics.iter().any(|t| t == topic)
            })
            .collect()
    }

    fn read_builtins(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Handler>>> {
        match self.builtins.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_builtins(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Handler>>> {
        match self.builtins.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
