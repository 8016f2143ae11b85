//! WebAssembly plugin host: lifecycle, capability gateway, and the
//! host-function table plugins call back into.

mod error;
mod gateway;
mod helpers;
mod manager;
mod runtime;
mod state;
mod watcher;
pub mod wire;

pub use error::PluginError;
pub use gateway::{CapabilityGateway, EXEC_TIMEOUT};
pub use manager::{PluginHandler, PluginManager, PluginManagerConfig};
pub use runtime::{PluginLifecycle, PluginRuntime};

wasmtime::component::bindgen!({
    world: "plugin",
    path: "wit/plugin.wit",
    imports: { default: async },
    exports: { default: async },
    require_store_data_send: true,
    additional_derives: [Clone, PartialEq, Eq, Hash],
});
