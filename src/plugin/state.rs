//! Per-instance store data: the WASI context plus the host-function table.

use std::sync::Arc;

use wasmtime::StoreLimits;
use wasmtime_wasi::{ResourceTable, WasiCtx, WasiCtxView, WasiView};

use super::gateway::CapabilityGateway;
use super::helpers::sanitize_plugin_output;
use super::wire::{
    self, ExecInput, ExecOutput, KvGetOutput, KvSetInput, ListDirectoryOutput, ListStoreOutput,
    SendImageInput, STATUS_ERR, STATUS_OK,
};
use super::{LogLevel, PluginImports};

/// Maximum bytes of log output per single `log()` call from a plugin.
const LOG_MESSAGE_LIMIT: usize = 4096;

/// Per-instance WASI state for a plugin.
///
/// Each plugin gets its own sandboxed WASI context (stdio, env), resource
/// table, and resource limits to prevent unbounded allocation. The probe
/// instance used for env-var negotiation carries no gateway: its host
/// functions answer with stub values so nothing ambient leaks before the
/// plugin has declared what it needs.
pub(crate) struct PluginState {
    pub(crate) wasi: WasiCtx,
    pub(crate) table: ResourceTable,
    pub(crate) limits: StoreLimits,
    /// Plugin name used for log output attribution.
    pub(crate) plugin_name: String,
    /// Live capability gateway; `None` while probing.
    pub(crate) gateway: Option<Arc<CapabilityGateway>>,
}

impl PluginState {
    pub(crate) fn probe(plugin_name: String, wasi: WasiCtx, limits: StoreLimits) -> Self {
        Self {
            wasi,
            table: ResourceTable::new(),
            limits,
            plugin_name,
            gateway: None,
        }
    }

    pub(crate) fn live(
        plugin_name: String,
        wasi: WasiCtx,
        limits: StoreLimits,
        gateway: Arc<CapabilityGateway>,
    ) -> Self {
        Self {
            wasi,
            table: ResourceTable::new(),
            limits,
            plugin_name,
            gateway: Some(gateway),
        }
    }
}

/// Implements the `WasiView` trait so wasmtime can access the WASI context
/// and resource table from our custom store data.
impl WasiView for PluginState {
    fn ctx(&mut self) -> WasiCtxView<'_> {
        WasiCtxView {
            ctx: &mut self.wasi,
            table: &mut self.table,
        }
    }
}

/// The host-function table. Capability checks live in the gateway; this
/// layer only decodes wire JSON and answers stub values while probing.
impl PluginImports for PluginState {
    async fn log(&mut self, level: LogLevel, msg: String) {
        let clean = sanitize_plugin_output(&msg);
        if clean.is_empty() {
            return;
        }
        let clean = if clean.len() > LOG_MESSAGE_LIMIT {
            &clean[..LOG_MESSAGE_LIMIT]
        } else {
            &clean
        };
        match level {
            LogLevel::Debug => tracing::debug!(plugin = %self.plugin_name, "{clean}"),
            LogLevel::Info => tracing::info!(plugin = %self.plugin_name, "{clean}"),
            LogLevel::Warn => tracing::warn!(plugin = %self.plugin_name, "{clean}"),
            LogLevel::Error => tracing::error!(plugin = %self.plugin_name, "{clean}"),
        }
    }

    async fn read_file(&mut self, path: String) -> String {
        match &self.gateway {
            Some(gateway) => gateway.read_file(&path),
            None => String::new(),
        }
    }

    async fn list_directory(&mut self, path: String) -> String {
        let output = match &self.gateway {
            Some(gateway) => gateway.list_directory(&path),
            None => ListDirectoryOutput {
                success: false,
                files: Vec::new(),
                error: Some("filesystem unavailable".to_string()),
            },
        };
        wire::to_json(&output)
    }

    async fn send_image(&mut self, input: String) -> u32 {
        let Some(gateway) = &self.gateway else {
            return STATUS_OK; // no-op while probing
        };
        let input: SendImageInput = match serde_json::from_str(&input) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(plugin = %self.plugin_name, error = %e, "Invalid send_image input");
                return STATUS_ERR;
            }
        };
        gateway.send_image(&input.recipient, &input.path).await
    }

    async fn get_cache(&mut self, key: String) -> String {
        let output = match &self.gateway {
            Some(gateway) => gateway.get_cache(&key).await,
            None => KvGetOutput::default(),
        };
        wire::to_json(&output)
    }

    async fn set_cache(&mut self, input: String) -> u32 {
        let Some(gateway) = &self.gateway else {
            return STATUS_OK;
        };
        match serde_json::from_str::<KvSetInput>(&input) {
            Ok(input) => gateway.set_cache(&input.key, &input.value).await,
            Err(e) => {
                tracing::warn!(plugin = %self.plugin_name, error = %e, "Invalid set_cache input");
                STATUS_ERR
            }
        }
    }

    async fn get_store(&mut self, key: String) -> String {
        let output = match &self.gateway {
            Some(gateway) => gateway.get_store(&key).await,
            None => KvGetOutput::default(),
        };
        wire::to_json(&output)
    }

    async fn set_store(&mut self, input: String) -> u32 {
        let Some(gateway) = &self.gateway else {
            return STATUS_OK;
        };
        match serde_json::from_str::<KvSetInput>(&input) {
            Ok(input) => gateway.set_store(&input.key, &input.value).await,
            Err(e) => {
                tracing::warn!(plugin = %self.plugin_name, error = %e, "Invalid set_store input");
                STATUS_ERR
            }
        }
    }

    async fn list_store(&mut self, prefix: String) -> String {
        let output = match &self.gateway {
            Some(gateway) => gateway.list_store(&prefix).await,
            None => ListStoreOutput::default(),
        };
        wire::to_json(&output)
    }

    async fn exec_command(&mut self, input: String) -> String {
        let output = match &self.gateway {
            Some(gateway) => match serde_json::from_str::<ExecInput>(&input) {
                Ok(input) => gateway.exec_command(&input.command, &input.stdin).await,
                Err(e) => {
                    tracing::warn!(plugin = %self.plugin_name, error = %e, "Invalid exec_command input");
                    ExecOutput::failure(format!("invalid input: {e}"))
                }
            },
            None => ExecOutput::failure("exec unavailable"),
        };
        wire::to_json(&output)
    }
}
