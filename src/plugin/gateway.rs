//! The per-plugin capability gateway.
//!
//! Everything a plugin can do to the world goes through one of these:
//! a filesystem root it cannot leave, a pair of KV namespaces it cannot
//! name keys outside of, a command allow-list, and the reply/transport
//! channel. Denials are answered in-band (empty string, `success:false`,
//! or an error status) and logged host-side; a capability miss never
//! surfaces as a host error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::error::PluginError;
use super::wire::{
    ExecOutput, KvGetOutput, ListDirectoryOutput, ListStoreOutput, STATUS_ERR, STATUS_OK,
};
use crate::kv::Kv;
use crate::transport::Transport;

/// Hard wall-clock limit for commands run on behalf of a plugin.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CapabilityGateway {
    plugin_name: String,
    /// Directory handle confining every file operation. Paths resolve
    /// relative to it; traversal and symlinks leaving it fail at the OS
    /// level rather than falling back to an unconfined path.
    root: Dir,
    data_dir: PathBuf,
    cache: Kv,
    store: Kv,
    allowed_commands: Arc<Vec<String>>,
    transport: Arc<dyn Transport>,
}

impl CapabilityGateway {
    /// Build the gateway for one plugin: open (creating if needed) its
    /// data directory under `data_root` and derive its KV namespaces from
    /// the shared cache and store.
    pub fn new(
        plugin_name: &str,
        data_root: &Path,
        cache: &Kv,
        store: &Kv,
        allowed_commands: Arc<Vec<String>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PluginError> {
        let data_dir = data_root.join(plugin_name);
        crate::paths::ensure_dir(&data_dir).map_err(|e| {
            PluginError::Load(format!(
                "failed to create plugin data dir '{}': {e}",
                data_dir.display()
            ))
        })?;
        let root = Dir::open_ambient_dir(&data_dir, ambient_authority()).map_err(|e| {
            PluginError::Load(format!(
                "failed to open plugin data dir '{}': {e}",
                data_dir.display()
            ))
        })?;
        Ok(Self {
            plugin_name: plugin_name.to_string(),
            root,
            data_dir,
            cache: cache.namespace(plugin_name),
            store: store.namespace(plugin_name),
            allowed_commands,
            transport,
        })
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Present a plugin-supplied path as relative to the root.
    ///
    /// A single leading separator is stripped; everything else is left to
    /// the directory handle, which resolves `..` and symlinks inside the
    /// sandbox and fails any step that would leave it.
    fn normalize(path: &str) -> &str {
        let path = path.strip_prefix('/').unwrap_or(path);
        if path.is_empty() { "." } else { path }
    }

    /// Read a file inside the root. Returns the contents as a string, or
    /// an empty string on any error.
    pub fn read_file(&self, path: &str) -> String {
        match self.root.read(Self::normalize(path)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(
                    plugin = %self.plugin_name,
                    requested_path = %path,
                    data_dir = %self.data_dir.display(),
                    error = %e,
                    "Plugin file read denied"
                );
                String::new()
            }
        }
    }

    /// List entry base names of a directory inside the root.
    pub fn list_directory(&self, path: &str) -> ListDirectoryOutput {
        let read = self.root.read_dir(Self::normalize(path));
        match read {
            Ok(entries) => {
                let mut files = Vec::new();
                for entry in entries {
                    match entry {
                        Ok(entry) => {
                            files.push(entry.file_name().to_string_lossy().into_owned());
                        }
                        Err(e) => {
                            warn!(
                                plugin = %self.plugin_name,
                                requested_path = %path,
                                error = %e,
                                "Failed to read directory entry"
                            );
                        }
                    }
                }
                ListDirectoryOutput {
                    success: true,
                    files,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    plugin = %self.plugin_name,
                    requested_path = %path,
                    data_dir = %self.data_dir.display(),
                    error = %e,
                    "Plugin directory listing denied"
                );
                ListDirectoryOutput {
                    success: false,
                    files: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Send an image file from inside the root to a recipient.
    ///
    /// The path is resolved through the root before any bytes move, so a
    /// confinement miss fails here and never reaches the transport.
    pub async fn send_image(&self, recipient: &str, path: &str) -> u32 {
        let normalized = Self::normalize(path);
        if let Err(e) = self.root.metadata(normalized) {
            warn!(
                plugin = %self.plugin_name,
                requested_path = %path,
                data_dir = %self.data_dir.display(),
                error = %e,
                "Plugin image send denied"
            );
            return STATUS_ERR;
        }
        let bytes = match self.root.read(normalized) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    plugin = %self.plugin_name,
                    requested_path = %path,
                    error = %e,
                    "Failed to read image for plugin"
                );
                return STATUS_ERR;
            }
        };
        match self.transport.send_image(recipient, bytes, None).await {
            Ok(()) => STATUS_OK,
            Err(e) => {
                warn!(
                    plugin = %self.plugin_name,
                    recipient = %recipient,
                    error = %e,
                    "Plugin image send failed"
                );
                STATUS_ERR
            }
        }
    }

    pub async fn get_cache(&self, key: &str) -> KvGetOutput {
        Self::kv_get(&self.cache, &self.plugin_name, key).await
    }

    pub async fn set_cache(&self, key: &str, value: &str) -> u32 {
        Self::kv_set(&self.cache, &self.plugin_name, key, value).await
    }

    pub async fn get_store(&self, key: &str) -> KvGetOutput {
        Self::kv_get(&self.store, &self.plugin_name, key).await
    }

    pub async fn set_store(&self, key: &str, value: &str) -> u32 {
        Self::kv_set(&self.store, &self.plugin_name, key, value).await
    }

    /// List store keys under a prefix, scoped to this plugin's namespace.
    pub async fn list_store(&self, prefix: &str) -> ListStoreOutput {
        match self.store.list(prefix.as_bytes()).await {
            Ok(keys) => ListStoreOutput {
                success: true,
                keys: keys
                    .into_iter()
                    .map(|k| String::from_utf8_lossy(&k).into_owned())
                    .collect(),
            },
            Err(e) => {
                warn!(plugin = %self.plugin_name, error = %e, "Plugin store listing failed");
                ListStoreOutput {
                    success: false,
                    keys: Vec::new(),
                }
            }
        }
    }

    async fn kv_get(kv: &Kv, plugin: &str, key: &str) -> KvGetOutput {
        match kv.get(key.as_bytes()).await {
            Ok(Some(value)) => KvGetOutput {
                success: true,
                data: Some(String::from_utf8_lossy(&value).into_owned()),
            },
            Ok(None) => KvGetOutput {
                success: false,
                data: None,
            },
            Err(e) => {
                warn!(plugin = %plugin, error = %e, "Plugin kv read failed");
                KvGetOutput {
                    success: false,
                    data: None,
                }
            }
        }
    }

    async fn kv_set(kv: &Kv, plugin: &str, key: &str, value: &str) -> u32 {
        match kv.put(key.as_bytes(), value.as_bytes()).await {
            Ok(()) => STATUS_OK,
            Err(e) => {
                warn!(plugin = %plugin, error = %e, "Plugin kv write failed");
                STATUS_ERR
            }
        }
    }

    /// Run an allow-listed command with the given stdin.
    ///
    /// The allow-list matches the first whitespace-delimited token only;
    /// arguments are not inspected and no shell is involved. The child is
    /// bounded by [`EXEC_TIMEOUT`] and killed when it expires.
    pub async fn exec_command(&self, command: &str, stdin: &str) -> ExecOutput {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return ExecOutput::failure("empty command");
        };
        if !self.allowed_commands.iter().any(|c| c == program) {
            warn!(
                plugin = %self.plugin_name,
                command = %program,
                allowed_list = ?self.allowed_commands,
                "Plugin exec denied"
            );
            return ExecOutput::failure(format!("command '{program}' is not in allowed list"));
        }

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(plugin = %self.plugin_name, command = %program, error = %e, "Failed to spawn command");
                return ExecOutput::failure(format!("failed to spawn '{program}': {e}"));
            }
        };

        if let Some(mut pipe) = child.stdin.take() {
            if let Err(e) = pipe.write_all(stdin.as_bytes()).await {
                warn!(plugin = %self.plugin_name, command = %program, error = %e, "Failed to write command stdin");
            }
            // Dropping the pipe closes the child's stdin.
        }

        match tokio::time::timeout(EXEC_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                error: None,
            },
            Ok(Err(e)) => {
                warn!(plugin = %self.plugin_name, command = %program, error = %e, "Command wait failed");
                ExecOutput::failure(format!("failed to run '{program}': {e}"))
            }
            Err(_) => {
                // Timeout dropped the child future; kill_on_drop reaps it.
                warn!(
                    plugin = %self.plugin_name,
                    command = %program,
                    timeout_secs = EXEC_TIMEOUT.as_secs(),
                    "Command timed out"
                );
                ExecOutput::failure(format!(
                    "command '{program}' timed out after {}s",
                    EXEC_TIMEOUT.as_secs()
                ))
            }
        }
    }
}
