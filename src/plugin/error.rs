use std::fmt;

#[derive(Debug)]
pub enum PluginError {
    /// Reading or compiling the module failed.
    Load(String),
    /// Instantiation or an exported call failed.
    Runtime(String),
    /// The plugin's declared metadata is invalid.
    InvalidConfig(String),
    /// A host-side caller asked for a capability the plugin does not
    /// have. Denials *toward* a plugin are answered in-band through its
    /// host-function returns and never take this shape.
    Denied(String),
    /// The plugin was closed; no further calls are possible.
    Closed,
    /// Aggregated failures from tearing down multiple plugins.
    Shutdown(Vec<String>),
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::Load(msg) => write!(f, "plugin load error: {msg}"),
            PluginError::Runtime(msg) => write!(f, "plugin runtime error: {msg}"),
            PluginError::InvalidConfig(msg) => write!(f, "plugin config error: {msg}"),
            PluginError::Denied(msg) => write!(f, "plugin capability denied: {msg}"),
            PluginError::Closed => write!(f, "plugin is closed"),
            PluginError::Shutdown(errors) => {
                write!(f, "plugin shutdown errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for PluginError {}
