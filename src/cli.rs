//! CLI argument parsing, validation, and startup helpers.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use crate::allowlist::{AllowListFile, AllowedEntry};
use crate::bot::BotConfig;
use crate::dispatch::DEFAULT_TRIGGER;
use crate::paths;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "sup", about = "Chat bot runtime with sandboxed WASM plugins")]
pub struct Args {
    /// Command trigger prefix
    #[arg(long, default_value = DEFAULT_TRIGGER)]
    pub trigger: String,

    /// Data directory (defaults to the platform-local app directory)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Plugin directory (defaults to <data-root>/plugins)
    #[arg(long)]
    pub plugin_dir: Option<PathBuf>,

    /// Accept messages from this user JID (repeatable)
    #[arg(long = "allow-user")]
    pub allow_users: Vec<String>,

    /// Accept messages from this group JID (repeatable)
    #[arg(long = "allow-group")]
    pub allow_groups: Vec<String>,

    /// Let plugins execute this command base name (repeatable)
    #[arg(long = "allow-command")]
    pub allow_commands: Vec<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the bot on the stdio loop-back transport
    Run,
    /// Invoke a plugin's CLI entry point
    Plugin {
        /// Plugin (handler) name
        name: String,
        /// Arguments passed through to the plugin
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List loaded plugins
    Plugins,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// The data directory the run will use, before the bot creates it.
pub fn resolve_data_dir(args: &Args) -> Option<PathBuf> {
    args.data_dir.clone().or_else(paths::data_root)
}

/// Load `allowlist.json` from the data directory when present.
///
/// A missing file is fine (flags may carry the whole list); a file that
/// exists but does not parse is a startup error.
pub fn load_allow_list_file(data_dir: &Path) -> Result<AllowListFile, String> {
    let path = data_dir.join("allowlist.json");
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AllowListFile::default());
        }
        Err(e) => return Err(format!("failed to read '{}': {e}", path.display())),
    };
    let file: AllowListFile = serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse '{}': {e}", path.display()))?;
    info!(
        path = %path.display(),
        groups = file.groups.len(),
        users = file.users.len(),
        "Loaded allow-list file"
    );
    Ok(file)
}

/// Build the bot configuration from flags merged with the allow-list file.
pub fn build_config(args: &Args, allow_file: AllowListFile) -> BotConfig {
    let mut allowed_groups = allow_file.groups;
    allowed_groups.extend(args.allow_groups.iter().map(AllowedEntry::new));
    let mut allowed_users = allow_file.users;
    allowed_users.extend(args.allow_users.iter().map(AllowedEntry::new));

    BotConfig {
        trigger: args.trigger.clone(),
        data_dir: args.data_dir.clone(),
        plugin_dir: args.plugin_dir.clone(),
        allowed_groups,
        allowed_users,
        allowed_commands: args.allow_commands.clone(),
    }
}
