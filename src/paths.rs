//! Well-known directories under the user's local data root.

use std::io;
use std::path::{Path, PathBuf};

/// Application directory name under the platform data root.
const APP_DIR: &str = "sup";

/// `…/sup` under the user's local data directory.
pub fn data_root() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_DIR))
}

/// Default plugin discovery directory: `…/sup/plugins`.
pub fn default_plugin_dir() -> Option<PathBuf> {
    data_root().map(|d| d.join("plugins"))
}

/// Default confinement-root parent: `…/sup/plugin-data`.
pub fn default_plugin_data_dir() -> Option<PathBuf> {
    data_root().map(|d| d.join("plugin-data"))
}

/// Create a directory and its parents with mode 0755.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(path)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(path)
    }
}
