use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const BULKOPS_DIR: &str = ".bulkops";
pub const CONFIG_FILE: &str = ".bulkops/config.yaml";
pub const CATALOG_FILE: &str = ".bulkops/catalog.yaml";
pub const ACTIONS_DIR: &str = ".bulkops/actions";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn bulkops_dir(root: &Path) -> PathBuf {
    root.join(BULKOPS_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Where `config init` places placeholder action scripts.
pub fn actions_dir(root: &Path) -> PathBuf {
    root.join(ACTIONS_DIR)
}

/// Resolve a configured path relative to the project root unless it is
/// already absolute.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}
