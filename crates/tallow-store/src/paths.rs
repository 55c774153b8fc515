//! Data directory layout
//!
//! ```text
//! <data dir>/
//!   config.toml        user configuration
//!   identity.key       device signing keypair
//!   transfers/         one record file per transfer id
//!   partial/<id>/data  in-progress receive payloads
//! ```
//!
//! The data dir comes from `DATA_DIR` when set, otherwise the platform
//! data directory.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Resolve the data directory
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tallow")
}

/// Transfer records directory under a data dir
pub fn transfers_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("transfers")
}

/// Partial payload directory under a data dir
pub fn partial_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("partial")
}

/// Config file path under a data dir
pub fn config_file(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Identity keypair path under a data dir
pub fn identity_file(data_dir: &Path) -> PathBuf {
    data_dir.join("identity.key")
}

/// Create the directory skeleton
pub fn ensure_dirs(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(transfers_dir(data_dir))?;
    std::fs::create_dir_all(partial_dir(data_dir))?;
    Ok(())
}
