//! Configuration file loading and root folder resolution
//!
//! Every Vox service resolves its settings in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is not an error; the service starts on defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the root folder for all services
pub const ROOT_FOLDER_ENV: &str = "VOX_ROOT_FOLDER";

/// Logging section shared by every service TOML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the root folder holding uploads, models and the database
///
/// `toml_value` is the `root_folder` key of the already-loaded TOML file.
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Locate the TOML file for a service, if one exists
///
/// Linux checks `~/.config/vox/<module>.toml` then `/etc/vox/<module>.toml`;
/// other platforms only check the per-user config directory.
pub fn find_config_file(module_name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", module_name);

    let user_config = dirs::config_dir().map(|d| d.join("vox").join(&file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/vox").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a TOML config file, falling back to defaults when the file is absent
///
/// A file that exists but fails to parse is a hard error.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/vox (or /var/lib/vox for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("vox"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/vox"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/vox
        dirs::data_dir()
            .map(|d| d.join("vox"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/vox"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\vox
        dirs::data_local_dir()
            .map(|d| d.join("vox"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\vox"))
    } else {
        PathBuf::from("./vox_data")
    }
}
