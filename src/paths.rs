//! Application paths: settings file, log file and canvas snapshot directory.
//!
//! **Used by**: main.rs (logger + settings bootstrap), settings.rs, canvas persistence.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Application directory name under the platform config/data roots
const APP_DIR: &str = "emigraph";

/// Files whose presence in the working directory makes it the config root
const LOCAL_MARKERS: [&str; 3] = ["emigraph.json", "emigraph.log", "canvas"];

/// Configuration for overriding default application paths
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (EMIGRAPH_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| {
            std::env::var("EMIGRAPH_CONFIG_DIR")
                .ok()
                .map(PathBuf::from)
        });

        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. EMIGRAPH_CONFIG_DIR environment variable
/// 3. Local folder IF any marker exists (emigraph.json, emigraph.log, canvas/)
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/emigraph/{name}
/// - macOS: ~/Library/Application Support/emigraph/{name}
/// - Windows: %APPDATA%\emigraph\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Get path to a data file (logs, snapshots)
///
/// Same priority as [`config_file`], falling back to the platform data directory:
/// - Linux: ~/.local/share/emigraph/{name}
/// - macOS: ~/Library/Application Support/emigraph/{name}
/// - Windows: %APPDATA%\emigraph\{name}
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    get_data_dir(config).join(name)
}

/// Directory holding one canvas snapshot per installation
pub fn canvas_dir(config: &PathConfig) -> PathBuf {
    data_file("canvas", config)
}

/// Ensure that configuration, data and snapshot directories exist
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = get_config_dir(config);
    let data_dir = get_data_dir(config);

    create_if_missing(&config_dir, "config")?;

    // Only create data_dir if it's different from config_dir
    if data_dir != config_dir {
        create_if_missing(&data_dir, "data")?;
    }

    create_if_missing(&canvas_dir(config), "canvas snapshot")
}

fn create_if_missing(dir: &Path, what: &str) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {} directory: {}", what, dir.display()))?;
    }
    Ok(())
}

/// Check if any config marker exists in the given directory
fn has_local_config_files(dir: &Path) -> bool {
    LOCAL_MARKERS.iter().any(|f| dir.join(f).exists())
}

fn local_dir() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .filter(|dir| has_local_config_files(dir))
}

/// Get the configuration directory
fn get_config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    if let Some(dir) = dirs_next::config_dir() {
        return dir.join(APP_DIR);
    }
    PathBuf::from(".")
}

/// Get the data directory
fn get_data_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    if let Some(dir) = dirs_next::data_dir() {
        return dir.join(APP_DIR);
    }
    PathBuf::from(".")
}
