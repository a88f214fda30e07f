//! Engine settings (persisted as `emigraph.json` in the config dir).
//!
//! Every field has a default, so partial or outdated files still load.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

/// Default process-emission cache lifetime
pub const DEFAULT_PROCESS_TTL_SECS: u64 = 30;
/// Default debounce before a canvas snapshot is written
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Calculation service root, e.g. `http://localhost:8080/api`
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    /// Lifetime of cached process emissions
    pub process_ttl_secs: u64,
    /// Max tolerated gap between attributed emission and material+fuel totals
    pub drift_epsilon: f64,
    pub persist_debounce_ms: u64,
    /// Ask the server to validate the graph during full recalculation
    pub include_validation: bool,
    /// Override for the canvas snapshot directory
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            request_timeout_ms: 15_000,
            process_ttl_secs: DEFAULT_PROCESS_TTL_SECS,
            drift_epsilon: 1e-3,
            persist_debounce_ms: DEFAULT_PERSIST_DEBOUNCE_MS,
            include_validation: true,
            snapshot_dir: None,
        }
    }
}

impl EngineSettings {
    pub fn process_ttl(&self) -> Duration {
        Duration::from_secs(self.process_ttl_secs)
    }

    /// Load settings, falling back to defaults when the file is missing or broken.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Read settings error: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Parse settings error: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Serialize settings error")?;
        std::fs::write(path, json)
            .with_context(|| format!("Write settings error: {}", path.display()))
    }
}
