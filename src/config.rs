//! Editor settings, persisted as JSON next to the other config files

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::core::budget;

pub use crate::paths::{config_file, data_file, ensure_dirs, PathConfig, SETTINGS_FILE};

const GIB: u64 = 1 << 30;

/// Editor settings
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct EditorSettings {
    // Cache & Memory
    pub cache_max_bytes: Option<u64>, // Explicit ceiling; None = derive from available memory
    pub cache_memory_percent: f32,    // % of available memory when deriving (default 25%)
    pub reserve_system_memory_gb: f32, // Reserve for system (default 2.0 GB)
    pub cache_max_items: usize,
    pub cache_debug_checks: bool, // Recompute cache hits and compare (slow)

    // History
    pub history_max_bytes: u64, // Shared by all open movies

    // New movies
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            cache_max_bytes: Some(GIB),
            cache_memory_percent: 25.0,
            reserve_system_memory_gb: 2.0,
            cache_max_items: 2000,
            cache_debug_checks: false,
            history_max_bytes: GIB,
            frame_width: 1920,
            frame_height: 1080,
        }
    }
}

impl EditorSettings {
    /// Load settings from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings: {}", path.display()))
    }

    /// Settings file location for `paths`
    pub fn default_path(paths: &PathConfig) -> std::path::PathBuf {
        config_file(SETTINGS_FILE, paths)
    }

    /// Cache byte ceiling: explicit value, or a share of available memory
    pub fn cache_budget(&self) -> usize {
        match self.cache_max_bytes {
            Some(bytes) => usize::try_from(bytes).unwrap_or(usize::MAX),
            None => {
                let fraction = (self.cache_memory_percent as f64 / 100.0).clamp(0.05, 0.95);
                let limit = budget::system_limit(fraction, self.reserve_system_memory_gb as f64);
                info!(
                    "Cache budget from system memory: {} MB ({}%)",
                    limit / 1024 / 1024,
                    self.cache_memory_percent
                );
                limit
            }
        }
    }

    pub fn history_budget(&self) -> usize {
        usize::try_from(self.history_max_bytes).unwrap_or(usize::MAX)
    }
}
