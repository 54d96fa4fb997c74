use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use faceoverlay_core::shared::constants::{DEFAULT_CONFIDENCE, DEFAULT_TICK_INTERVAL};

/// Persisted user preferences. Changes take effect with the next file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Detection confidence threshold in percent.
    pub confidence: u32,
    pub tick_interval_ms: u64,
    /// Checked for model files before the download cache.
    pub model_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            confidence: (DEFAULT_CONFIDENCE * 100.0).round() as u32,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            model_dir: None,
        }
    }
}

impl Settings {
    pub fn confidence_threshold(&self) -> f64 {
        f64::from(self.confidence.min(100)) / 100.0
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceOverlay").join("settings.json"))
    }

    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    /// Missing or unreadable files yield the defaults.
    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    log::warn!("Could not save settings to {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!("Could not serialize settings: {e}"),
        }
    }
}
