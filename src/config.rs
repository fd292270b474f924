// Scanner configuration
//
// Persistent settings, loaded from JSON. Missing fields take their defaults.

use crate::capture::LiveConstraints;
use crate::decode::EngineKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Live sampling cadence in milliseconds
    pub sample_interval_ms: u64,

    /// Decoder implementation
    pub engine: EngineKind,

    /// Camera preferences for live scans
    pub live: LiveConstraints,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 500,
            engine: EngineKind::default(),
            live: LiveConstraints::default(),
        }
    }
}

impl ScanConfig {
    /// Default location: `<config dir>/qr-scan/config.json`
    pub fn file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("qr-scan").join("config.json"))
    }

    /// Load from `path`, or from the default location when `None`.
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(p),
            None => match Self::file_path() {
                Some(p) if p.exists() => Self::load_from(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ScanConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Save settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sampling interval, clamped to at least 10 ms.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Facing;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ScanConfig = serde_json::from_str(r#"{"engine":"rqrr","live":{"device":2}}"#).unwrap();
        assert_eq!(cfg.engine, EngineKind::Rqrr);
        assert_eq!(cfg.sample_interval_ms, 500);
        assert_eq!(cfg.live.device, Some(2));
        assert_eq!(cfg.live.width, 1280);
        assert_eq!(cfg.live.facing, Some(Facing::Environment));
    }

    #[test]
    fn interval_is_clamped() {
        let cfg = ScanConfig {
            sample_interval_ms: 0,
            ..ScanConfig::default()
        };
        assert_eq!(cfg.sample_interval(), Duration::from_millis(10));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let path = std::env::temp_dir().join(format!("qr-scan-cfg-{}", std::process::id())).join("config.json");
        let cfg = ScanConfig {
            sample_interval_ms: 250,
            engine: EngineKind::Rqrr,
            ..ScanConfig::default()
        };
        cfg.save_to(&path).unwrap();
        assert_eq!(ScanConfig::load(Some(&path)).unwrap(), cfg);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(ScanConfig::load(Some(Path::new("/nonexistent/qr-scan.json"))).is_err());
    }
}
