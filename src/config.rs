use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::emitter::{Blacklist, BlacklistRule};
use crate::error::{LocatorError, Result};

// ─── Cache ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Syncs an entry may sit untouched before eviction
    pub max_age: u32,
    /// Working set size above which the whole cache is dropped after a sync
    pub max_working_set: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            max_working_set: 200,
        }
    }
}

// ─── Output smoothing ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Smoothing {
    /// Report each fused position as computed
    #[default]
    None,
    /// Constant-velocity Kalman filter over fused positions
    Kalman { coordinate_noise_m: f64 },
}

impl Smoothing {
    pub fn kalman() -> Self {
        Smoothing::Kalman {
            coordinate_noise_m: 6.0,
        }
    }
}

// ─── Blacklist ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlacklistConfig {
    /// Rules checked after the built-in table
    pub extra_rules: Vec<BlacklistRule>,
}

impl BlacklistConfig {
    pub fn build(&self) -> Blacklist {
        let mut blacklist = Blacklist::default();
        blacklist.extend(self.extra_rules.iter().cloned());
        blacklist
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reporting_interval_ms: i64,
    pub cache: CacheConfig,
    /// Emitter store file; `None` keeps everything in memory
    pub store_path: Option<PathBuf>,
    pub smoothing: Smoothing,
    pub blacklist: BlacklistConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reporting_interval_ms: 2_700,
            cache: CacheConfig::default(),
            store_path: None,
            smoothing: Smoothing::None,
            blacklist: BlacklistConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Scan intervals subtract 100 ms from a third of the period
        if self.reporting_interval_ms <= 300 {
            return Err(LocatorError::InvalidConfig(format!(
                "reporting_interval_ms must exceed 300, got {}",
                self.reporting_interval_ms
            )));
        }
        if self.cache.max_age == 0 || self.cache.max_working_set == 0 {
            return Err(LocatorError::InvalidConfig(
                "cache limits must be non-zero".to_string(),
            ));
        }
        if let Smoothing::Kalman { coordinate_noise_m } = self.smoothing {
            if !(coordinate_noise_m.is_finite() && coordinate_noise_m > 0.0) {
                return Err(LocatorError::InvalidConfig(format!(
                    "coordinate_noise_m must be positive, got {}",
                    coordinate_noise_m
                )));
            }
        }
        Ok(())
    }

    /// Minimum spacing of WLAN scan requests
    pub fn wlan_scan_interval_ms(&self) -> i64 {
        self.reporting_interval_ms / 3 - 100
    }

    /// Minimum spacing of mobile scan requests
    pub fn mobile_scan_interval_ms(&self) -> i64 {
        self.reporting_interval_ms / 2 - 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.reporting_interval_ms, 2_700);
        assert_eq!(config.wlan_scan_interval_ms(), 800);
        assert_eq!(config.mobile_scan_interval_ms(), 1_250);
        assert_eq!(config.cache.max_age, 30);
        assert_eq!(config.cache.max_working_set, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "smoothing": {"kind": "kalman", "coordinate_noise_m": 4.0},
            "blacklist": {"extra_rules": [{"match": "contains", "pattern": "FerryNet"}]}
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.reporting_interval_ms, 2_700);
        assert_eq!(config.smoothing, Smoothing::Kalman { coordinate_noise_m: 4.0 });

        let blacklist = config.blacklist.build();
        assert_eq!(blacklist.rules().len(), Blacklist::default().rules().len() + 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.reporting_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cache.max_age = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.smoothing = Smoothing::Kalman { coordinate_noise_m: -1.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let path = env::temp_dir().join(format!("rf_locator_config_{}.json", std::process::id()));
        fs::write(&path, r#"{"reporting_interval_ms": 3000, "cache": {"max_age": 10}}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.reporting_interval_ms, 3_000);
        assert_eq!(config.cache.max_age, 10);
        assert_eq!(config.cache.max_working_set, 200);

        fs::remove_file(&path).unwrap();
        assert!(matches!(
            EngineConfig::from_file(&path),
            Err(LocatorError::ConfigIo(_))
        ));
    }
}
