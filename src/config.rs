//! Merge configuration.
//!
//! Every field has a built-in default, so an empty TOML file (or no file)
//! is a valid configuration. Command-line flags override file values.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channels::{DropProfile, Vocabulary};
use crate::dedup::DedupSettings;
use crate::hash::DEFAULT_CHUNK_SIZE;
use crate::types::{MergeError, Result};

/// Settings for one batch run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Known channel list to probe for
    pub vocabulary: Vocabulary,

    /// Reference rate override (Hz); the first channel's rate when absent
    pub resample_rate: Option<f64>,

    pub drop_profile: DropProfile,

    /// Fill value for samples missing at the start of a short channel
    pub pad_value: f64,

    /// Any channel read failure fails the session instead of skipping it
    pub strict_reads: bool,

    /// Directory for merged files; next to each session when absent
    pub output_dir: Option<PathBuf>,

    /// Ledger CSV path; a timestamped file under the input root when absent
    pub ledger_path: Option<PathBuf>,

    pub hash_chunk_size: usize,

    pub dedup: DedupConfig,
    pub battery: BatteryConfig,
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            resample_rate: None,
            drop_profile: DropProfile::default(),
            pad_value: 0.0,
            strict_reads: false,
            output_dir: None,
            ledger_path: None,
            hash_chunk_size: DEFAULT_CHUNK_SIZE,
            dedup: DedupConfig::default(),
            battery: BatteryConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Duplicate detector tolerances, in seconds of reference signal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    pub enabled: bool,
    pub window_seconds: f64,
    pub offset_seconds: f64,
    /// Rate used to turn the seconds above into sample counts
    pub reference_rate: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 5.0,
            offset_seconds: 5.0,
            reference_rate: 256.0,
        }
    }
}

impl DedupConfig {
    pub fn settings(&self) -> DedupSettings {
        DedupSettings::from_seconds(self.window_seconds, self.offset_seconds, self.reference_rate)
    }
}

/// Battery grading of the end of a recording.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    /// Trailing span averaged (s)
    pub window_seconds: f64,
    /// Mean voltage at or above this is `ok`
    pub low_volts: f64,
    /// Mean voltage at or above this (and below `low_volts`) is `low`
    pub depleted_volts: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60.0,
            low_volts: 3.6,
            depleted_volts: 3.4,
        }
    }
}

/// External enrichment executables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Derives heart-rate channel files
    pub reparse: Option<PathBuf>,
    /// Derives cleaned EEG channel files
    pub clean: Option<PathBuf>,
    pub timeout_seconds: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            reparse: None,
            clean: None,
            timeout_seconds: 600,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    /// Loads a configuration file; absent keys take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MergeError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&text)
            .map_err(|e| MergeError::Config(format!("'{}': {}", path.display(), e)))
    }

    /// Parses and checks a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| MergeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = self.resample_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(MergeError::Config(format!(
                    "resample_rate must be positive, got {}",
                    rate
                )));
            }
        }
        if !self.pad_value.is_finite() {
            return Err(MergeError::Config("pad_value must be finite".to_string()));
        }
        if self.hash_chunk_size == 0 {
            return Err(MergeError::Config("hash_chunk_size must be non-zero".to_string()));
        }
        if !(self.dedup.reference_rate > 0.0)
            || self.dedup.window_seconds < 0.0
            || self.dedup.offset_seconds < 0.0
        {
            return Err(MergeError::Config(
                "dedup seconds must be non-negative and reference_rate positive".to_string(),
            ));
        }
        if self.battery.depleted_volts > self.battery.low_volts {
            return Err(MergeError::Config(
                "battery.depleted_volts must not exceed battery.low_volts".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.vocabulary, Vocabulary::V2);
        assert_eq!(config.drop_profile, DropProfile::None);
        assert_eq!(config.tools.timeout(), Duration::from_secs(600));
        assert_eq!(config.dedup.settings().window_samples, 1280);
        assert_eq!(config.dedup.settings().offset_samples, 1280);
    }

    #[test]
    fn test_partial_document() {
        let config = Config::from_toml(
            r#"
            resample_rate = 128.0
            drop_profile = "eeg-battery"
            vocabulary = "v1"
            strict_reads = true

            [dedup]
            window_seconds = 2.0

            [tools]
            clean = "/opt/zmax/clean"
            timeout_seconds = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.resample_rate, Some(128.0));
        assert_eq!(config.drop_profile, DropProfile::EegBattery);
        assert_eq!(config.vocabulary, Vocabulary::V1);
        assert!(config.strict_reads);
        assert_eq!(config.dedup.settings().window_samples, 512);
        assert_eq!(config.dedup.offset_seconds, 5.0);
        assert_eq!(config.tools.clean, Some(PathBuf::from("/opt/zmax/clean")));
        assert_eq!(config.tools.reparse, None);
        assert_eq!(config.battery, BatteryConfig::default());
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_toml("resample_rate = -1.0").is_err());
        assert!(Config::from_toml("hash_chunk_size = 0").is_err());
        assert!(Config::from_toml("no_such_key = 1").is_err());
        assert!(Config::from_toml("[battery]\nlow_volts = 3.0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merge.toml");
        std::fs::write(&path, "pad_value = -1.5\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().pad_value, -1.5);
        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(MergeError::Config(_))
        ));
    }
}
