//! Configuration file support.
//!
//! Allows loading pipeline configurations from TOML files for reproducibility.

use crate::data::DataConfig;
use crate::error::{RegimeError, Result};
use crate::export::ExportConfig;
use crate::features::FeatureConfig;
use crate::hmm::HmmConfig;
use crate::pipeline::EngineConfig;
use crate::regime::RuleConfig;
use crate::strategy::{ExposureLevel, ExposureTiers};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete pipeline configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineFileConfig {
    /// Input data settings.
    #[serde(default)]
    pub data: DataSettings,
    /// Feature extraction.
    #[serde(default)]
    pub features: FeatureConfig,
    /// Rule classifier thresholds.
    #[serde(default)]
    pub rules: RuleConfig,
    /// HMM fitting and exposure tiers.
    #[serde(default)]
    pub hmm: HmmSettings,
    /// Output settings.
    #[serde(default)]
    pub output: OutputSettings,
}

/// Data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to the OHLCV CSV file.
    pub path: Option<String>,
    /// Date format in CSV; auto-detected when absent.
    pub date_format: Option<String>,
    /// CSV delimiter; auto-detected when absent.
    pub delimiter: Option<char>,
    /// Skip unparseable rows instead of failing.
    #[serde(default = "default_true")]
    pub skip_invalid: bool,
    /// Read closes from an `Adj Close` column when present.
    #[serde(default)]
    pub use_adjusted_close: bool,
}

fn default_true() -> bool { true }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            path: None,
            date_format: None,
            delimiter: None,
            skip_invalid: true,
            use_adjusted_close: false,
        }
    }
}

/// HMM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmmSettings {
    #[serde(flatten)]
    pub model: HmmConfig,
    /// Exposure per Sharpe rank, best first; one entry per state.
    #[serde(default = "default_tiers")]
    pub exposure_tiers: Vec<ExposureLevel>,
}

fn default_tiers() -> Vec<ExposureLevel> {
    ExposureTiers::default().levels().to_vec()
}

impl Default for HmmSettings {
    fn default() -> Self {
        Self {
            model: HmmConfig::default(),
            exposure_tiers: default_tiers(),
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Directory receiving the result files.
    #[serde(default = "default_output_dir")]
    pub dir: String,
    /// Date format for exported dates.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Fixed decimal places for exported numbers.
    #[serde(default)]
    pub precision: Option<usize>,
}

fn default_output_dir() -> String { "results".to_string() }
fn default_date_format() -> String { "%Y-%m-%d".to_string() }

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            date_format: default_date_format(),
            precision: None,
        }
    }
}

impl EngineFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: EngineFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RegimeError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Convert to a validated [`EngineConfig`].
    pub fn to_engine_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig {
            features: self.features.clone(),
            rules: self.rules.clone(),
            hmm: self.hmm.model.clone(),
            tiers: ExposureTiers::new(self.hmm.exposure_tiers.clone())?,
        };
        config.validate()?;
        Ok(config)
    }

    /// CSV loading options.
    pub fn data_config(&self) -> Result<DataConfig> {
        let delimiter = match self.data.delimiter {
            Some(c) if c.is_ascii() => Some(c as u8),
            Some(c) => {
                return Err(RegimeError::ConfigError(format!(
                    "delimiter must be an ASCII character, got '{}'",
                    c
                )))
            }
            None => None,
        };

        Ok(DataConfig {
            date_format: self.data.date_format.clone(),
            delimiter,
            skip_invalid: self.data.skip_invalid,
            use_adjusted_close: self.data.use_adjusted_close,
            ..Default::default()
        })
    }

    /// Path of the input file.
    pub fn data_path(&self) -> Result<PathBuf> {
        self.data
            .path
            .as_ref()
            .map(PathBuf::from)
            .ok_or_else(|| RegimeError::ConfigError("[data] path is required".to_string()))
    }

    pub fn export_config(&self) -> ExportConfig {
        ExportConfig {
            date_format: self.output.date_format.clone(),
            precision: self.output.precision,
            ..Default::default()
        }
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Regime engine configuration file

[data]
path = "data/index_daily.csv"
# date_format = "%Y-%m-%d"
# delimiter = ","
skip_invalid = true
use_adjusted_close = false   # read closes from an "Adj Close" column when present

[features]
volatility_window = 20
periods_per_year = 252.0

[rules]
low_vol_quantile = 0.33
high_vol_quantile = 0.66
low_risk_drawdown = -0.05    # Low volatility counts as Low Risk above this drawdown
high_risk_drawdown = -0.15   # High volatility counts as High Risk below this drawdown

[hmm]
n_states = 3
max_iter = 1000
tol = 0.01
min_covar = 0.001
seed = 42
n_restarts = 1
exposure_tiers = ["full", "half", "flat"]   # best Sharpe first

[output]
dir = "results"
date_format = "%Y-%m-%d"
# precision = 6
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = EngineFileConfig::default();
        assert_eq!(config.hmm.model.n_states, 3);
        assert_eq!(config.features.volatility_window, 20);
        assert_eq!(config.output.dir, "results");
        assert!(config.to_engine_config().is_ok());
    }

    #[test]
    fn test_load_partial_config() {
        let toml_content = r#"
[data]
path = "prices.csv"
delimiter = ";"
use_adjusted_close = true

[hmm]
n_states = 2
seed = 7
exposure_tiers = ["full", "flat"]

[rules]
high_risk_drawdown = -0.2
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = EngineFileConfig::load(file.path()).unwrap();
        assert_eq!(config.data_path().unwrap(), PathBuf::from("prices.csv"));
        let data_config = config.data_config().unwrap();
        assert_eq!(data_config.delimiter, Some(b';'));
        assert!(data_config.use_adjusted_close);
        assert_eq!(config.hmm.model.n_states, 2);
        assert_eq!(config.hmm.model.seed, 7);
        assert_eq!(config.hmm.model.max_iter, 1000);
        assert_eq!(config.rules.high_risk_drawdown, -0.2);
        assert_eq!(config.rules.low_risk_drawdown, -0.05);

        let engine = config.to_engine_config().unwrap();
        assert_eq!(engine.tiers.len(), 2);
    }

    #[test]
    fn test_tier_mismatch_rejected() {
        let mut config = EngineFileConfig::default();
        config.hmm.model.n_states = 4;
        assert!(matches!(
            config.to_engine_config(),
            Err(RegimeError::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_data_path() {
        assert!(EngineFileConfig::default().data_path().is_err());
    }

    #[test]
    fn test_save_config() {
        let config = EngineFileConfig::default();
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        // Verify we can load it back
        let loaded = EngineFileConfig::load(file.path()).unwrap();
        assert_eq!(loaded.hmm.model.seed, config.hmm.model.seed);
        assert_eq!(loaded.hmm.exposure_tiers, config.hmm.exposure_tiers);
    }

    #[test]
    fn test_example_config_parses() {
        let example = EngineFileConfig::example();
        assert!(example.contains("[hmm]"));
        let parsed: EngineFileConfig = toml::from_str(&example).unwrap();
        assert!(parsed.to_engine_config().is_ok());
        assert_eq!(parsed.hmm.exposure_tiers.len(), 3);
    }
}
