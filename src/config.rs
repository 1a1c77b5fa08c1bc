//! Configuration management for the fraud model training pipeline

use crate::metrics::CostBaseline;
use crate::models::{ClassWeight, ForestParams, MaxFeatures, SplitCriterion, TreeParams};
use anyhow::{ensure, Context, Result};
use chrono::NaiveDate;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub validation: ValidationConfig,
    pub cost: CostConfig,
    pub logging: LoggingConfig,
}

/// Input and output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Transactions CSV
    pub input_path: String,
    /// Where the JSON training report is written
    pub report_path: String,
    /// First day kept (inclusive)
    #[serde(default)]
    pub window_start: Option<NaiveDate>,
    /// First day dropped (exclusive)
    #[serde(default)]
    pub window_end: Option<NaiveDate>,
    /// Trailing window for the per-account transaction count
    #[serde(default = "default_temporal_window_minutes")]
    pub temporal_window_minutes: i64,
}

fn default_temporal_window_minutes() -> i64 {
    60
}

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    #[serde(default)]
    pub max_features: MaxFeatures,
    #[serde(default)]
    pub criterion: SplitCriterion,
    #[serde(default)]
    pub class_weight: ClassWeight,
    pub seed: u64,
}

impl ModelConfig {
    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            tree: TreeParams {
                max_depth: self.max_depth,
                min_samples_leaf: self.min_samples_leaf,
                max_features: self.max_features,
                criterion: self.criterion,
            },
            class_weight: self.class_weight,
            seed: self.seed,
        }
    }
}

/// Hold-out and cross-validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Share of each class held out for the final evaluation
    pub test_fraction: f64,
    /// Seed for the stratified train/test split and the CV folds
    pub split_seed: u64,
    /// Folds for out-of-fold threshold selection; below 2 uses in-sample scores
    pub cv_folds: usize,
    /// Largest |precision - recall| accepted by the equal policy
    #[serde(default = "default_equal_tolerance")]
    pub equal_tolerance: f64,
}

fn default_equal_tolerance() -> f64 {
    0.01
}

/// Misclassification costs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    /// Explicit FN cost; derived from training fraud amounts when unset
    #[serde(default)]
    pub false_negative_cost: Option<f64>,
    /// Added to the mean fraud amount when deriving the FN cost
    pub false_negative_penalty: f64,
    pub false_positive_cost: f64,
    /// Points in the threshold grid over [0, 1]
    pub grid_resolution: usize,
    #[serde(default)]
    pub baseline: CostBaseline,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, with `FRAUD__SECTION__KEY`
    /// environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("FRAUD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path.as_ref().display()))?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        let data = &self.data;
        ensure!(
            data.temporal_window_minutes > 0,
            "data.temporal_window_minutes must be positive, got {}",
            data.temporal_window_minutes
        );
        if let (Some(start), Some(end)) = (data.window_start, data.window_end) {
            ensure!(start < end, "data.window_start {start} must be before data.window_end {end}");
        }

        let model = &self.model;
        ensure!(model.n_trees >= 1, "model.n_trees must be at least 1");
        ensure!(model.max_depth >= 1, "model.max_depth must be at least 1");
        ensure!(model.min_samples_leaf >= 1, "model.min_samples_leaf must be at least 1");
        if let MaxFeatures::Fraction(f) = model.max_features {
            ensure!(f > 0.0 && f <= 1.0, "model.max_features fraction must be in (0, 1], got {f}");
        }

        let validation = &self.validation;
        ensure!(
            validation.test_fraction > 0.0 && validation.test_fraction < 1.0,
            "validation.test_fraction must be in (0, 1), got {}",
            validation.test_fraction
        );
        ensure!(
            validation.equal_tolerance.is_finite() && validation.equal_tolerance >= 0.0,
            "validation.equal_tolerance must be a non-negative number, got {}",
            validation.equal_tolerance
        );

        let cost = &self.cost;
        if let Some(fn_cost) = cost.false_negative_cost {
            ensure!(
                fn_cost.is_finite() && fn_cost >= 0.0,
                "cost.false_negative_cost must be non-negative, got {fn_cost}"
            );
        }
        ensure!(
            cost.false_negative_penalty.is_finite() && cost.false_negative_penalty >= 0.0,
            "cost.false_negative_penalty must be non-negative, got {}",
            cost.false_negative_penalty
        );
        ensure!(
            cost.false_positive_cost.is_finite() && cost.false_positive_cost >= 0.0,
            "cost.false_positive_cost must be non-negative, got {}",
            cost.false_positive_cost
        );
        ensure!(
            cost.grid_resolution >= 2,
            "cost.grid_resolution must be at least 2, got {}",
            cost.grid_resolution
        );

        ensure!(
            matches!(self.logging.format.as_str(), "json" | "pretty"),
            "logging.format must be json or pretty, got {}",
            self.logging.format
        );
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig {
                input_path: "data/transactions.csv".to_string(),
                report_path: "reports/training_report.json".to_string(),
                window_start: NaiveDate::from_ymd_opt(2019, 1, 1),
                window_end: NaiveDate::from_ymd_opt(2020, 1, 1),
                temporal_window_minutes: default_temporal_window_minutes(),
            },
            model: ModelConfig {
                n_trees: 100,
                max_depth: 10,
                min_samples_leaf: 25,
                max_features: MaxFeatures::Sqrt,
                criterion: SplitCriterion::Gini,
                class_weight: ClassWeight::Balanced,
                seed: 100,
            },
            validation: ValidationConfig {
                test_fraction: 0.2,
                split_seed: 100,
                cv_folds: 5,
                equal_tolerance: default_equal_tolerance(),
            },
            cost: CostConfig {
                false_negative_cost: None,
                false_negative_penalty: 10.0,
                false_positive_cost: 10.0,
                grid_resolution: 200,
                baseline: CostBaseline::FlagNothing,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.model.forest_params(), ForestParams::default());
        assert_eq!(config.validation.cv_folds, 5);
        assert_eq!(config.cost.grid_resolution, 200);
        assert_eq!(config.cost.false_negative_cost, None);
        assert_eq!(config.data.window_start, NaiveDate::from_ymd_opt(2019, 1, 1));
    }

    #[test]
    fn test_shipped_file_matches_default() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.toml");
        let loaded = AppConfig::load_from_path(path).unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_settings_rejected() {
        let mut config = AppConfig::default();
        config.validation.test_fraction = 0.0;
        assert!(config.validate().is_err());
        config.validation.test_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cost.grid_resolution = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("grid_resolution"));

        let mut config = AppConfig::default();
        config.model.max_features = MaxFeatures::Fraction(1.5);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.data.window_end = config.data.window_start;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_rejected_on_load() {
        let shipped = std::fs::read_to_string(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/config/config.toml"
        ))
        .unwrap();
        let broken = shipped.replace("test_fraction = 0.2", "test_fraction = 1.5");
        assert_ne!(broken, shipped);

        let path = std::env::temp_dir().join(format!("fraud_config_{}.toml", std::process::id()));
        std::fs::write(&path, broken).unwrap();
        let result = AppConfig::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("test_fraction"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load_from_path("does/not/exist.toml").is_err());
    }
}
