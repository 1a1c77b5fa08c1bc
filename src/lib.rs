//! Card Fraud Risk Model Library
//!
//! Feature engineering, random forest training and cost-aware threshold
//! selection for card transaction fraud. Raw transactions flow through
//! temporal, geographic and risk features into a frozen preprocessor and a
//! bagged tree classifier, whose scores are turned into decision thresholds
//! and evaluated on a held-out partition.

pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod partition;
pub mod pipeline;
pub mod preprocess;
pub mod synth;
pub mod threshold;
pub mod types;

pub use config::AppConfig;
pub use error::{LeakageError, Rejection, ThresholdError, ValidationError};
pub use features::{FeatureAssembler, GeoDistanceCalculator, RiskEncoder, TemporalFeatureBuilder};
pub use metrics::{ClassificationReport, Evaluator};
pub use models::FraudClassifier;
pub use pipeline::{FittedArtifacts, PipelineReport, TrainingPipeline};
pub use preprocess::Preprocessor;
pub use threshold::{CostModel, ThresholdOptimizer, ThresholdPolicy};
pub use types::{Feature, FeatureVector, Transaction};
