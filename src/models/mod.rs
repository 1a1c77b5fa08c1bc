//! Fraud classification models: decision trees, the bagged forest, the
//! classifier that pairs it with preprocessing, and cross-validation.

pub mod classifier;
pub mod cross_validation;
pub mod forest;
pub mod tree;

pub use classifier::{FeatureImportance, FraudClassifier};
pub use cross_validation::{cross_validate, CrossValidation, CrossValidationError, FoldReport, OutOfFoldScores};
pub use forest::{ClassWeight, ForestParams, RandomForest};
pub use tree::{DecisionTree, MaxFeatures, SplitCriterion, TreeParams};
