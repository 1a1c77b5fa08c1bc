//! Type definitions for the fraud model pipeline

pub mod features;
pub mod transaction;

pub use features::{Feature, FeatureVector, LabeledFeatures};
pub use transaction::{Coordinates, RawTransaction, Transaction};
