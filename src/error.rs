//! Error taxonomy for the fraud model pipeline.
//!
//! Record-level problems are [`ValidationError`]s: the record is rejected and
//! the batch continues. [`LeakageError`] is a contract violation and aborts
//! the run. [`ThresholdError`] only empties the result of one policy.

use serde::Serialize;
use thiserror::Error;

/// Problems with a single transaction record.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("malformed timestamp {value:?}")]
    MalformedTimestamp { value: String },

    #[error("malformed date of birth {value:?}")]
    MalformedDate { value: String },

    #[error("{field} coordinates out of range: lat={lat}, lon={lon}")]
    CoordinateOutOfRange {
        field: &'static str,
        lat: f64,
        lon: f64,
    },

    #[error("missing required field {field}")]
    MissingField { field: &'static str },

    #[error("non-finite value for {field}")]
    NonFinite { field: &'static str },

    #[error("label must be 0 or 1, got {value}")]
    InvalidLabel { value: i64 },

    #[error("unparseable row at line {line}: {message}")]
    Unparseable { line: u64, message: String },
}

/// A rejected record together with the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub transaction_id: String,
    pub error: ValidationError,
}

impl Rejection {
    pub fn new(transaction_id: impl Into<String>, error: ValidationError) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            error,
        }
    }
}

/// Raised when a statistic is fit on rows that belong to an evaluation partition.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{stage} fit on {overlapping} evaluation rows (first: {first_id})")]
pub struct LeakageError {
    pub stage: &'static str,
    pub overlapping: usize,
    pub first_id: String,
}

/// Reasons a threshold policy can produce no threshold.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdError {
    #[error("no threshold with |precision - recall| <= {tolerance}")]
    NoEqualPoint { tolerance: f64 },

    #[error("labels and scores are empty")]
    EmptyInput,

    #[error("labels ({labels}) and scores ({scores}) differ in length")]
    LengthMismatch { labels: usize, scores: usize },
}
