//! Named feature columns and the per-transaction feature vector

use serde::{Deserialize, Serialize};

/// Model input columns, in the fixed order the rest of the pipeline relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Amount,
    Distance,
    Population,
    Age,
    Hour,
    DayOfWeek,
    Month,
    TransFreqHour,
    CategoryRisk,
    AmountCategoryRisk,
    JobRisk,
    AmountJobRisk,
}

impl Feature {
    pub const COUNT: usize = 12;

    /// All features in column order.
    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::Amount,
        Feature::Distance,
        Feature::Population,
        Feature::Age,
        Feature::Hour,
        Feature::DayOfWeek,
        Feature::Month,
        Feature::TransFreqHour,
        Feature::CategoryRisk,
        Feature::AmountCategoryRisk,
        Feature::JobRisk,
        Feature::AmountJobRisk,
    ];

    /// Columns that are one-hot encoded rather than standardized.
    pub const CATEGORICAL: [Feature; 3] = [Feature::Hour, Feature::DayOfWeek, Feature::Month];

    pub fn name(self) -> &'static str {
        match self {
            Feature::Amount => "amount",
            Feature::Distance => "distance",
            Feature::Population => "population",
            Feature::Age => "age",
            Feature::Hour => "hour",
            Feature::DayOfWeek => "day_of_week",
            Feature::Month => "month",
            Feature::TransFreqHour => "trans_freq_hour",
            Feature::CategoryRisk => "category_risk",
            Feature::AmountCategoryRisk => "amount*category_risk",
            Feature::JobRisk => "job_risk",
            Feature::AmountJobRisk => "amount*job_risk",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_categorical(self) -> bool {
        Self::CATEGORICAL.contains(&self)
    }

    /// Standardized columns, in column order.
    pub fn numeric() -> impl Iterator<Item = Feature> {
        Self::ALL.into_iter().filter(|f| !f.is_categorical())
    }
}

/// Fixed-order feature values for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; Feature::COUNT]);

impl FeatureVector {
    pub fn from_values(values: [f64; Feature::COUNT]) -> Self {
        Self(values)
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature.index()]
    }

    pub fn values(&self) -> &[f64; Feature::COUNT] {
        &self.0
    }

    /// `(name, value)` pairs in column order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        Feature::ALL.iter().map(move |f| (f.name(), self.get(*f)))
    }
}

/// A feature vector tied back to the transaction it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledFeatures {
    pub transaction_id: String,
    pub is_fraud: bool,
    pub features: FeatureVector,
}
