//! Standardization of numeric features and one-hot encoding of calendar features.
//!
//! Statistics are fit once on the training partition and frozen. Each
//! categorical column drops its lowest observed level as the reference and
//! gets a trailing `unknown` column for levels first seen after the fit.

use crate::error::LeakageError;
use crate::partition::LeakageGuard;
use crate::types::{Feature, FeatureVector, LabeledFeatures};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Frozen mean and population standard deviation of one numeric feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerStats {
    pub feature: Feature,
    pub mean: f64,
    pub std: f64,
}

impl ScalerStats {
    fn fit(feature: Feature, values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                feature,
                mean: 0.0,
                std: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let mut std = variance.sqrt();
        // constant columns can leave rounding noise in the variance
        if std <= 10.0 * f64::EPSILON * mean.abs().max(1.0) {
            std = 0.0;
        }
        Self { feature, mean, std }
    }

    pub fn transform(&self, x: f64) -> f64 {
        if self.std == 0.0 {
            0.0
        } else {
            (x - self.mean) / self.std
        }
    }

    pub fn inverse(&self, z: f64) -> f64 {
        z * self.std + self.mean
    }
}

/// Levels of one categorical feature as seen during the fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalVocabulary {
    pub feature: Feature,
    /// Dropped level, encoded as all zeros
    pub reference: Option<i64>,
    /// Encoded levels, ascending
    pub levels: Vec<i64>,
}

impl CategoricalVocabulary {
    fn fit(feature: Feature, values: impl Iterator<Item = f64>) -> Self {
        let observed: BTreeSet<i64> = values.map(level_of).collect();
        let mut iter = observed.into_iter();
        let reference = iter.next();
        Self {
            feature,
            reference,
            levels: iter.collect(),
        }
    }

    /// Encoded width: one column per kept level plus the unknown bucket.
    pub fn width(&self) -> usize {
        self.levels.len() + 1
    }

    fn encode_into(&self, value: f64, out: &mut [f64]) {
        let level = level_of(value);
        if Some(level) == self.reference {
            return;
        }
        match self.levels.binary_search(&level) {
            Ok(pos) => out[pos] = 1.0,
            Err(_) => out[self.levels.len()] = 1.0,
        }
    }

    fn column_names(&self) -> impl Iterator<Item = String> + '_ {
        let name = self.feature.name();
        self.levels
            .iter()
            .map(move |level| format!("{name}={level}"))
            .chain(std::iter::once(format!("{name}=unknown")))
    }
}

fn level_of(value: f64) -> i64 {
    value.round() as i64
}

/// Frozen column transform from [`FeatureVector`] to a dense model matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    numeric: Vec<ScalerStats>,
    categorical: Vec<CategoricalVocabulary>,
    columns: Vec<String>,
    sources: Vec<Feature>,
}

impl Preprocessor {
    /// Fit scaling statistics and vocabularies on training rows.
    pub fn fit(rows: &[LabeledFeatures], guard: &LeakageGuard) -> Result<Self, LeakageError> {
        guard.check(
            "preprocessor",
            rows.iter().map(|row| row.transaction_id.as_str()),
        )?;

        let numeric: Vec<ScalerStats> = Feature::numeric()
            .map(|feature| {
                let values: Vec<f64> = rows.iter().map(|r| r.features.get(feature)).collect();
                ScalerStats::fit(feature, &values)
            })
            .collect();

        let categorical: Vec<CategoricalVocabulary> = Feature::CATEGORICAL
            .iter()
            .map(|&feature| {
                CategoricalVocabulary::fit(feature, rows.iter().map(|r| r.features.get(feature)))
            })
            .collect();

        let mut columns = Vec::new();
        let mut sources = Vec::new();
        for stats in &numeric {
            columns.push(stats.feature.name().to_string());
            sources.push(stats.feature);
        }
        for vocab in &categorical {
            for name in vocab.column_names() {
                columns.push(name);
                sources.push(vocab.feature);
            }
        }

        debug!(rows = rows.len(), columns = columns.len(), "Preprocessor fitted");

        Ok(Self {
            numeric,
            categorical,
            columns,
            sources,
        })
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Output column names, numeric first then one-hot blocks.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Named feature that produced output column `column`.
    pub fn source_feature(&self, column: usize) -> Feature {
        self.sources[column]
    }

    pub fn scaler(&self, feature: Feature) -> Option<&ScalerStats> {
        self.numeric.iter().find(|s| s.feature == feature)
    }

    pub fn vocabulary(&self, feature: Feature) -> Option<&CategoricalVocabulary> {
        self.categorical.iter().find(|v| v.feature == feature)
    }

    /// Transform one vector into `out`, which must have `n_columns()` slots.
    pub fn transform_into(&self, vector: &FeatureVector, out: &mut [f64]) {
        out.fill(0.0);
        let mut col = 0;
        for stats in &self.numeric {
            out[col] = stats.transform(vector.get(stats.feature));
            col += 1;
        }
        for vocab in &self.categorical {
            let width = vocab.width();
            vocab.encode_into(vector.get(vocab.feature), &mut out[col..col + width]);
            col += width;
        }
    }

    pub fn transform_one(&self, vector: &FeatureVector) -> Vec<f64> {
        let mut out = vec![0.0; self.n_columns()];
        self.transform_into(vector, &mut out);
        out
    }

    pub fn transform(&self, vectors: &[FeatureVector]) -> Array2<f64> {
        let mut matrix = Array2::zeros((vectors.len(), self.n_columns()));
        for (vector, mut row) in vectors.iter().zip(matrix.rows_mut()) {
            if let Some(slice) = row.as_slice_mut() {
                self.transform_into(vector, slice);
            } else {
                let values = self.transform_one(vector);
                row.iter_mut().zip(values).for_each(|(dst, v)| *dst = v);
            }
        }
        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(id: usize, amount: f64, hour: f64, dow: f64, month: f64) -> LabeledFeatures {
        let mut values = [1.0; Feature::COUNT];
        values[Feature::Amount.index()] = amount;
        values[Feature::Hour.index()] = hour;
        values[Feature::DayOfWeek.index()] = dow;
        values[Feature::Month.index()] = month;
        LabeledFeatures {
            transaction_id: format!("tx_{id}"),
            is_fraud: false,
            features: FeatureVector::from_values(values),
        }
    }

    fn training() -> Vec<LabeledFeatures> {
        vec![
            row(0, 10.0, 0.0, 0.0, 1.0),
            row(1, 20.0, 5.0, 1.0, 1.0),
            row(2, 30.0, 23.0, 1.0, 2.0),
        ]
    }

    #[test]
    fn test_column_contract() {
        let pre = Preprocessor::fit(&training(), &LeakageGuard::unrestricted()).unwrap();

        let names = pre.column_names();
        assert_eq!(&names[..2], &["amount".to_string(), "distance".to_string()]);
        assert_eq!(
            &names[9..],
            &[
                "hour=5", "hour=23", "hour=unknown", "day_of_week=1", "day_of_week=unknown",
                "month=2", "month=unknown",
            ]
            .map(String::from)
        );
        assert_eq!(pre.source_feature(10), Feature::Hour);
        assert_eq!(pre.n_columns(), 16);
    }

    #[test]
    fn test_standardize_and_constant_columns() {
        let pre = Preprocessor::fit(&training(), &LeakageGuard::unrestricted()).unwrap();
        let out = pre.transform_one(&training()[0].features);

        let std = (200.0f64 / 3.0).sqrt();
        assert!((out[0] - (-10.0 / std)).abs() < 1e-12);
        // distance is constant 1.0 in training
        assert_eq!(out[1], 0.0);
        assert_eq!(pre.scaler(Feature::Distance).unwrap().std, 0.0);
    }

    #[test]
    fn test_reference_and_unknown_levels() {
        let pre = Preprocessor::fit(&training(), &LeakageGuard::unrestricted()).unwrap();

        // hour 0, dow 0, month 1 are all reference levels
        let reference = pre.transform_one(&training()[0].features);
        assert!(reference[9..].iter().all(|&v| v == 0.0));

        // hour 12 and month 7 never seen in training
        let unseen = pre.transform_one(&row(9, 10.0, 12.0, 1.0, 7.0).features);
        assert_eq!(&unseen[9..], &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_matrix_matches_single_rows() {
        let pre = Preprocessor::fit(&training(), &LeakageGuard::unrestricted()).unwrap();
        let vectors: Vec<FeatureVector> = training().iter().map(|r| r.features).collect();
        let matrix = pre.transform(&vectors);

        assert_eq!(matrix.dim(), (3, pre.n_columns()));
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(matrix.row(i).to_vec(), pre.transform_one(v));
        }
    }

    #[test]
    fn test_fit_rejects_evaluation_rows() {
        let guard = LeakageGuard::new(["tx_2"]);
        let err = Preprocessor::fit(&training(), &guard).unwrap_err();
        assert_eq!(err.stage, "preprocessor");
    }

    proptest! {
        #[test]
        fn prop_standardize_round_trip(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 2..50),
        ) {
            let rows: Vec<LabeledFeatures> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| row(i, v, 1.0, 1.0, 1.0))
                .collect();
            let pre = Preprocessor::fit(&rows, &LeakageGuard::unrestricted()).unwrap();
            let stats = pre.scaler(Feature::Amount).unwrap();
            prop_assume!(stats.std > 0.0);

            for &v in &values {
                let back = stats.inverse(stats.transform(v));
                prop_assert!((back - v).abs() <= 1e-6 * v.abs().max(1.0));
            }
        }
    }
}
