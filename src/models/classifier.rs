//! Fraud classifier: frozen preprocessing plus a random forest.

use crate::error::LeakageError;
use crate::models::forest::{ForestParams, RandomForest};
use crate::partition::LeakageGuard;
use crate::preprocess::Preprocessor;
use crate::types::{Feature, FeatureVector, LabeledFeatures};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Importance of one named column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
}

/// Trained model. Immutable once fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudClassifier {
    preprocessor: Preprocessor,
    forest: RandomForest,
}

impl FraudClassifier {
    /// Fit the preprocessor and forest on training rows.
    pub fn fit(
        rows: &[LabeledFeatures],
        guard: &LeakageGuard,
        params: &ForestParams,
    ) -> Result<Self, LeakageError> {
        let preprocessor = Preprocessor::fit(rows, guard)?;
        let vectors: Vec<FeatureVector> = rows.iter().map(|r| r.features).collect();
        let labels: Vec<bool> = rows.iter().map(|r| r.is_fraud).collect();
        let matrix = preprocessor.transform(&vectors);

        let forest = RandomForest::fit(matrix.view(), &labels, params);

        info!(
            rows = rows.len(),
            positives = labels.iter().filter(|&&l| l).count(),
            columns = preprocessor.n_columns(),
            trees = forest.n_trees(),
            "Fraud classifier trained"
        );

        Ok(Self {
            preprocessor,
            forest,
        })
    }

    /// Estimated probability that the transaction is fraudulent.
    pub fn predict_proba(&self, vector: &FeatureVector) -> f64 {
        self.forest.predict_row(&self.preprocessor.transform_one(vector))
    }

    pub fn predict_proba_batch(&self, vectors: &[FeatureVector]) -> Vec<f64> {
        let matrix = self.preprocessor.transform(vectors);
        self.forest.predict(matrix.view())
    }

    /// Importance per processed column, highest first.
    pub fn column_importances(&self) -> Vec<FeatureImportance> {
        let mut ranked: Vec<FeatureImportance> = self
            .preprocessor
            .column_names()
            .iter()
            .zip(self.forest.feature_importances())
            .map(|(name, &importance)| FeatureImportance {
                name: name.clone(),
                importance,
            })
            .collect();
        sort_desc(&mut ranked);
        ranked
    }

    /// Importance per named feature, with one-hot columns summed into their
    /// source feature. Highest first.
    pub fn feature_importances(&self) -> Vec<FeatureImportance> {
        let mut totals = [0.0; Feature::COUNT];
        for (column, &importance) in self.forest.feature_importances().iter().enumerate() {
            totals[self.preprocessor.source_feature(column).index()] += importance;
        }
        let mut ranked: Vec<FeatureImportance> = Feature::ALL
            .iter()
            .map(|f| FeatureImportance {
                name: f.name().to_string(),
                importance: totals[f.index()],
            })
            .collect();
        sort_desc(&mut ranked);
        ranked
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }
}

fn sort_desc(items: &mut [FeatureImportance]) {
    items.sort_by(|a, b| {
        b.importance
            .total_cmp(&a.importance)
            .then_with(|| a.name.cmp(&b.name))
    });
}
