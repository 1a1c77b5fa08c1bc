//! Composes temporal, geographic and risk signals into fixed-order feature vectors.

use crate::error::{Rejection, ValidationError};
use crate::features::geo::GeoDistanceCalculator;
use crate::features::risk::{RiskEncoder, RiskFeatures};
use crate::features::temporal::TemporalFeatures;
use crate::types::{Feature, FeatureVector, LabeledFeatures, Transaction};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

/// How many lookups resolved to the global fallback rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FallbackCounts {
    pub category: usize,
    pub job: usize,
}

/// Output of assembling one partition.
#[derive(Debug, Clone, Default)]
pub struct AssembledBatch {
    pub rows: Vec<LabeledFeatures>,
    pub rejected: Vec<Rejection>,
    pub fallbacks: FallbackCounts,
}

impl AssembledBatch {
    pub fn labels(&self) -> Vec<bool> {
        self.rows.iter().map(|r| r.is_fraud).collect()
    }

    pub fn vectors(&self) -> Vec<FeatureVector> {
        self.rows.iter().map(|r| r.features).collect()
    }
}

/// Borrows a frozen [`RiskEncoder`] for the lifetime of one batch.
pub struct FeatureAssembler<'a> {
    encoder: &'a RiskEncoder,
    geo: GeoDistanceCalculator,
}

impl<'a> FeatureAssembler<'a> {
    pub fn new(encoder: &'a RiskEncoder) -> Self {
        Self {
            encoder,
            geo: GeoDistanceCalculator::new(),
        }
    }

    /// Assemble every transaction; `temporal[i]` must belong to `transactions[i]`.
    ///
    /// Records that cannot be assembled are rejected individually.
    pub fn assemble(&self, transactions: &[Transaction], temporal: &[TemporalFeatures]) -> AssembledBatch {
        let results: Vec<Result<(LabeledFeatures, RiskFeatures), Rejection>> = transactions
            .par_iter()
            .enumerate()
            .map(|(i, tx)| {
                self.assemble_one(tx, temporal.get(i))
                    .map(|(features, risk)| {
                        let row = LabeledFeatures {
                            transaction_id: tx.transaction_id.clone(),
                            is_fraud: tx.is_fraud,
                            features,
                        };
                        (row, risk)
                    })
                    .map_err(|error| Rejection::new(tx.transaction_id.clone(), error))
            })
            .collect();

        let mut batch = AssembledBatch::default();
        for result in results {
            match result {
                Ok((row, risk)) => {
                    batch.fallbacks.category += usize::from(risk.category.is_fallback());
                    batch.fallbacks.job += usize::from(risk.job.is_fallback());
                    batch.rows.push(row);
                }
                Err(rejection) => batch.rejected.push(rejection),
            }
        }

        if !batch.rejected.is_empty() {
            warn!(
                rejected = batch.rejected.len(),
                first = %batch.rejected[0].transaction_id,
                reason = %batch.rejected[0].error,
                "Rejected records during feature assembly"
            );
        }
        debug!(
            rows = batch.rows.len(),
            category_fallbacks = batch.fallbacks.category,
            job_fallbacks = batch.fallbacks.job,
            "Feature batch assembled"
        );
        batch
    }

    /// Build the feature vector for one transaction.
    ///
    /// A missing temporal record or any non-finite value rejects the record.
    pub fn assemble_one(
        &self,
        tx: &Transaction,
        temporal: Option<&TemporalFeatures>,
    ) -> Result<(FeatureVector, RiskFeatures), ValidationError> {
        let temporal = temporal.ok_or(ValidationError::MissingField {
            field: Feature::TransFreqHour.name(),
        })?;
        let distance = self.geo.distance_checked(tx.home, tx.merchant)?;
        let risk = self.encoder.encode(tx);
        let category_risk = risk.category.value();
        let job_risk = risk.job.value();

        let mut values = [0.0; Feature::COUNT];
        values[Feature::Amount.index()] = tx.amount;
        values[Feature::Distance.index()] = distance;
        values[Feature::Population.index()] = tx.city_population as f64;
        values[Feature::Age.index()] = tx.age_years() as f64;
        values[Feature::Hour.index()] = f64::from(tx.hour());
        values[Feature::DayOfWeek.index()] = f64::from(tx.day_of_week());
        values[Feature::Month.index()] = f64::from(tx.month());
        values[Feature::TransFreqHour.index()] = f64::from(temporal.trans_freq_hour);
        values[Feature::CategoryRisk.index()] = category_risk;
        values[Feature::AmountCategoryRisk.index()] = tx.amount * category_risk;
        values[Feature::JobRisk.index()] = job_risk;
        values[Feature::AmountJobRisk.index()] = tx.amount * job_risk;

        if let Some(bad) = Feature::ALL.iter().find(|f| !values[f.index()].is_finite()) {
            return Err(ValidationError::NonFinite { field: bad.name() });
        }

        Ok((FeatureVector::from_values(values), risk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinates;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn encoder() -> RiskEncoder {
        let categories = HashMap::from([
            ("gas".to_string(), 0.01),
            ("shopping_net".to_string(), 0.05),
        ]);
        let jobs = HashMap::from([("Engineer".to_string(), 0.02)]);
        RiskEncoder::from_tables(categories, jobs, 0.03)
    }

    fn tx(id: &str, category: &str) -> Transaction {
        let ts = NaiveDate::from_ymd_opt(2019, 7, 4)
            .unwrap()
            .and_hms_opt(22, 15, 0)
            .unwrap();
        Transaction::new(id, "acct", ts, 100.0)
            .with_category(category)
            .with_job("Engineer")
            .with_locations(
                Coordinates { lat: 40.0, lon: -75.0 },
                Coordinates { lat: 40.0, lon: -75.0 },
            )
            .with_profile(5_000, NaiveDate::from_ymd_opt(1990, 1, 1).unwrap())
    }

    fn temporal(count: u32) -> TemporalFeatures {
        TemporalFeatures {
            trans_freq_hour: count,
            time_gap_hours: 0.0,
        }
    }

    #[test]
    fn test_vector_fields_in_order() {
        let encoder = encoder();
        let assembler = FeatureAssembler::new(&encoder);

        let (vector, risk) = assembler
            .assemble_one(&tx("t1", "shopping_net"), Some(&temporal(3)))
            .unwrap();

        assert!(!risk.category.is_fallback());
        assert_eq!(
            vector.values(),
            &[100.0, 0.0, 5_000.0, 29.0, 22.0, 3.0, 7.0, 3.0, 0.05, 5.0, 0.02, 2.0]
        );
    }

    #[test]
    fn test_missing_temporal_rejects_record() {
        let encoder = encoder();
        let assembler = FeatureAssembler::new(&encoder);

        let err = assembler.assemble_one(&tx("t1", "gas"), None).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "trans_freq_hour"
            }
        );
    }

    #[test]
    fn test_batch_rejects_bad_rows_and_counts_fallbacks() {
        let encoder = encoder();
        let assembler = FeatureAssembler::new(&encoder);

        let mut bad = tx("bad", "gas");
        bad.merchant = Coordinates { lat: 100.0, lon: 0.0 };
        let mut nan = tx("nan", "gas");
        nan.amount = f64::INFINITY;
        let rows = vec![tx("ok", "gas"), bad, tx("unseen", "travel"), nan];
        let temporal = vec![temporal(1); rows.len()];

        let batch = assembler.assemble(&rows, &temporal);

        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].transaction_id, "ok");
        assert_eq!(batch.rows[1].transaction_id, "unseen");
        assert_eq!(batch.rejected.len(), 2);
        assert_eq!(batch.rejected[0].transaction_id, "bad");
        assert_eq!(
            batch.rejected[1].error,
            ValidationError::NonFinite { field: "amount" }
        );
        assert_eq!(batch.fallbacks, FallbackCounts { category: 1, job: 0 });
        assert_eq!(batch.rows[1].features.get(Feature::CategoryRisk), 0.03);
    }
}
