//! Historical fraud-rate encoding of merchant category and cardholder job.
//!
//! Tables are fit once on the training partition and are read-only
//! afterwards. Keys never seen during the fit resolve to the global training
//! fraud rate and are marked as [`RiskLookup::Fallback`].

use crate::error::LeakageError;
use crate::partition::LeakageGuard;
use crate::types::Transaction;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of looking a key up in a [`RiskTable`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "rate", rename_all = "snake_case")]
pub enum RiskLookup {
    Known(f64),
    Fallback(f64),
}

impl RiskLookup {
    pub fn value(self) -> f64 {
        match self {
            RiskLookup::Known(rate) | RiskLookup::Fallback(rate) => rate,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, RiskLookup::Fallback(_))
    }
}

/// Mean fraud label per categorical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTable {
    rates: HashMap<String, f64>,
    fallback: f64,
}

impl RiskTable {
    pub fn from_rates(rates: HashMap<String, f64>, fallback: f64) -> Self {
        Self { rates, fallback }
    }

    /// Single reduction pass: per-thread `(frauds, total)` tallies merged by key.
    fn fit(training: &[Transaction], key: fn(&Transaction) -> &str, fallback: f64) -> Self {
        let tallies = training
            .par_iter()
            .fold(HashMap::<&str, (u64, u64)>::new, |mut acc, tx| {
                let entry = acc.entry(key(tx)).or_default();
                entry.0 += u64::from(tx.is_fraud);
                entry.1 += 1;
                acc
            })
            .reduce(HashMap::new, |mut left, right| {
                for (k, (frauds, total)) in right {
                    let entry = left.entry(k).or_default();
                    entry.0 += frauds;
                    entry.1 += total;
                }
                left
            });

        let rates = tallies
            .into_iter()
            .map(|(k, (frauds, total))| (k.to_string(), frauds as f64 / total as f64))
            .collect();
        Self { rates, fallback }
    }

    pub fn lookup(&self, key: &str) -> RiskLookup {
        match self.rates.get(key) {
            Some(&rate) => RiskLookup::Known(rate),
            None => RiskLookup::Fallback(self.fallback),
        }
    }

    pub fn fallback(&self) -> f64 {
        self.fallback
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Keys sorted by descending fraud rate.
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self.rates.iter().map(|(k, &v)| (k.as_str(), v)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Risk lookups for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskFeatures {
    pub category: RiskLookup,
    pub job: RiskLookup,
}

/// Frozen category and job risk tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEncoder {
    category: RiskTable,
    job: RiskTable,
    global_rate: f64,
}

fn category_key(tx: &Transaction) -> &str {
    &tx.category
}

fn job_key(tx: &Transaction) -> &str {
    &tx.job
}

impl RiskEncoder {
    /// Fit both tables on `training`, refusing any row the guard protects.
    pub fn fit(training: &[Transaction], guard: &LeakageGuard) -> Result<Self, LeakageError> {
        guard.check(
            "risk_encoder",
            training.iter().map(|tx| tx.transaction_id.as_str()),
        )?;

        let global_rate = if training.is_empty() {
            warn!("Risk encoder fit on an empty partition, every lookup will fall back to 0");
            0.0
        } else {
            training.iter().filter(|tx| tx.is_fraud).count() as f64 / training.len() as f64
        };

        let category = RiskTable::fit(training, category_key, global_rate);
        let job = RiskTable::fit(training, job_key, global_rate);

        debug!(
            rows = training.len(),
            categories = category.len(),
            jobs = job.len(),
            global_rate,
            "Risk encoder fitted"
        );

        Ok(Self {
            category,
            job,
            global_rate,
        })
    }

    /// Build an encoder from already-known tables; both fall back to `global_rate`.
    pub fn from_tables(
        category_rates: HashMap<String, f64>,
        job_rates: HashMap<String, f64>,
        global_rate: f64,
    ) -> Self {
        Self {
            category: RiskTable::from_rates(category_rates, global_rate),
            job: RiskTable::from_rates(job_rates, global_rate),
            global_rate,
        }
    }

    pub fn encode(&self, tx: &Transaction) -> RiskFeatures {
        RiskFeatures {
            category: self.category.lookup(&tx.category),
            job: self.job.lookup(&tx.job),
        }
    }

    pub fn category_table(&self) -> &RiskTable {
        &self.category
    }

    pub fn job_table(&self) -> &RiskTable {
        &self.job
    }

    pub fn global_rate(&self) -> f64 {
        self.global_rate
    }
}
