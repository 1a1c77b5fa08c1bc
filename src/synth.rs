//! Seeded synthetic card transactions.
//!
//! Used by the `synth_transactions` tool for demo CSVs and by tests that
//! need a labelled population with learnable fraud signal: fraudulent
//! transactions are larger, come in bursts, happen at night, favour online
//! categories and are made far from home.

use crate::types::{Coordinates, Transaction};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LEGIT_CATEGORIES: &[&str] = &[
    "grocery_pos", "gas_transport", "home", "kids_pets", "entertainment",
    "food_dining", "health_fitness", "personal_care",
];
const FRAUD_CATEGORIES: &[&str] = &["shopping_net", "misc_net", "grocery_pos", "shopping_pos"];
const JOBS: &[&str] = &[
    "Engineer, civil", "Teacher, primary school", "Nurse, adult", "Barrister",
    "Surveyor, land", "Designer, jewellery", "Retail manager", "Paramedic",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticConfig {
    pub accounts: usize,
    pub transactions_per_account: usize,
    /// Probability that a transaction starts a fraud burst
    pub fraud_rate: f64,
    pub seed: u64,
    pub start: NaiveDateTime,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            accounts: 50,
            transactions_per_account: 40,
            fraud_rate: 0.02,
            seed: 100,
            start: NaiveDate::from_ymd_opt(2019, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
        }
    }
}

struct AccountProfile {
    account_id: String,
    home: Coordinates,
    job: &'static str,
    date_of_birth: NaiveDate,
    city_population: u64,
}

/// Transaction generator for testing
pub struct TransactionGenerator {
    rng: StdRng,
    config: SyntheticConfig,
    transaction_counter: u64,
}

impl TransactionGenerator {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            transaction_counter: 0,
        }
    }

    /// All transactions for all accounts, ordered by timestamp.
    pub fn generate(&mut self) -> Vec<Transaction> {
        let mut transactions = Vec::with_capacity(self.config.accounts * self.config.transactions_per_account);
        for account in 0..self.config.accounts {
            let profile = self.profile(account);
            self.generate_account(&profile, &mut transactions);
        }
        transactions.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        transactions
    }

    fn profile(&mut self, account: usize) -> AccountProfile {
        let home = Coordinates {
            lat: self.rng.gen_range(26.0..48.0),
            lon: self.rng.gen_range(-122.0..-70.0),
        };
        let birth_year = self.rng.gen_range(1940..2000);
        let date_of_birth = NaiveDate::from_ymd_opt(birth_year, self.rng.gen_range(1..=12), self.rng.gen_range(1..=28))
            .unwrap_or_default();
        AccountProfile {
            account_id: format!("{}", 4_000_000_000_000_000u64 + account as u64 * 7_919),
            home,
            job: self.random_choice(JOBS),
            date_of_birth,
            city_population: self.rng.gen_range(200..2_000_000),
        }
    }

    fn generate_account(&mut self, profile: &AccountProfile, out: &mut Vec<Transaction>) {
        let mut at = self.config.start + Duration::minutes(self.rng.gen_range(0..7 * 24 * 60));
        let mut burst_left = 0;

        for _ in 0..self.config.transactions_per_account {
            if burst_left == 0 && self.rng.gen_bool(self.config.fraud_rate.clamp(0.0, 1.0)) {
                burst_left = self.rng.gen_range(2..5);
                // bursts start late at night
                let night = at.date().and_hms_opt(self.rng.gen_range(0..4), self.rng.gen_range(0..60), 0);
                at = night.map_or(at, |n| n + Duration::days(1));
            }

            let tx = if burst_left > 0 {
                burst_left -= 1;
                at += Duration::minutes(self.rng.gen_range(1..20));
                self.generate_suspicious(profile, at)
            } else {
                at += Duration::minutes(self.rng.gen_range(120..4_320));
                self.generate_legitimate(profile, at)
            };
            out.push(tx);
        }
    }

    /// Generate a random legitimate transaction
    fn generate_legitimate(&mut self, profile: &AccountProfile, at: NaiveDateTime) -> Transaction {
        let merchant = self.near(profile.home, 0.8);
        let category = self.random_choice(LEGIT_CATEGORIES);
        let amount = self.rng.gen_range(2.0..180.0);
        self.build(profile, at, amount, category, merchant, false)
    }

    /// Generate a suspicious/fraudulent transaction
    fn generate_suspicious(&mut self, profile: &AccountProfile, at: NaiveDateTime) -> Transaction {
        let merchant = self.near(profile.home, 6.0);
        let category = self.random_choice(FRAUD_CATEGORIES);
        let amount = self.rng.gen_range(250.0..1_400.0);
        self.build(profile, at, amount, category, merchant, true)
    }

    fn build(
        &mut self,
        profile: &AccountProfile,
        at: NaiveDateTime,
        amount: f64,
        category: &str,
        merchant: Coordinates,
        is_fraud: bool,
    ) -> Transaction {
        self.transaction_counter += 1;
        Transaction::new(
            format!("tx_{:012}", self.transaction_counter),
            profile.account_id.clone(),
            at,
            (amount * 100.0).round() / 100.0,
        )
        .with_label(is_fraud)
        .with_category(category)
        .with_job(profile.job)
        .with_locations(profile.home, merchant)
        .with_profile(profile.city_population, profile.date_of_birth)
    }

    fn near(&mut self, home: Coordinates, spread: f64) -> Coordinates {
        Coordinates {
            lat: (home.lat + self.rng.gen_range(-spread..spread)).clamp(-90.0, 90.0),
            lon: (home.lon + self.rng.gen_range(-spread..spread)).clamp(-180.0, 180.0),
        }
    }

    fn random_choice(&mut self, choices: &[&'static str]) -> &'static str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawTransaction;

    #[test]
    fn test_generation_is_seeded() {
        let config = SyntheticConfig {
            accounts: 5,
            transactions_per_account: 10,
            ..SyntheticConfig::default()
        };
        let a = TransactionGenerator::new(config).generate();
        let b = TransactionGenerator::new(config).generate();

        assert_eq!(a.len(), 50);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_fraud_is_larger_and_labelled() {
        let config = SyntheticConfig {
            accounts: 20,
            transactions_per_account: 30,
            fraud_rate: 0.1,
            ..SyntheticConfig::default()
        };
        let txs = TransactionGenerator::new(config).generate();

        let frauds: Vec<&Transaction> = txs.iter().filter(|t| t.is_fraud).collect();
        assert!(!frauds.is_empty());
        assert!(frauds.iter().all(|t| t.amount >= 250.0));
        assert!(txs.iter().filter(|t| !t.is_fraud).all(|t| t.amount <= 180.0));
    }

    #[test]
    fn test_rows_survive_csv_validation() {
        let txs = TransactionGenerator::new(SyntheticConfig {
            accounts: 3,
            transactions_per_account: 5,
            ..SyntheticConfig::default()
        })
        .generate();

        for tx in txs {
            let raw = RawTransaction::from(&tx);
            assert_eq!(Transaction::try_from(raw).unwrap(), tx);
        }
    }
}
