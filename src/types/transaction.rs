//! Transaction data structures for card fraud modelling

use crate::error::{Rejection, ValidationError};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Timestamp layout used by the source dataset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date-of-birth layout used by the source dataset.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Validate and build a coordinate pair.
    ///
    /// `field` names the pair in the error (`home` or `merchant`).
    pub fn new(field: &'static str, lat: f64, lon: f64) -> Result<Self, ValidationError> {
        let in_range = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);

        if !in_range {
            return Err(ValidationError::CoordinateOutOfRange { field, lat, lon });
        }

        Ok(Self { lat, lon })
    }
}

/// A validated, immutable card transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    pub transaction_id: String,

    /// Card / account the transaction was charged to
    pub account_id: String,

    /// Transaction time
    pub timestamp: NaiveDateTime,

    /// Amount in USD
    pub amount: f64,

    /// Cardholder home location
    pub home: Coordinates,

    /// Merchant location
    pub merchant: Coordinates,

    /// Merchant category (e.g. `gas_transport`)
    pub category: String,

    /// Cardholder job title
    pub job: String,

    /// Population of the cardholder's city
    pub city_population: u64,

    /// Cardholder date of birth
    pub date_of_birth: NaiveDate,

    /// Ground-truth fraud label
    pub is_fraud: bool,
}

impl Transaction {
    /// Create a transaction with placeholder location and profile fields.
    pub fn new(
        transaction_id: impl Into<String>,
        account_id: impl Into<String>,
        timestamp: NaiveDateTime,
        amount: f64,
    ) -> Self {
        let origin = Coordinates { lat: 0.0, lon: 0.0 };
        Self {
            transaction_id: transaction_id.into(),
            account_id: account_id.into(),
            timestamp,
            amount,
            home: origin,
            merchant: origin,
            category: "misc_pos".to_string(),
            job: "unknown".to_string(),
            city_population: 0,
            date_of_birth: timestamp.date(),
            is_fraud: false,
        }
    }

    pub fn with_label(mut self, is_fraud: bool) -> Self {
        self.is_fraud = is_fraud;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn with_locations(mut self, home: Coordinates, merchant: Coordinates) -> Self {
        self.home = home;
        self.merchant = merchant;
        self
    }

    pub fn with_profile(mut self, city_population: u64, date_of_birth: NaiveDate) -> Self {
        self.city_population = city_population;
        self.date_of_birth = date_of_birth;
        self
    }

    /// Hour of day, 0..=23.
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    /// Day of week, 0 = Monday .. 6 = Sunday.
    pub fn day_of_week(&self) -> u32 {
        self.timestamp.weekday().num_days_from_monday()
    }

    /// Calendar month, 1..=12.
    pub fn month(&self) -> u32 {
        self.timestamp.month()
    }

    /// Cardholder age in whole 365-day years at transaction time.
    pub fn age_years(&self) -> i64 {
        (self.timestamp.date() - self.date_of_birth).num_days().div_euclid(365)
    }
}

/// One row of the source CSV, before validation.
///
/// Column names follow the public credit-card transactions dataset; columns
/// not listed here are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(rename = "trans_num")]
    pub transaction_id: String,
    #[serde(rename = "cc_num")]
    pub account_id: String,
    #[serde(rename = "trans_date_trans_time")]
    pub timestamp: String,
    #[serde(rename = "amt")]
    pub amount: Option<f64>,
    pub lat: Option<f64>,
    #[serde(rename = "long")]
    pub lon: Option<f64>,
    pub merch_lat: Option<f64>,
    #[serde(rename = "merch_long")]
    pub merch_lon: Option<f64>,
    pub category: Option<String>,
    pub job: Option<String>,
    #[serde(rename = "city_pop")]
    pub city_population: Option<u64>,
    #[serde(rename = "dob")]
    pub date_of_birth: String,
    #[serde(rename = "is_fraud")]
    pub label: Option<i64>,
}

impl From<&Transaction> for RawTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.transaction_id.clone(),
            account_id: tx.account_id.clone(),
            timestamp: tx.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            amount: Some(tx.amount),
            lat: Some(tx.home.lat),
            lon: Some(tx.home.lon),
            merch_lat: Some(tx.merchant.lat),
            merch_lon: Some(tx.merchant.lon),
            category: Some(tx.category.clone()),
            job: Some(tx.job.clone()),
            city_population: Some(tx.city_population),
            date_of_birth: tx.date_of_birth.format(DATE_FORMAT).to_string(),
            label: Some(i64::from(tx.is_fraud)),
        }
    }
}

impl TryFrom<RawTransaction> for Transaction {
    type Error = Rejection;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let id = raw.transaction_id.clone();
        let reject = |error: ValidationError| Rejection::new(id.clone(), error);

        let timestamp = NaiveDateTime::parse_from_str(raw.timestamp.trim(), TIMESTAMP_FORMAT)
            .map_err(|_| {
                reject(ValidationError::MalformedTimestamp {
                    value: raw.timestamp.clone(),
                })
            })?;

        let date_of_birth = NaiveDate::parse_from_str(raw.date_of_birth.trim(), DATE_FORMAT)
            .map_err(|_| {
                reject(ValidationError::MalformedDate {
                    value: raw.date_of_birth.clone(),
                })
            })?;

        let amount = required(raw.amount, "amt").map_err(reject)?;
        if !amount.is_finite() {
            return Err(reject(ValidationError::NonFinite { field: "amt" }));
        }

        let home = Coordinates::new(
            "home",
            required(raw.lat, "lat").map_err(reject)?,
            required(raw.lon, "long").map_err(reject)?,
        )
        .map_err(reject)?;
        let merchant = Coordinates::new(
            "merchant",
            required(raw.merch_lat, "merch_lat").map_err(reject)?,
            required(raw.merch_lon, "merch_long").map_err(reject)?,
        )
        .map_err(reject)?;

        let category = non_empty(raw.category, "category").map_err(reject)?;
        let job = non_empty(raw.job, "job").map_err(reject)?;
        let city_population = required(raw.city_population, "city_pop").map_err(reject)?;

        let is_fraud = match required(raw.label, "is_fraud").map_err(reject)? {
            0 => false,
            1 => true,
            value => return Err(reject(ValidationError::InvalidLabel { value })),
        };

        Ok(Self {
            transaction_id: raw.transaction_id,
            account_id: raw.account_id,
            timestamp,
            amount,
            home,
            merchant,
            category,
            job,
            city_population,
            date_of_birth,
            is_fraud,
        })
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField { field })
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawTransaction {
        RawTransaction {
            transaction_id: "tx_1".to_string(),
            account_id: "4000123412341234".to_string(),
            timestamp: "2019-03-15 14:05:00".to_string(),
            amount: Some(42.5),
            lat: Some(40.7),
            lon: Some(-74.0),
            merch_lat: Some(40.9),
            merch_lon: Some(-73.8),
            category: Some("grocery_pos".to_string()),
            job: Some("Engineer".to_string()),
            city_population: Some(8_000_000),
            date_of_birth: "1980-06-20".to_string(),
            label: Some(0),
        }
    }

    #[test]
    fn test_valid_row_converts() {
        let tx = Transaction::try_from(raw()).unwrap();
        assert_eq!(tx.account_id, "4000123412341234");
        assert_eq!(tx.hour(), 14);
        assert_eq!(tx.month(), 3);
        // 2019-03-15 is a Friday
        assert_eq!(tx.day_of_week(), 4);
        assert_eq!(tx.age_years(), 38);
        assert!(!tx.is_fraud);
    }

    #[test]
    fn test_malformed_timestamp_rejected() {
        let mut row = raw();
        row.timestamp = "15/03/2019 2pm".to_string();

        let rejection = Transaction::try_from(row).unwrap_err();
        assert_eq!(rejection.transaction_id, "tx_1");
        assert!(matches!(
            rejection.error,
            ValidationError::MalformedTimestamp { .. }
        ));
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let mut row = raw();
        row.merch_lat = Some(91.0);

        let rejection = Transaction::try_from(row).unwrap_err();
        assert_eq!(
            rejection.error,
            ValidationError::CoordinateOutOfRange {
                field: "merchant",
                lat: 91.0,
                lon: -73.8
            }
        );
    }

    #[test]
    fn test_missing_and_invalid_fields_rejected() {
        let mut row = raw();
        row.job = Some("  ".to_string());
        assert_eq!(
            Transaction::try_from(row).unwrap_err().error,
            ValidationError::MissingField { field: "job" }
        );

        let mut row = raw();
        row.label = Some(2);
        assert_eq!(
            Transaction::try_from(row).unwrap_err().error,
            ValidationError::InvalidLabel { value: 2 }
        );

        let mut row = raw();
        row.amount = Some(f64::NAN);
        assert_eq!(
            Transaction::try_from(row).unwrap_err().error,
            ValidationError::NonFinite { field: "amt" }
        );
    }

    #[test]
    fn test_transaction_serialization() {
        let tx = Transaction::try_from(raw()).unwrap();

        let json = serde_json::to_string(&tx).unwrap();
        let deserialized: Transaction = serde_json::from_str(&json).unwrap();

        assert_eq!(tx, deserialized);
    }
}
