//! CSV ingestion and record validation.
//!
//! Bad records are rejected one at a time with a reason; only I/O failures
//! and an unreadable header abort the load.

use crate::error::{Rejection, ValidationError};
use crate::types::{RawTransaction, Transaction};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, Trim};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Calendar window `[start, end)` on transaction dates. Open ends keep everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalendarWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl CalendarWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        let date = timestamp.date();
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date < e)
    }
}

/// Rows as read from a CSV, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub rows: Vec<RawTransaction>,
    /// Rows the CSV layer could not deserialize at all
    pub unparseable: Vec<Rejection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestSummary {
    pub read: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub outside_window: usize,
}

/// Validated transactions plus everything that was turned away.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub transactions: Vec<Transaction>,
    pub rejected: Vec<Rejection>,
    /// Valid rows dropped by the calendar window
    pub outside_window: usize,
}

impl IngestReport {
    pub fn summary(&self) -> IngestSummary {
        IngestSummary {
            read: self.transactions.len() + self.rejected.len() + self.outside_window,
            accepted: self.transactions.len(),
            rejected: self.rejected.len(),
            outside_window: self.outside_window,
        }
    }
}

/// Read raw rows from a CSV file.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<RawBatch> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open transactions file {}", path.display()))?;
    let batch = read_csv_from(file)
        .with_context(|| format!("Failed to read transactions from {}", path.display()))?;

    info!(
        path = %path.display(),
        rows = batch.rows.len(),
        unparseable = batch.unparseable.len(),
        "Transactions file read"
    );
    Ok(batch)
}

/// Read raw rows from any reader with a header line.
pub fn read_csv_from<R: Read>(reader: R) -> Result<RawBatch> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);
    reader.headers().context("Failed to read CSV header")?;

    let mut batch = RawBatch::default();
    for (record, result) in reader.deserialize::<RawTransaction>().enumerate() {
        match result {
            Ok(row) => batch.rows.push(row),
            Err(e) => {
                if e.is_io_error() {
                    return Err(e).context("I/O error while reading CSV");
                }
                // header is line 1
                let line = e.position().map_or(record as u64 + 2, |p| p.line());
                batch.unparseable.push(Rejection::new(
                    format!("line:{line}"),
                    ValidationError::Unparseable {
                        line,
                        message: e.to_string(),
                    },
                ));
            }
        }
    }
    Ok(batch)
}

/// Validate raw rows and apply the calendar window.
pub fn validate(batch: RawBatch, window: CalendarWindow) -> IngestReport {
    let mut report = IngestReport {
        rejected: batch.unparseable,
        ..IngestReport::default()
    };

    for raw in batch.rows {
        match Transaction::try_from(raw) {
            Ok(tx) if window.contains(tx.timestamp) => report.transactions.push(tx),
            Ok(_) => report.outside_window += 1,
            Err(rejection) => report.rejected.push(rejection),
        }
    }

    if let Some(first) = report.rejected.first() {
        warn!(
            rejected = report.rejected.len(),
            first = %first.transaction_id,
            reason = %first.error,
            "Rejected malformed transactions"
        );
    }
    info!(
        accepted = report.transactions.len(),
        rejected = report.rejected.len(),
        outside_window = report.outside_window,
        "Transactions validated"
    );
    report
}

/// Read and validate in one step.
pub fn load<P: AsRef<Path>>(path: P, window: CalendarWindow) -> Result<IngestReport> {
    Ok(validate(read_csv(path)?, window))
}
