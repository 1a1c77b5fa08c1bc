//! Per-account rolling transaction counts and inter-transaction gaps.
//!
//! Transactions are grouped by account and each account timeline is scanned
//! once with a trailing-window deque, so the cost is `O(n log n)` for the sort
//! plus `O(n)` for the scan. Accounts share no state and are scanned in
//! parallel; results are merged back into input order.

use crate::types::Transaction;
use chrono::{Duration, NaiveDateTime};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Temporal signals for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TemporalFeatures {
    /// Same-account transactions with timestamp in `[t - window, t]`, including this one
    pub trans_freq_hour: u32,
    /// Hours since the previous same-account transaction (0 for the first)
    pub time_gap_hours: f64,
}

/// Input positions of one account's transactions, sorted ascending by
/// timestamp. Equal timestamps keep their input order.
#[derive(Debug, Clone)]
pub struct AccountTimeline<'a> {
    pub account_id: &'a str,
    pub positions: Vec<usize>,
}

impl<'a> AccountTimeline<'a> {
    /// Group transactions by account and sort each group by time.
    pub fn group(transactions: &'a [Transaction]) -> Vec<AccountTimeline<'a>> {
        let mut by_account: HashMap<&'a str, Vec<usize>> = HashMap::new();
        for (pos, tx) in transactions.iter().enumerate() {
            by_account.entry(tx.account_id.as_str()).or_default().push(pos);
        }

        let mut timelines: Vec<AccountTimeline<'a>> = by_account
            .into_iter()
            .map(|(account_id, mut positions)| {
                // stable: ties stay in input order
                positions.sort_by_key(|&pos| transactions[pos].timestamp);
                AccountTimeline {
                    account_id,
                    positions,
                }
            })
            .collect();
        timelines.sort_by(|a, b| a.account_id.cmp(b.account_id));
        timelines
    }
}

/// Trailing-window state for a single account.
struct WindowState {
    span: Duration,
    recent: VecDeque<NaiveDateTime>,
    last: Option<NaiveDateTime>,
}

impl WindowState {
    fn new(span: Duration) -> Self {
        Self {
            span,
            recent: VecDeque::new(),
            last: None,
        }
    }

    /// Admit the next timestamp of the timeline and return the gap in hours
    /// to the previously admitted one.
    fn admit(&mut self, ts: NaiveDateTime) -> f64 {
        let gap = self
            .last
            .map(|prev| (ts - prev).num_milliseconds() as f64 / MILLIS_PER_HOUR)
            .unwrap_or(0.0);
        self.last = Some(ts);

        self.recent.push_back(ts);
        let window_start = ts - self.span;
        while self.recent.front().is_some_and(|&front| front < window_start) {
            self.recent.pop_front();
        }
        gap
    }

    fn count(&self) -> u32 {
        self.recent.len() as u32
    }
}

/// Computes `trans_freq_hour` and `time_gap_hours` for every transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalFeatureBuilder {
    window: Duration,
}

impl TemporalFeatureBuilder {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// One-hour trailing window.
    pub fn hourly() -> Self {
        Self::new(Duration::hours(1))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Temporal features for every transaction, indexed like the input.
    pub fn build(&self, transactions: &[Transaction]) -> Vec<TemporalFeatures> {
        let timelines = AccountTimeline::group(transactions);
        debug!(
            accounts = timelines.len(),
            transactions = transactions.len(),
            "Scanning account timelines"
        );

        let scanned: Vec<Vec<(usize, TemporalFeatures)>> = timelines
            .par_iter()
            .map(|timeline| self.scan(transactions, timeline))
            .collect();

        let mut features = vec![TemporalFeatures::default(); transactions.len()];
        for (pos, value) in scanned.into_iter().flatten() {
            features[pos] = value;
        }
        features
    }

    /// Scan one timeline. All transactions sharing a timestamp are admitted
    /// before any of them is counted, so each sees the others.
    fn scan(
        &self,
        transactions: &[Transaction],
        timeline: &AccountTimeline<'_>,
    ) -> Vec<(usize, TemporalFeatures)> {
        let positions = &timeline.positions;
        let mut state = WindowState::new(self.window);
        let mut out = Vec::with_capacity(positions.len());
        let mut gaps = Vec::new();

        let mut start = 0;
        while start < positions.len() {
            let ts = transactions[positions[start]].timestamp;
            let mut end = start;
            gaps.clear();
            while end < positions.len() && transactions[positions[end]].timestamp == ts {
                gaps.push(state.admit(ts));
                end += 1;
            }

            let count = state.count();
            for (offset, &pos) in positions[start..end].iter().enumerate() {
                out.push((
                    pos,
                    TemporalFeatures {
                        trans_freq_hour: count,
                        time_gap_hours: gaps[offset],
                    },
                ));
            }
            start = end;
        }
        out
    }
}

impl Default for TemporalFeatureBuilder {
    fn default() -> Self {
        Self::hourly()
    }
}
