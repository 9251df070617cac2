//! In-invocation capacity counters.
//!
//! The ledger is rebuilt at the start of every engine invocation from the
//! assignments that survive regeneration, mutated as strategies place days,
//! and discarded when the invocation ends. Every mutation has an inverse so
//! strategies can tentatively place a run of days and back out.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::calendar::year_of;
use crate::domain::Assignment;

#[derive(Debug, Default, Clone)]
pub struct CapacityLedger {
    day_counts: BTreeMap<(String, NaiveDate), u32>,
    year_counts: BTreeMap<(String, i32), u32>,
    block_counts: BTreeMap<(String, i32), u32>,
    student_days: BTreeSet<(String, NaiveDate)>,
    totals: BTreeMap<String, u32>,
}

impl CapacityLedger {
    /// Seed from existing assignments; cancelled rows do not count.
    pub fn from_assignments<'a, I>(assignments: I) -> Self
    where
        I: IntoIterator<Item = &'a Assignment>,
    {
        let mut ledger = Self::default();
        for a in assignments {
            if a.status.counts() {
                ledger.record(&a.student_id, &a.preceptor_id, a.date);
            }
        }
        ledger
    }

    pub fn record(&mut self, student_id: &str, preceptor_id: &str, date: NaiveDate) {
        *self
            .day_counts
            .entry((preceptor_id.to_string(), date))
            .or_insert(0) += 1;
        *self
            .year_counts
            .entry((preceptor_id.to_string(), year_of(date)))
            .or_insert(0) += 1;
        *self.totals.entry(preceptor_id.to_string()).or_insert(0) += 1;
        self.student_days.insert((student_id.to_string(), date));
    }

    pub fn release(&mut self, student_id: &str, preceptor_id: &str, date: NaiveDate) {
        if let Some(n) = self.day_counts.get_mut(&(preceptor_id.to_string(), date)) {
            *n = n.saturating_sub(1);
        }
        if let Some(n) = self
            .year_counts
            .get_mut(&(preceptor_id.to_string(), year_of(date)))
        {
            *n = n.saturating_sub(1);
        }
        if let Some(n) = self.totals.get_mut(preceptor_id) {
            *n = n.saturating_sub(1);
        }
        self.student_days
            .remove(&(student_id.to_string(), date));
    }

    pub fn record_block(&mut self, preceptor_id: &str, year: i32) {
        *self
            .block_counts
            .entry((preceptor_id.to_string(), year))
            .or_insert(0) += 1;
    }

    pub fn release_block(&mut self, preceptor_id: &str, year: i32) {
        if let Some(n) = self.block_counts.get_mut(&(preceptor_id.to_string(), year)) {
            *n = n.saturating_sub(1);
        }
    }

    pub fn day_count(&self, preceptor_id: &str, date: NaiveDate) -> u32 {
        self.day_counts
            .get(&(preceptor_id.to_string(), date))
            .copied()
            .unwrap_or(0)
    }

    pub fn year_count(&self, preceptor_id: &str, year: i32) -> u32 {
        self.year_counts
            .get(&(preceptor_id.to_string(), year))
            .copied()
            .unwrap_or(0)
    }

    pub fn block_count(&self, preceptor_id: &str, year: i32) -> u32 {
        self.block_counts
            .get(&(preceptor_id.to_string(), year))
            .copied()
            .unwrap_or(0)
    }

    pub fn student_booked(&self, student_id: &str, date: NaiveDate) -> bool {
        self.student_days
            .contains(&(student_id.to_string(), date))
    }

    /// All assignments this preceptor carries so far, used for the
    /// fewest-prior-assignments tie-break.
    pub fn total_for(&self, preceptor_id: &str) -> u32 {
        self.totals.get(preceptor_id).copied().unwrap_or(0)
    }
}
