//! Per-preceptor calendar of (date, site) availability.
//!
//! A preceptor with no explicit records at all is treated as always
//! available. Once any record exists for a preceptor, availability becomes
//! explicit-only: a (site, date) pair without a `true` record is unavailable.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{Availability, Preceptor};

#[derive(Debug, Default)]
pub struct AvailabilityIndex {
    records: BTreeMap<(String, String, NaiveDate), bool>,
    has_records: BTreeSet<String>,
}

impl AvailabilityIndex {
    pub fn from_records(records: &[Availability]) -> Self {
        let mut index = Self::default();
        for record in records {
            index.has_records.insert(record.preceptor_id.clone());
            index.records.insert(
                (
                    record.preceptor_id.clone(),
                    record.site_id.clone(),
                    record.date,
                ),
                record.is_available,
            );
        }
        index
    }

    pub fn has_any_record(&self, preceptor_id: &str) -> bool {
        self.has_records.contains(preceptor_id)
    }

    /// Availability of a preceptor at a site on a date. A `None` site asks
    /// whether the preceptor is available at any site that day.
    pub fn is_available(&self, preceptor: &Preceptor, site_id: Option<&str>, date: NaiveDate) -> bool {
        if !self.has_any_record(&preceptor.id) {
            return true;
        }
        match site_id {
            Some(site) => {
                self.records
                    .get(&(preceptor.id.clone(), site.to_string(), date))
                    .copied()
                    == Some(true)
            }
            None => preceptor
                .site_ids
                .iter()
                .any(|s| {
                    self.records
                        .get(&(preceptor.id.clone(), s.clone(), date))
                        .copied()
                        == Some(true)
                }),
        }
    }

    /// Sites where the preceptor can host on `date`, in site-id order. With
    /// no explicit records this is every site the preceptor works at.
    pub fn available_sites(&self, preceptor: &Preceptor, date: NaiveDate) -> Vec<String> {
        let mut sites: Vec<String> = if self.has_any_record(&preceptor.id) {
            preceptor
                .site_ids
                .iter()
                .filter(|s| {
                    self.records
                        .get(&(preceptor.id.clone(), (*s).clone(), date))
                        .copied()
                        == Some(true)
                })
                .cloned()
                .collect()
        } else {
            preceptor.site_ids.clone()
        };
        sites.sort();
        sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn preceptor(id: &str, sites: &[&str]) -> Preceptor {
        Preceptor {
            id: id.into(),
            name: id.into(),
            specialty: None,
            health_system_id: "hs1".into(),
            site_ids: sites.iter().map(|s| s.to_string()).collect(),
            max_students: 2,
            is_global_fallback_only: false,
        }
    }

    #[test]
    fn test_no_records_means_always_available() {
        let index = AvailabilityIndex::from_records(&[]);
        let p = preceptor("p1", &["s1"]);
        assert!(index.is_available(&p, Some("s1"), d("2026-01-05")));
        assert!(index.is_available(&p, None, d("2026-01-05")));
        assert_eq!(index.available_sites(&p, d("2026-01-05")), vec!["s1"]);
    }

    #[test]
    fn test_any_record_makes_availability_explicit_only() {
        let records = vec![Availability {
            preceptor_id: "p1".into(),
            site_id: "s1".into(),
            date: d("2026-01-05"),
            is_available: true,
        }];
        let index = AvailabilityIndex::from_records(&records);
        let p = preceptor("p1", &["s1", "s2"]);
        assert!(index.is_available(&p, Some("s1"), d("2026-01-05")));
        // No record for the 6th: unavailable.
        assert!(!index.is_available(&p, Some("s1"), d("2026-01-06")));
        // No record for site s2 on the 5th either.
        assert!(!index.is_available(&p, Some("s2"), d("2026-01-05")));
        assert_eq!(index.available_sites(&p, d("2026-01-05")), vec!["s1"]);
    }

    #[test]
    fn test_explicit_false_record() {
        let records = vec![Availability {
            preceptor_id: "p1".into(),
            site_id: "s1".into(),
            date: d("2026-01-05"),
            is_available: false,
        }];
        let index = AvailabilityIndex::from_records(&records);
        let p = preceptor("p1", &["s1"]);
        assert!(!index.is_available(&p, Some("s1"), d("2026-01-05")));
        assert!(!index.is_available(&p, None, d("2026-01-05")));
    }
}
