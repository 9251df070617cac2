//! Block scheduling: contiguous runs of working days with one preceptor.
//!
//! The requirement is partitioned into blocks of `block_size_days` working
//! days. Every date inside a block shares one preceptor and one site; the
//! run extends across weekends and blackouts without counting them. When no
//! full block fits and partial blocks are allowed, the longest placeable run
//! is emitted instead. Each placed block counts against the preceptor's
//! blocks-per-year ceiling.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use crate::constraints::Candidate;
use crate::domain::calendar::{working_days, year_of};
use crate::domain::Preceptor;
use crate::ledger::CapacityLedger;

use super::{
    bypass_violations, candidate_pool, merge_reasons, new_assignment, PlacementInput,
    PlacementResult, Violation, REASON_NO_ELIGIBLE_PRECEPTOR,
};

/// Reason key for a preceptor already at their blocks-per-year ceiling.
pub const REASON_MAX_BLOCKS: &str = "max_blocks_per_year";

/// Reason key for a remainder shorter than a block when partial blocks are
/// not allowed.
pub const REASON_PARTIAL_BLOCKS_DISABLED: &str = "partial_blocks_disabled";

struct FoundBlock {
    preceptor_id: String,
    dates: Vec<(NaiveDate, Option<String>)>,
    /// Index one past the last day used, for advancing the cursor.
    end_idx: usize,
    violations: Vec<Violation>,
}

/// One site the preceptor can host at on every date of the window. `None`
/// when the preceptor has no sites configured at all.
fn common_site(
    input: &PlacementInput<'_>,
    preceptor: &Preceptor,
    window: &[NaiveDate],
) -> Result<Option<String>, ()> {
    if preceptor.site_ids.is_empty() {
        return Ok(None);
    }
    let mut common: Option<BTreeSet<String>> = None;
    for date in window {
        let sites: BTreeSet<String> = input
            .ctx
            .availability
            .available_sites(preceptor, *date)
            .into_iter()
            .collect();
        common = Some(match common {
            None => sites,
            Some(prev) => prev.intersection(&sites).cloned().collect(),
        });
    }
    match common.and_then(|c| c.into_iter().next()) {
        Some(site) => Ok(Some(site)),
        None => Err(()),
    }
}

fn try_block(
    input: &PlacementInput<'_>,
    ledger: &mut CapacityLedger,
    preceptor: &Preceptor,
    window: &[NaiveDate],
    reasons: &mut BTreeMap<String, u32>,
) -> Option<(Vec<(NaiveDate, Option<String>)>, Vec<Violation>)> {
    let year = year_of(window[0]);
    if let Some(max_blocks) = input.ctx.capacity.max_blocks_per_year(
        preceptor,
        &input.clerkship.id,
        input.req.requirement_type,
        input.config,
    ) {
        if ledger.block_count(&preceptor.id, year) >= max_blocks {
            *reasons.entry(REASON_MAX_BLOCKS.to_string()).or_insert(0) += 1;
            return None;
        }
    }

    let site = match common_site(input, preceptor, window) {
        Ok(site) => site,
        Err(()) => {
            *reasons
                .entry("preceptor_available".to_string())
                .or_insert(0) += 1;
            return None;
        }
    };

    let mut placed: Vec<(NaiveDate, Option<String>)> = Vec::new();
    let mut violations = Vec::new();
    let mut ok = true;
    for date in window {
        let candidate = Candidate {
            student: input.student,
            preceptor,
            clerkship: input.clerkship,
            elective: input.elective,
            requirement_type: input.req.requirement_type,
            site_id: site.as_deref(),
            date: *date,
            block_site: if placed.is_empty() {
                None
            } else {
                site.as_deref()
            },
            via_fallback: false,
            team: None,
        };
        let eval = input.constraints.evaluate(&candidate, ledger);
        if eval.accepted() {
            ledger.record(&input.student.id, &preceptor.id, *date);
            violations.extend(bypass_violations(&eval, input.req, &preceptor.id, *date));
            placed.push((*date, site.clone()));
        } else {
            merge_reasons(reasons, &eval.reason_counts());
            ok = false;
            break;
        }
    }

    for (date, _) in &placed {
        ledger.release(&input.student.id, &preceptor.id, *date);
    }
    if ok {
        Some((placed, violations))
    } else {
        None
    }
}

/// Find the earliest-starting block of `len` working days any pool preceptor
/// can cover in full.
fn find_block(
    input: &PlacementInput<'_>,
    ledger: &mut CapacityLedger,
    days: &[NaiveDate],
    from_idx: usize,
    len: usize,
    prefer: Option<&str>,
    reasons: &mut BTreeMap<String, u32>,
) -> Option<FoundBlock> {
    if len == 0 || from_idx + len > days.len() {
        return None;
    }
    let pool = candidate_pool(input, ledger);
    for start in from_idx..=(days.len() - len) {
        let window = &days[start..start + len];

        let mut ordered: Vec<&Preceptor> = Vec::new();
        if let Some(prev_id) = prefer {
            if input.config.prefer_continuous_blocks {
                if let Some(prev) = pool.iter().find(|p| p.id == prev_id) {
                    ordered.push(*prev);
                }
            }
        }
        for p in &pool {
            if ordered.iter().all(|o| o.id != p.id) {
                ordered.push(*p);
            }
        }

        for preceptor in ordered {
            if let Some((dates, violations)) = try_block(input, ledger, preceptor, window, reasons)
            {
                return Some(FoundBlock {
                    preceptor_id: preceptor.id.clone(),
                    dates,
                    end_idx: start + len,
                    violations,
                });
            }
        }
    }
    None
}

fn commit(
    input: &PlacementInput<'_>,
    ledger: &mut CapacityLedger,
    found: &FoundBlock,
    result: &mut PlacementResult,
) {
    for (date, site) in &found.dates {
        ledger.record(&input.student.id, &found.preceptor_id, *date);
        result.assignments.push(new_assignment(
            input.req,
            &found.preceptor_id,
            site.clone(),
            *date,
        ));
    }
    ledger.record_block(&found.preceptor_id, year_of(found.dates[0].0));
    result.violations.extend(found.violations.iter().cloned());
}

pub(crate) fn place(input: &PlacementInput<'_>, ledger: &mut CapacityLedger) -> PlacementResult {
    let days = working_days(input.range.0, input.range.1, &input.ctx.blackouts);
    let block_size = input
        .config
        .block_size_days
        .unwrap_or(input.days_needed)
        .max(1);

    let mut result = PlacementResult::default();
    let mut reasons: BTreeMap<String, u32> = BTreeMap::new();
    let mut remaining = input.days_needed;
    let mut cursor = 0usize;
    let mut prev: Option<String> = None;

    while remaining > 0 && cursor < days.len() {
        if remaining < block_size && !input.config.allow_partial_blocks {
            *reasons
                .entry(REASON_PARTIAL_BLOCKS_DISABLED.to_string())
                .or_insert(0) += 1;
            break;
        }
        let want = remaining.min(block_size) as usize;
        let found = find_block(
            input,
            ledger,
            &days,
            cursor,
            want,
            prev.as_deref(),
            &mut reasons,
        );
        let found = match found {
            Some(f) => Some(f),
            None if input.config.allow_partial_blocks && want > 1 => {
                // No full block fits; fall back to the longest placeable run.
                let mut shorter = None;
                for len in (1..want).rev() {
                    if let Some(f) = find_block(
                        input,
                        ledger,
                        &days,
                        cursor,
                        len,
                        prev.as_deref(),
                        &mut reasons,
                    ) {
                        shorter = Some(f);
                        break;
                    }
                }
                shorter
            }
            None => None,
        };

        match found {
            Some(block) => {
                remaining -= block.dates.len() as u32;
                cursor = block.end_idx;
                prev = Some(block.preceptor_id.clone());
                commit(input, ledger, &block, &mut result);
            }
            None => break,
        }
    }

    result.unmet_days = remaining;
    if remaining > 0 {
        if reasons.is_empty() {
            reasons.insert(REASON_NO_ELIGIBLE_PRECEPTOR.to_string(), 1);
        }
        result.reasons = reasons;
    }
    result
}
