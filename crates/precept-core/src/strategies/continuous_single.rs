//! One preceptor for the whole requirement.
//!
//! Searches the candidate pool for a preceptor able to host the student on
//! `days_needed` consecutive working days. A candidate's coverage is a
//! prefix: scanning stops at the first rejected day after placement starts,
//! so a full run is genuinely contiguous across working days. If nobody can
//! cover the full length, the longest prefix wins and the remainder is
//! reported unmet.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::constraints::Candidate;
use crate::domain::calendar::working_days;
use crate::domain::Preceptor;
use crate::ledger::CapacityLedger;

use super::{
    bypass_violations, candidate_pool, merge_reasons, new_assignment, pick_site, PlacementInput,
    PlacementResult, Violation, REASON_NO_ELIGIBLE_PRECEPTOR,
};

struct Attempt {
    preceptor_id: String,
    placed: Vec<(NaiveDate, Option<String>)>,
    violations: Vec<Violation>,
}

/// Scan the working days for `preceptor`, tentatively recording placements.
/// The ledger is always restored before returning.
fn try_preceptor(
    input: &PlacementInput<'_>,
    ledger: &mut CapacityLedger,
    preceptor: &Preceptor,
    days: &[NaiveDate],
    reasons: &mut BTreeMap<String, u32>,
) -> Attempt {
    let mut placed: Vec<(NaiveDate, Option<String>)> = Vec::new();
    let mut violations = Vec::new();

    for date in days {
        if placed.len() as u32 == input.days_needed {
            break;
        }
        let site = pick_site(input.ctx, preceptor, *date);
        let candidate = Candidate {
            student: input.student,
            preceptor,
            clerkship: input.clerkship,
            elective: input.elective,
            requirement_type: input.req.requirement_type,
            site_id: site.as_deref(),
            date: *date,
            block_site: None,
            via_fallback: false,
            team: None,
        };
        let eval = input.constraints.evaluate(&candidate, ledger);
        if eval.accepted() {
            ledger.record(&input.student.id, &preceptor.id, *date);
            violations.extend(bypass_violations(&eval, input.req, &preceptor.id, *date));
            placed.push((*date, site));
        } else {
            merge_reasons(reasons, &eval.reason_counts());
            if !placed.is_empty() {
                break;
            }
        }
    }

    for (date, _) in &placed {
        ledger.release(&input.student.id, &preceptor.id, *date);
    }

    Attempt {
        preceptor_id: preceptor.id.clone(),
        placed,
        violations,
    }
}

pub(crate) fn place(input: &PlacementInput<'_>, ledger: &mut CapacityLedger) -> PlacementResult {
    let days = working_days(input.range.0, input.range.1, &input.ctx.blackouts);
    let pool = candidate_pool(input, ledger);
    let mut reasons: BTreeMap<String, u32> = BTreeMap::new();

    let mut best: Option<Attempt> = None;
    for preceptor in &pool {
        let attempt = try_preceptor(input, ledger, preceptor, &days, &mut reasons);
        let full = attempt.placed.len() as u32 == input.days_needed;
        if best
            .as_ref()
            .map_or(true, |b| attempt.placed.len() > b.placed.len())
        {
            best = Some(attempt);
        }
        if full {
            break;
        }
    }

    let mut result = PlacementResult::default();
    match best {
        Some(attempt) if !attempt.placed.is_empty() => {
            for (date, site) in &attempt.placed {
                ledger.record(&input.student.id, &attempt.preceptor_id, *date);
                result.assignments.push(new_assignment(
                    input.req,
                    &attempt.preceptor_id,
                    site.clone(),
                    *date,
                ));
            }
            result.violations = attempt.violations;
            result.unmet_days = input.days_needed - attempt.placed.len() as u32;
        }
        _ => {
            result.unmet_days = input.days_needed;
            if pool.is_empty() {
                reasons.insert(REASON_NO_ELIGIBLE_PRECEPTOR.to_string(), 1);
            }
        }
    }
    if result.unmet_days > 0 {
        result.reasons = reasons;
    }
    result
}
