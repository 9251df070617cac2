//! Day-by-day rotation across the eligible pool.
//!
//! Each required day is placed independently with the preceptor carrying the
//! lowest load that day, tie-broken by yearly load then id. Spreading the
//! student across preceptors is the point; no continuity is attempted.

use std::collections::BTreeMap;

use crate::constraints::Candidate;
use crate::domain::calendar::{working_days, year_of};
use crate::ledger::CapacityLedger;

use super::{
    bypass_violations, candidate_pool, merge_reasons, new_assignment, pick_site, PlacementInput,
    PlacementResult, REASON_NO_ELIGIBLE_PRECEPTOR,
};

pub(crate) fn place(input: &PlacementInput<'_>, ledger: &mut CapacityLedger) -> PlacementResult {
    let days = working_days(input.range.0, input.range.1, &input.ctx.blackouts);
    let mut result = PlacementResult::default();
    let mut placed: u32 = 0;
    let mut reasons: BTreeMap<String, u32> = BTreeMap::new();

    let base_pool = candidate_pool(input, ledger);
    if base_pool.is_empty() {
        result.unmet_days = input.days_needed;
        result
            .reasons
            .insert(REASON_NO_ELIGIBLE_PRECEPTOR.to_string(), 1);
        return result;
    }

    for date in days {
        if placed == input.days_needed {
            break;
        }
        let year = year_of(date);
        let mut pool = base_pool.clone();
        pool.sort_by(|a, b| {
            ledger
                .day_count(&a.id, date)
                .cmp(&ledger.day_count(&b.id, date))
                .then_with(|| ledger.year_count(&a.id, year).cmp(&ledger.year_count(&b.id, year)))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut day_reasons: BTreeMap<String, u32> = BTreeMap::new();
        let mut day_placed = false;
        for preceptor in pool {
            let site = pick_site(input.ctx, preceptor, date);
            let candidate = Candidate {
                student: input.student,
                preceptor,
                clerkship: input.clerkship,
                elective: input.elective,
                requirement_type: input.req.requirement_type,
                site_id: site.as_deref(),
                date,
                block_site: None,
                via_fallback: false,
                team: None,
            };
            let eval = input.constraints.evaluate(&candidate, ledger);
            if eval.accepted() {
                ledger.record(&input.student.id, &preceptor.id, date);
                result
                    .violations
                    .extend(bypass_violations(&eval, input.req, &preceptor.id, date));
                result
                    .assignments
                    .push(new_assignment(input.req, &preceptor.id, site, date));
                placed += 1;
                day_placed = true;
                break;
            }
            merge_reasons(&mut day_reasons, &eval.reason_counts());
        }
        if !day_placed {
            merge_reasons(&mut reasons, &day_reasons);
        }
    }

    result.unmet_days = input.days_needed - placed;
    if result.unmet_days > 0 {
        result.reasons = reasons;
    }
    result
}
