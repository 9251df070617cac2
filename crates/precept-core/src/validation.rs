//! Constraint evaluation for persisted assignment rows.
//!
//! Regeneration (minimal-change classification), the editing operations and
//! the schedule validation report all run this same pipeline, so a row is
//! judged identically no matter which surface asks.

use chrono::NaiveDate;
use std::collections::BTreeSet;

use crate::constraints::{Candidate, ConstraintSet, Evaluation};
use crate::context::{EntityBundle, SchedulingContext};
use crate::domain::{Assignment, CoreError, RequirementType};
use crate::ledger::CapacityLedger;

/// Evaluate `row` as if it were assigned to `preceptor_id` on `date`.
///
/// The ledger must not contain the row itself. A dangling reference (student,
/// preceptor, clerkship or elective gone) evaluates as a plain rejection-free
/// `None`, letting callers treat it as invalid without a hard error.
pub(crate) fn evaluate_row(
    ctx: &SchedulingContext,
    bundle: &EntityBundle,
    ledger: &CapacityLedger,
    row: &Assignment,
    preceptor_id: &str,
    date: NaiveDate,
    window: (NaiveDate, NaiveDate),
) -> Result<Option<Evaluation>, CoreError> {
    let Some(student) = ctx.students.get(&row.student_id) else {
        return Ok(None);
    };
    let Some(preceptor) = ctx.preceptors.get(preceptor_id) else {
        return Ok(None);
    };
    let Some(clerkship) = ctx.clerkships.get(&row.clerkship_id) else {
        return Ok(None);
    };
    let elective = match &row.elective_id {
        Some(id) => match ctx.electives.get(id) {
            Some(e) => Some(e),
            None => return Ok(None),
        },
        None => None,
    };
    let requirement_type = match elective {
        Some(_) => RequirementType::Elective,
        None => clerkship.clerkship_type.into(),
    };

    let config = ctx.config_for_clerkship(
        &row.clerkship_id,
        requirement_type,
        &bundle.defaults,
        &bundle.config_overrides,
    )?;

    let bypass = BTreeSet::new();
    let constraints = ConstraintSet::new(
        window,
        &ctx.blackouts,
        &ctx.availability,
        &ctx.capacity,
        &config,
        &bypass,
    );

    // The row's own site only applies when nothing moved; otherwise any site
    // the preceptor can host at that day stands in.
    let site = if preceptor_id == row.preceptor_id && date == row.date {
        row.site_id.clone().or_else(|| {
            ctx.availability
                .available_sites(preceptor, date)
                .into_iter()
                .next()
        })
    } else {
        ctx.availability
            .available_sites(preceptor, date)
            .into_iter()
            .next()
    };

    let candidate = Candidate {
        student,
        preceptor,
        clerkship,
        elective,
        requirement_type,
        site_id: site.as_deref(),
        date,
        block_site: None,
        via_fallback: false,
        team: None,
    };
    Ok(Some(constraints.evaluate(&candidate, ledger)))
}
