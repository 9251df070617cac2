//! The four placement strategies.
//!
//! Every strategy has the same contract: given a requirement, the context,
//! the ledger, and the constraint set, produce the assignments it could
//! place. A strategy leaves the ledger updated with exactly the assignments
//! it returns; tentative placements made while searching are released before
//! returning.

pub mod block_based;
pub mod continuous_single;
pub mod daily_rotation;
pub mod team_continuity;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ResolvedConfig;
use crate::constraints::{ConstraintId, ConstraintSet, Evaluation};
use crate::context::SchedulingContext;
use crate::domain::{
    Clerkship, Elective, NewAssignment, Preceptor, Requirement, Strategy, Student,
};
use crate::ledger::CapacityLedger;

/// Reason key for a requirement no preceptor pool could serve at all.
pub const REASON_NO_ELIGIBLE_PRECEPTOR: &str = "no_eligible_preceptor";

/// A constraint outcome worth reporting alongside the schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub constraint: ConstraintId,
    pub message: String,
    pub student_id: String,
    pub preceptor_id: Option<String>,
    pub date: Option<NaiveDate>,
    /// True when the caller's bypass set turned a rejection into a warning.
    pub bypassed: bool,
}

/// What one strategy invocation produced for one requirement.
#[derive(Debug, Default)]
pub struct PlacementResult {
    pub assignments: Vec<NewAssignment>,
    pub unmet_days: u32,
    /// Rejection reasons behind the unmet days, keyed by constraint id.
    pub reasons: BTreeMap<String, u32>,
    pub violations: Vec<Violation>,
}

/// Everything a strategy needs for one requirement.
pub(crate) struct PlacementInput<'a> {
    pub req: &'a Requirement,
    pub student: &'a Student,
    pub clerkship: &'a Clerkship,
    pub elective: Option<&'a Elective>,
    /// Days still to place after crediting.
    pub days_needed: u32,
    pub range: (NaiveDate, NaiveDate),
    pub ctx: &'a SchedulingContext,
    pub config: &'a ResolvedConfig,
    pub constraints: &'a ConstraintSet<'a>,
    pub enable_fallbacks: bool,
}

/// Dispatch to the strategy the resolved config names.
pub(crate) fn place(input: &PlacementInput<'_>, ledger: &mut CapacityLedger) -> PlacementResult {
    match input.config.strategy {
        Strategy::ContinuousSingle => continuous_single::place(input, ledger),
        Strategy::ContinuousTeam => team_continuity::place(input, ledger),
        Strategy::BlockBased => block_based::place(input, ledger),
        Strategy::DailyRotation => daily_rotation::place(input, ledger),
    }
}

// ===== Requirement ordering =====

/// Category rank within a student: inpatient blocks, then outpatient
/// continuous work, then electives, then daily rotation.
fn category_rank(req: &Requirement, strategy: Strategy) -> u8 {
    use crate::domain::RequirementType::*;
    match req.requirement_type {
        Inpatient => 0,
        Outpatient => {
            if strategy == Strategy::DailyRotation {
                3
            } else {
                1
            }
        }
        Elective => 2,
    }
}

/// Order requirements for scheduling. This ordering is part of the contract
/// and must be reproducible: (required_days DESC, student ASC, category ASC,
/// clerkship ASC, elective ASC).
pub fn order_requirements(requirements: &mut [Requirement], ctx: &SchedulingContext) {
    requirements.sort_by(|a, b| {
        let strat_a = ctx
            .config_for(a)
            .map(|c| c.strategy)
            .unwrap_or(Strategy::DailyRotation);
        let strat_b = ctx
            .config_for(b)
            .map(|c| c.strategy)
            .unwrap_or(Strategy::DailyRotation);
        b.required_days
            .cmp(&a.required_days)
            .then_with(|| a.student_id.cmp(&b.student_id))
            .then_with(|| category_rank(a, strat_a).cmp(&category_rank(b, strat_b)))
            .then_with(|| a.clerkship_id.cmp(&b.clerkship_id))
            .then_with(|| a.elective_id.cmp(&b.elective_id))
    });
}

// ===== Shared helpers =====

/// Primary candidate pool for a requirement: preceptors whose team covers
/// the clerkship first, then every preceptor of the student's onboarded
/// health systems; each group ordered by (prior assignments, id). Preceptors
/// reserved as global fallbacks join the tail only when fallbacks apply.
pub(crate) fn candidate_pool<'a>(
    input: &PlacementInput<'a>,
    ledger: &CapacityLedger,
) -> Vec<&'a Preceptor> {
    let ctx = input.ctx;
    let mut pool: Vec<&Preceptor> = Vec::new();
    let mut seen: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();

    let mut team_group: Vec<&Preceptor> = Vec::new();
    for team in ctx.teams_for(&input.clerkship.id) {
        for member in team.members_in_order() {
            if let Some(p) = ctx.preceptors.get(&member.preceptor_id) {
                if !p.is_global_fallback_only && seen.insert(p.id.as_str()) {
                    team_group.push(p);
                }
            }
        }
    }
    sort_by_load(&mut team_group, ledger);
    pool.extend(team_group);

    let mut system_group: Vec<&Preceptor> = ctx
        .preceptors
        .values()
        .filter(|p| {
            !p.is_global_fallback_only
                && input
                    .student
                    .onboarded_health_systems
                    .contains(&p.health_system_id)
                && !seen.contains(p.id.as_str())
        })
        .collect();
    sort_by_load(&mut system_group, ledger);
    for p in &system_group {
        seen.insert(p.id.as_str());
    }
    pool.extend(system_group);

    if input.enable_fallbacks && input.config.allow_fallbacks {
        let mut fallback_group: Vec<&Preceptor> = ctx
            .preceptors
            .values()
            .filter(|p| p.is_global_fallback_only && !seen.contains(p.id.as_str()))
            .collect();
        sort_by_load(&mut fallback_group, ledger);
        pool.extend(fallback_group);
    }

    pool
}

pub(crate) fn sort_by_load(group: &mut [&Preceptor], ledger: &CapacityLedger) {
    group.sort_by(|a, b| {
        ledger
            .total_for(&a.id)
            .cmp(&ledger.total_for(&b.id))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// First site where the preceptor can host on `date`, if any.
pub(crate) fn pick_site(
    ctx: &SchedulingContext,
    preceptor: &Preceptor,
    date: NaiveDate,
) -> Option<String> {
    ctx.availability
        .available_sites(preceptor, date)
        .into_iter()
        .next()
}

/// Turn bypassed-constraint warnings into reportable violations.
pub(crate) fn bypass_violations(
    eval: &Evaluation,
    req: &Requirement,
    preceptor_id: &str,
    date: NaiveDate,
) -> Vec<Violation> {
    eval.bypassed
        .iter()
        .map(|(id, message)| Violation {
            constraint: *id,
            message: message.clone(),
            student_id: req.student_id.clone(),
            preceptor_id: Some(preceptor_id.to_string()),
            date: Some(date),
            bypassed: true,
        })
        .collect()
}

pub(crate) fn merge_reasons(into: &mut BTreeMap<String, u32>, from: &BTreeMap<String, u32>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_insert(0) += count;
    }
}

pub(crate) fn new_assignment(
    req: &Requirement,
    preceptor_id: &str,
    site_id: Option<String>,
    date: NaiveDate,
) -> NewAssignment {
    NewAssignment {
        student_id: req.student_id.clone(),
        preceptor_id: preceptor_id.to_string(),
        clerkship_id: req.clerkship_id.clone(),
        site_id,
        elective_id: req.elective_id.clone(),
        date,
    }
}
