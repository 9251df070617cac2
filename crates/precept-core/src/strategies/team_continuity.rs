//! Team-based continuity: a primary preceptor with in-team fallbacks.
//!
//! One team is selected for the whole requirement; each date goes to the
//! highest-priority team member who can host it. Only when no member can
//! take a date does the scan widen to other teams of the clerkship (and the
//! global fallback pool), which the team-membership predicate accepts only
//! when cross-team fallback is permitted.

use std::collections::BTreeMap;

use crate::constraints::Candidate;
use crate::domain::calendar::working_days;
use crate::domain::{Preceptor, Team};
use crate::ledger::CapacityLedger;

use super::{
    bypass_violations, merge_reasons, new_assignment, pick_site, PlacementInput, PlacementResult,
    REASON_NO_ELIGIBLE_PRECEPTOR,
};

/// Team formation rules, checked against the team's primary member.
fn passes_formation(team: &Team, primary: &Preceptor, candidate: &Preceptor) -> bool {
    if team.require_same_health_system && candidate.health_system_id != primary.health_system_id {
        return false;
    }
    if team.require_same_specialty && candidate.specialty != primary.specialty {
        return false;
    }
    if team.require_same_site
        && !team.site_ids.is_empty()
        && !candidate
            .site_ids
            .iter()
            .any(|s| team.site_ids.contains(s))
    {
        return false;
    }
    true
}

/// In-team candidates in priority order, formation rules applied.
fn team_candidates<'a>(
    input: &PlacementInput<'a>,
    team: &'a Team,
) -> Vec<&'a Preceptor> {
    let primary = team
        .primary()
        .and_then(|m| input.ctx.preceptors.get(&m.preceptor_id));
    let Some(primary) = primary else {
        return Vec::new();
    };
    team.members_in_order()
        .iter()
        .filter_map(|m| input.ctx.preceptors.get(&m.preceptor_id))
        .filter(|p| passes_formation(team, primary, p))
        .collect()
}

/// Cross-team and global fallback candidates, deduplicated against the
/// selected team.
fn fallback_candidates<'a>(
    input: &PlacementInput<'a>,
    selected: &'a Team,
) -> Vec<&'a Preceptor> {
    let primary = selected
        .primary()
        .and_then(|m| input.ctx.preceptors.get(&m.preceptor_id));
    let Some(primary) = primary else {
        return Vec::new();
    };
    let in_selected: Vec<&str> = selected
        .members
        .iter()
        .map(|m| m.preceptor_id.as_str())
        .collect();

    let mut seen: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    let mut out: Vec<&Preceptor> = Vec::new();
    for team in input.ctx.teams_for(&input.clerkship.id) {
        if team.id == selected.id {
            continue;
        }
        for member in team.members_in_order() {
            if in_selected.contains(&member.preceptor_id.as_str()) {
                continue;
            }
            if let Some(p) = input.ctx.preceptors.get(&member.preceptor_id) {
                if passes_formation(selected, primary, p) && seen.insert(p.id.as_str()) {
                    out.push(p);
                }
            }
        }
    }

    let mut globals: Vec<&Preceptor> = input
        .ctx
        .preceptors
        .values()
        .filter(|p| {
            p.is_global_fallback_only
                && !in_selected.contains(&p.id.as_str())
                && !seen.contains(p.id.as_str())
                && passes_formation(selected, primary, p)
        })
        .collect();
    globals.sort_by(|a, b| a.id.cmp(&b.id));
    out.extend(globals);
    out
}

fn evaluate_and_place(
    input: &PlacementInput<'_>,
    ledger: &mut CapacityLedger,
    team: &Team,
    preceptor: &Preceptor,
    date: chrono::NaiveDate,
    via_fallback: bool,
    result: &mut PlacementResult,
    day_reasons: &mut BTreeMap<String, u32>,
) -> bool {
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
        via_fallback,
        team: Some(team),
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
        true
    } else {
        merge_reasons(day_reasons, &eval.reason_counts());
        false
    }
}

/// True if at least one member can host the student on some working day.
fn team_can_host(
    input: &PlacementInput<'_>,
    ledger: &CapacityLedger,
    team: &Team,
    days: &[chrono::NaiveDate],
) -> bool {
    let candidates = team_candidates(input, team);
    for date in days {
        for preceptor in &candidates {
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
                team: Some(team),
            };
            if input.constraints.evaluate(&candidate, ledger).accepted() {
                return true;
            }
        }
    }
    false
}

pub(crate) fn place(input: &PlacementInput<'_>, ledger: &mut CapacityLedger) -> PlacementResult {
    let days = working_days(input.range.0, input.range.1, &input.ctx.blackouts);
    let mut result = PlacementResult::default();
    let mut reasons: BTreeMap<String, u32> = BTreeMap::new();

    let teams = input.ctx.teams_for(&input.clerkship.id);
    let selected = teams
        .iter()
        .find(|t| team_can_host(input, ledger, t, &days));
    let Some(team) = selected else {
        result.unmet_days = input.days_needed;
        result
            .reasons
            .insert(REASON_NO_ELIGIBLE_PRECEPTOR.to_string(), 1);
        return result;
    };

    let members = team_candidates(input, team);
    let fallbacks = if input.enable_fallbacks && input.config.allow_fallbacks {
        fallback_candidates(input, team)
    } else {
        Vec::new()
    };

    let mut placed: u32 = 0;
    for date in days {
        if placed == input.days_needed {
            break;
        }
        let mut day_reasons: BTreeMap<String, u32> = BTreeMap::new();
        let mut day_placed = false;

        for preceptor in &members {
            if evaluate_and_place(
                input, ledger, team, preceptor, date, false, &mut result, &mut day_reasons,
            ) {
                day_placed = true;
                break;
            }
        }
        if !day_placed {
            for preceptor in &fallbacks {
                if evaluate_and_place(
                    input, ledger, team, preceptor, date, true, &mut result, &mut day_reasons,
                ) {
                    day_placed = true;
                    break;
                }
            }
        }
        if day_placed {
            placed += 1;
        } else {
            merge_reasons(&mut reasons, &day_reasons);
        }
    }

    result.unmet_days = input.days_needed - placed;
    if result.unmet_days > 0 {
        result.reasons = reasons;
    }
    result
}
