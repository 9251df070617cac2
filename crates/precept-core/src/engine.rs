//! The scheduling engine: orders requirements, dispatches strategies,
//! aggregates unmet requirements and violations.
//!
//! The engine never aborts on an unplaceable requirement; it emits an
//! `UnmetRequirement` and continues. It aborts only on invalid configuration
//! or a corrupt context. All state it mutates is local to the invocation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::constraints::{ConstraintId, ConstraintSet};
use crate::context::SchedulingContext;
use crate::domain::{
    Assignment, CoreError, NewAssignment, RequirementKey, Strategy,
};
use crate::ledger::CapacityLedger;
use crate::ports::Clock;
use crate::strategies::{self, PlacementInput, Violation};

/// Reason key for requirements skipped because the wall-clock deadline
/// passed.
pub const REASON_DEADLINE_EXCEEDED: &str = "deadline_exceeded";

/// Cooperative cancellation flag, checked between requirements. Placement of
/// one requirement is the atomic unit; mid-requirement cancellation is not
/// supported.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub enable_team_formation: bool,
    pub enable_fallbacks: bool,
    pub bypassed_constraints: BTreeSet<ConstraintId>,
    /// Assignments committed to the ledger before any placement runs.
    pub preserved: Vec<Assignment>,
    /// Past-assignment credits reducing each requirement's effective days.
    pub credits: BTreeMap<RequirementKey, u32>,
    pub deadline: Option<DateTime<Utc>>,
    pub cancel: Option<CancelToken>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            enable_team_formation: true,
            enable_fallbacks: true,
            bypassed_constraints: BTreeSet::new(),
            preserved: Vec::new(),
            credits: BTreeMap::new(),
            deadline: None,
            cancel: None,
        }
    }
}

/// A requirement the engine could not fully satisfy. A first-class result
/// element, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmetRequirement {
    pub student_id: String,
    pub clerkship_id: String,
    pub elective_id: Option<String>,
    pub days_requested: u32,
    pub days_placed: u32,
    /// Rejection reasons keyed by constraint id (or a reason keyword).
    pub reasons: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub total_assignments: u32,
    pub total_unmet_days: u32,
    pub total_violations: u32,
    pub strategies_used: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    pub assignments: Vec<NewAssignment>,
    pub unmet: Vec<UnmetRequirement>,
    pub violations: Vec<Violation>,
    pub summary: ScheduleSummary,
}

/// Run every requirement in the context through its strategy over
/// `[range.0, range.1]`.
pub fn run(
    ctx: &SchedulingContext,
    range: (NaiveDate, NaiveDate),
    options: &EngineOptions,
    clock: &dyn Clock,
) -> Result<ScheduleOutcome, CoreError> {
    let existing_ids: BTreeSet<&str> = ctx.existing.iter().map(|a| a.id.as_str()).collect();
    let mut ledger = CapacityLedger::from_assignments(
        ctx.existing.iter().chain(
            options
                .preserved
                .iter()
                .filter(|a| !existing_ids.contains(a.id.as_str())),
        ),
    );

    let mut requirements = ctx.requirements.clone();
    strategies::order_requirements(&mut requirements, ctx);

    let mut outcome = ScheduleOutcome::default();

    for req in &requirements {
        let credit = options.credits.get(&req.key()).copied().unwrap_or(0);
        let days_needed = req.required_days.saturating_sub(credit);
        if days_needed == 0 {
            continue;
        }

        if options
            .cancel
            .as_ref()
            .map_or(false, CancelToken::is_cancelled)
        {
            return Err(CoreError::Cancelled);
        }

        if options.deadline.map_or(false, |d| clock.now() >= d) {
            outcome.unmet.push(UnmetRequirement {
                student_id: req.student_id.clone(),
                clerkship_id: req.clerkship_id.clone(),
                elective_id: req.elective_id.clone(),
                days_requested: days_needed,
                days_placed: 0,
                reasons: [(REASON_DEADLINE_EXCEEDED.to_string(), 1)].into_iter().collect(),
            });
            outcome.summary.total_unmet_days += days_needed;
            continue;
        }

        let student = ctx.students.get(&req.student_id).ok_or_else(|| {
            CoreError::Fatal(format!("requirement references unknown student {}", req.student_id))
        })?;
        let clerkship = ctx.clerkships.get(&req.clerkship_id).ok_or_else(|| {
            CoreError::Fatal(format!(
                "requirement references unknown clerkship {}",
                req.clerkship_id
            ))
        })?;
        let elective = match &req.elective_id {
            Some(id) => Some(ctx.electives.get(id).ok_or_else(|| {
                CoreError::Fatal(format!("requirement references unknown elective {}", id))
            })?),
            None => None,
        };

        let mut config = ctx.config_for(req)?.clone();
        // Team continuity degrades to a single continuous preceptor when
        // team formation is disabled or the clerkship has no teams.
        if config.strategy == Strategy::ContinuousTeam
            && (!options.enable_team_formation || ctx.teams_for(&req.clerkship_id).is_empty())
        {
            config.strategy = Strategy::ContinuousSingle;
        }

        let constraints = ConstraintSet::new(
            range,
            &ctx.blackouts,
            &ctx.availability,
            &ctx.capacity,
            &config,
            &options.bypassed_constraints,
        );

        let input = PlacementInput {
            req,
            student,
            clerkship,
            elective,
            days_needed,
            range,
            ctx,
            config: &config,
            constraints: &constraints,
            enable_fallbacks: options.enable_fallbacks,
        };

        let result = strategies::place(&input, &mut ledger);
        debug!(
            student = %req.student_id,
            clerkship = %req.clerkship_id,
            strategy = %config.strategy,
            placed = result.assignments.len(),
            unmet = result.unmet_days,
            "requirement placed"
        );

        outcome.summary.total_assignments += result.assignments.len() as u32;
        outcome.summary.total_unmet_days += result.unmet_days;
        outcome
            .summary
            .strategies_used
            .insert(config.strategy.as_str().to_string());
        if result.unmet_days > 0 {
            outcome.unmet.push(UnmetRequirement {
                student_id: req.student_id.clone(),
                clerkship_id: req.clerkship_id.clone(),
                elective_id: req.elective_id.clone(),
                days_requested: days_needed,
                days_placed: days_needed - result.unmet_days,
                reasons: result.reasons,
            });
        }
        outcome.assignments.extend(result.assignments);
        outcome.violations.extend(result.violations);
    }

    outcome.summary.total_violations = outcome.violations.len() as u32;
    Ok(outcome)
}
