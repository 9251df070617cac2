//! Editing operations over persisted assignments: reassign, swap, date or
//! status changes, and a whole-schedule validation report.
//!
//! Every operation runs the same constraint pipeline the engine uses.
//! Dry runs report the verdict without mutating; rejected edits never write.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::context::{EntityBundle, SchedulingContext};
use crate::domain::{Assignment, AssignmentStatus, CoreError, SchedulingPeriod};
use crate::ledger::CapacityLedger;
use crate::ports::{Clock, MutationBatch, SchedulingStore};
use crate::retry::{with_backoff, RetryPolicy};
use crate::strategies::Violation;
use crate::validation::evaluate_row;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<Violation>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }
}

/// Patch for `update_assignment`.
#[derive(Debug, Clone, Default)]
pub struct AssignmentPatch {
    pub date: Option<NaiveDate>,
    pub status: Option<AssignmentStatus>,
}

pub struct EditingService<S: SchedulingStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

struct Loaded {
    period: SchedulingPeriod,
    bundle: EntityBundle,
    assignments: Vec<Assignment>,
}

impl<S: SchedulingStore + ?Sized> EditingService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    async fn load(&self, period_id: &str) -> anyhow::Result<Loaded> {
        let store = &self.store;
        let period_id_owned = period_id.to_string();
        let period = with_backoff(self.retry, || store.load_period(&period_id_owned))
            .await?
            .ok_or_else(|| CoreError::not_found("scheduling_period", period_id))?;
        let bundle = with_backoff(self.retry, || store.load_entities(&period)).await?;
        let assignments = with_backoff(self.retry, || {
            store.load_assignments(period.start_date, period.end_date)
        })
        .await?;
        Ok(Loaded {
            period,
            bundle,
            assignments,
        })
    }

    /// Validate and optionally apply a preceptor change on one assignment.
    #[instrument(skip(self))]
    pub async fn reassign(
        &self,
        period_id: &str,
        assignment_id: &str,
        new_preceptor_id: &str,
        dry_run: bool,
    ) -> anyhow::Result<ValidationResult> {
        let loaded = self.load(period_id).await?;
        let (row, others) = take_row(loaded.assignments, assignment_id)?;

        let ctx = SchedulingContext::build(loaded.period.clone(), &loaded.bundle, others)?;
        let ledger = CapacityLedger::from_assignments(ctx.existing.iter());
        let window = (loaded.period.start_date, loaded.period.end_date);

        let eval = evaluate_row(
            &ctx,
            &loaded.bundle,
            &ledger,
            &row,
            new_preceptor_id,
            row.date,
            window,
        )?
        .ok_or_else(|| CoreError::not_found("preceptor", new_preceptor_id))?;
        let result = verdict(eval, &row, new_preceptor_id);
        if !result.valid || dry_run {
            return Ok(result);
        }

        let mut updated = row;
        updated.preceptor_id = new_preceptor_id.to_string();
        updated.site_id = site_for(&ctx, new_preceptor_id, updated.date);
        updated.updated_at = self.clock.now();
        self.apply_updates(vec![updated]).await?;
        Ok(result)
    }

    /// Swap the preceptors of two assignments; rejects atomically if either
    /// resulting assignment violates a predicate.
    #[instrument(skip(self))]
    pub async fn swap(
        &self,
        period_id: &str,
        assignment_id_1: &str,
        assignment_id_2: &str,
        dry_run: bool,
    ) -> anyhow::Result<ValidationResult> {
        let loaded = self.load(period_id).await?;
        let (row1, rest) = take_row(loaded.assignments, assignment_id_1)?;
        let (row2, others) = take_row(rest, assignment_id_2)?;

        let ctx = SchedulingContext::build(loaded.period.clone(), &loaded.bundle, others)?;
        let window = (loaded.period.start_date, loaded.period.end_date);

        // Validate each resulting assignment with the other swap already in
        // the ledger, so mutual conflicts surface.
        let mut errors = Vec::new();
        for (row, new_preceptor, counterpart, counterpart_preceptor) in [
            (&row1, &row2.preceptor_id, &row2, &row1.preceptor_id),
            (&row2, &row1.preceptor_id, &row1, &row2.preceptor_id),
        ] {
            let mut ledger = CapacityLedger::from_assignments(ctx.existing.iter());
            if counterpart.status.counts() {
                ledger.record(&counterpart.student_id, counterpart_preceptor, counterpart.date);
            }
            let eval = evaluate_row(
                &ctx,
                &loaded.bundle,
                &ledger,
                row,
                new_preceptor,
                row.date,
                window,
            )?
            .ok_or_else(|| CoreError::not_found("assignment reference", row.id.clone()))?;
            let v = verdict(eval, row, new_preceptor);
            errors.extend(v.errors);
        }
        if !errors.is_empty() {
            return Ok(ValidationResult {
                valid: false,
                errors,
            });
        }
        if dry_run {
            return Ok(ValidationResult::ok());
        }

        let now = self.clock.now();
        let mut updated1 = row1.clone();
        let mut updated2 = row2.clone();
        updated1.preceptor_id = row2.preceptor_id.clone();
        updated2.preceptor_id = row1.preceptor_id.clone();
        updated1.site_id = site_for(&ctx, &updated1.preceptor_id, updated1.date);
        updated2.site_id = site_for(&ctx, &updated2.preceptor_id, updated2.date);
        updated1.updated_at = now;
        updated2.updated_at = now;
        self.apply_updates(vec![updated1, updated2]).await?;
        Ok(ValidationResult::ok())
    }

    /// Move an assignment to a new date and/or change its status, with
    /// revalidation when the date changes.
    #[instrument(skip(self))]
    pub async fn update_assignment(
        &self,
        period_id: &str,
        assignment_id: &str,
        patch: AssignmentPatch,
        dry_run: bool,
    ) -> anyhow::Result<ValidationResult> {
        let loaded = self.load(period_id).await?;
        let (row, others) = take_row(loaded.assignments, assignment_id)?;

        let new_date = patch.date.unwrap_or(row.date);
        let mut new_site = row.site_id.clone();
        let result = if new_date != row.date {
            let ctx = SchedulingContext::build(loaded.period.clone(), &loaded.bundle, others)?;
            let ledger = CapacityLedger::from_assignments(ctx.existing.iter());
            let window = (loaded.period.start_date, loaded.period.end_date);
            let eval = evaluate_row(
                &ctx,
                &loaded.bundle,
                &ledger,
                &row,
                &row.preceptor_id,
                new_date,
                window,
            )?
            .ok_or_else(|| CoreError::not_found("assignment reference", assignment_id))?;
            new_site = site_for(&ctx, &row.preceptor_id, new_date);
            verdict(eval, &row, &row.preceptor_id)
        } else {
            ValidationResult::ok()
        };

        if !result.valid || dry_run {
            return Ok(result);
        }

        let mut updated = row;
        updated.date = new_date;
        updated.site_id = new_site;
        if let Some(status) = patch.status {
            updated.status = status;
        }
        updated.updated_at = self.clock.now();
        self.apply_updates(vec![updated]).await?;
        Ok(result)
    }

    /// Run the constraint pipeline over every persisted assignment of the
    /// period and report violations without mutating anything.
    #[instrument(skip(self))]
    pub async fn validate_schedule(&self, period_id: &str) -> anyhow::Result<Vec<Violation>> {
        let loaded = self.load(period_id).await?;
        let ctx =
            SchedulingContext::build(loaded.period.clone(), &loaded.bundle, loaded.assignments)?;
        let window = (loaded.period.start_date, loaded.period.end_date);

        let mut rows: Vec<&Assignment> = ctx.existing.iter().collect();
        rows.sort_by(|a, b| (a.date, &a.id).cmp(&(b.date, &b.id)));

        let full_ledger = CapacityLedger::from_assignments(ctx.existing.iter());
        let mut violations = Vec::new();
        for row in rows {
            if !row.status.counts() {
                continue;
            }
            // Judge each row with itself removed from the counts.
            let mut ledger = full_ledger.clone();
            ledger.release(&row.student_id, &row.preceptor_id, row.date);
            let eval = evaluate_row(
                &ctx,
                &loaded.bundle,
                &ledger,
                row,
                &row.preceptor_id,
                row.date,
                window,
            )?;
            match eval {
                Some(eval) => {
                    for (constraint, message) in eval.rejections {
                        violations.push(Violation {
                            constraint,
                            message,
                            student_id: row.student_id.clone(),
                            preceptor_id: Some(row.preceptor_id.clone()),
                            date: Some(row.date),
                            bypassed: false,
                        });
                    }
                }
                None => {
                    tracing::warn!(assignment = %row.id, "assignment references entities no longer present");
                }
            }
        }
        Ok(violations)
    }

    async fn apply_updates(&self, updates: Vec<Assignment>) -> anyhow::Result<()> {
        let store = &self.store;
        let batch = MutationBatch {
            update_assignments: updates,
            ..Default::default()
        };
        with_backoff(self.retry, || {
            let batch = batch.clone();
            async { store.apply_mutations(batch).await }
        })
        .await
    }
}

/// Site the preceptor can host at on `date`, favoring the first available
/// one. Mirrors what the engine records when it places a day.
fn site_for(ctx: &SchedulingContext, preceptor_id: &str, date: NaiveDate) -> Option<String> {
    ctx.preceptors.get(preceptor_id).and_then(|p| {
        ctx.availability
            .available_sites(p, date)
            .into_iter()
            .next()
    })
}

/// Pull one row out of the list, erroring when it is absent.
fn take_row(
    mut assignments: Vec<Assignment>,
    assignment_id: &str,
) -> Result<(Assignment, Vec<Assignment>), CoreError> {
    match assignments.iter().position(|a| a.id == assignment_id) {
        Some(idx) => {
            let row = assignments.remove(idx);
            Ok((row, assignments))
        }
        None => Err(CoreError::not_found("assignment", assignment_id)),
    }
}

fn verdict(
    eval: crate::constraints::Evaluation,
    row: &Assignment,
    preceptor_id: &str,
) -> ValidationResult {
    if eval.accepted() {
        return ValidationResult::ok();
    }
    ValidationResult {
        valid: false,
        errors: eval
            .rejections
            .into_iter()
            .map(|(constraint, message)| Violation {
                constraint,
                message,
                student_id: row.student_id.clone(),
                preceptor_id: Some(preceptor_id.to_string()),
                date: Some(row.date),
                bypassed: false,
            })
            .collect(),
    }
}
