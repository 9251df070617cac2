//! Regeneration: splitting the timeline at a cutoff, crediting past work,
//! preserving or replacing future assignments, and driving the engine.
//!
//! The whole non-preview path is one store-level mutation batch; on any
//! store error nothing lands, including the audit record. Preview runs the
//! same pipeline without the advisory lock and without writing.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::constraints::ConstraintId;
use crate::context::{EntityBundle, SchedulingContext};
use crate::domain::{Assignment, AuditRecord, CoreError, RequirementKey, SchedulingPeriod};
use crate::engine::{self, EngineOptions, ScheduleSummary, UnmetRequirement};
use crate::ledger::CapacityLedger;
use crate::ports::{Clock, MutationBatch, SchedulingStore};
use crate::retry::{with_backoff, RetryPolicy};
use crate::strategies::Violation;
use crate::validation::evaluate_row;

// ===== Modes and request =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegenerationMode {
    /// Rebuild everything: cutoff snaps to the range start.
    Full,
    /// Preserve future assignments still valid under current constraints.
    MinimalChange,
    /// Delete all future assignments, keep the past.
    FullReoptimize,
    /// Preserve everything; only fill gaps up to each requirement's days.
    Completion,
}

impl RegenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegenerationMode::Full => "full",
            RegenerationMode::MinimalChange => "minimal-change",
            RegenerationMode::FullReoptimize => "full-reoptimize",
            RegenerationMode::Completion => "completion",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "full" => Ok(Self::Full),
            "minimal-change" => Ok(Self::MinimalChange),
            "full-reoptimize" => Ok(Self::FullReoptimize),
            "completion" => Ok(Self::Completion),
            _ => Err(format!("Unknown regeneration mode: {}", s)),
        }
    }
}

impl std::fmt::Display for RegenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub period_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Defaults to today; assignments before the cutoff are never touched.
    pub cutoff_date: Option<NaiveDate>,
    pub mode: RegenerationMode,
    pub preview: bool,
    pub bypassed_constraints: BTreeSet<ConstraintId>,
    pub deadline_ms: Option<u64>,
    pub enable_team_formation: bool,
    pub enable_fallbacks: bool,
}

impl GenerateRequest {
    pub fn new(
        period_id: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        mode: RegenerationMode,
    ) -> Self {
        Self {
            period_id: period_id.into(),
            start_date,
            end_date,
            cutoff_date: None,
            mode,
            preview: false,
            bypassed_constraints: BTreeSet::new(),
            deadline_ms: None,
            enable_team_formation: true,
            enable_fallbacks: true,
        }
    }
}

// ===== Impact analysis =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProgress {
    pub student_id: String,
    pub clerkship_id: String,
    pub elective_id: Option<String>,
    pub required_days: u32,
    pub credited_days: u32,
    pub newly_scheduled_days: u32,
    pub remaining_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub past_count: u32,
    pub to_delete_count: u32,
    pub preservable_count: u32,
    pub affected_count: u32,
    pub replaceable_count: u32,
    pub student_progress: Vec<StudentProgress>,
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateResult {
    pub preview: bool,
    pub impact: Option<ImpactAnalysis>,
    pub assignments: Vec<Assignment>,
    pub unmet_requirements: Vec<UnmetRequirement>,
    pub violations: Vec<Violation>,
    pub summary: ScheduleSummary,
    pub preserved_past: u32,
    pub preserved_future: u32,
    pub deleted_future: u32,
    pub new_generated: u32,
    pub audit_log_id: Option<String>,
}

// ===== Future classification =====

struct FutureSplit {
    preserved: Vec<Assignment>,
    to_delete: Vec<Assignment>,
    affected_count: u32,
    replaceable_count: u32,
}

// ===== Service =====

/// Drives the full regeneration pipeline against the store.
pub struct RegenerationService<S: SchedulingStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    audit_seq: std::sync::atomic::AtomicU64,
}

impl<S: SchedulingStore + ?Sized> RegenerationService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            retry: RetryPolicy::default(),
            audit_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one regeneration. Non-preview runs hold the period's advisory
    /// lock for the whole pipeline.
    #[instrument(skip(self), fields(period = %request.period_id, mode = %request.mode, preview = request.preview))]
    pub async fn generate(&self, request: GenerateRequest) -> anyhow::Result<GenerateResult> {
        if !request.preview {
            let store = &self.store;
            let period_id = request.period_id.clone();
            with_backoff(self.retry, || store.acquire_period_lock(&period_id)).await?;
        }

        let result = self.generate_inner(&request).await;

        if !request.preview {
            if let Err(err) = self.store.release_period_lock(&request.period_id).await {
                tracing::warn!(error = %err, "failed to release period lock");
            }
        }
        result
    }

    async fn generate_inner(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResult> {
        let store = &self.store;
        let period_id = request.period_id.clone();
        let period: SchedulingPeriod =
            with_backoff(self.retry, || store.load_period(&period_id))
                .await?
                .ok_or_else(|| CoreError::not_found("scheduling_period", request.period_id.clone()))?;
        if !period.is_active {
            return Err(CoreError::Fatal(format!(
                "scheduling period {} is not active",
                period.id
            ))
            .into());
        }

        let start = request.start_date.max(period.start_date);
        let end = request.end_date.min(period.end_date);
        let cutoff = match request.mode {
            RegenerationMode::Full => start,
            _ => request
                .cutoff_date
                .unwrap_or_else(|| self.clock.today())
                .clamp(start, end),
        };

        let bundle = with_backoff(self.retry, || store.load_entities(&period)).await?;
        let all = with_backoff(self.retry, || {
            store.load_assignments(period.start_date, end)
        })
        .await?;

        let (past, future): (Vec<Assignment>, Vec<Assignment>) =
            all.into_iter().partition(|a| a.date < cutoff);

        let split = classify_future(request.mode, &period, &bundle, &past, future, (start, end))?;

        // Credits: past work plus whatever future we preserve both reduce
        // the effective days the engine still has to place.
        let mut credits: BTreeMap<RequirementKey, u32> = BTreeMap::new();
        for a in past.iter().chain(split.preserved.iter()) {
            if a.status.counts() {
                *credits.entry(a.requirement_key()).or_insert(0) += 1;
            }
        }

        let ctx = SchedulingContext::build(period.clone(), &bundle, past.clone())?;

        let options = EngineOptions {
            enable_team_formation: request.enable_team_formation,
            enable_fallbacks: request.enable_fallbacks,
            bypassed_constraints: request.bypassed_constraints.clone(),
            preserved: split.preserved.clone(),
            credits: credits.clone(),
            deadline: request
                .deadline_ms
                .map(|ms| self.clock.now() + Duration::milliseconds(ms as i64)),
            cancel: None,
        };

        let outcome = engine::run(&ctx, (cutoff, end), &options, self.clock.as_ref())?;

        let now = self.clock.now();
        let new_rows: Vec<Assignment> = outcome
            .assignments
            .iter()
            .cloned()
            .map(|a| a.into_assignment(now))
            .collect();

        let mut newly_scheduled: BTreeMap<RequirementKey, u32> = BTreeMap::new();
        for a in &new_rows {
            *newly_scheduled.entry(a.requirement_key()).or_insert(0) += 1;
        }
        let student_progress: Vec<StudentProgress> = ctx
            .requirements
            .iter()
            .map(|req| {
                let key = req.key();
                let credited = credits.get(&key).copied().unwrap_or(0);
                let scheduled = newly_scheduled.get(&key).copied().unwrap_or(0);
                StudentProgress {
                    student_id: req.student_id.clone(),
                    clerkship_id: req.clerkship_id.clone(),
                    elective_id: req.elective_id.clone(),
                    required_days: req.required_days,
                    credited_days: credited,
                    newly_scheduled_days: scheduled,
                    remaining_days: req
                        .required_days
                        .saturating_sub(credited)
                        .saturating_sub(scheduled),
                }
            })
            .collect();

        let impact = ImpactAnalysis {
            past_count: past.len() as u32,
            to_delete_count: split.to_delete.len() as u32,
            preservable_count: split.preserved.len() as u32,
            affected_count: split.affected_count,
            replaceable_count: split.replaceable_count,
            student_progress,
            summary: format!(
                "{}: {} past, {} preserved, {} deleted, {} generated, {} unmet days",
                request.mode,
                past.len(),
                split.preserved.len(),
                split.to_delete.len(),
                new_rows.len(),
                outcome.summary.total_unmet_days
            ),
        };

        let mut audit_log_id = None;
        if !request.preview {
            let seq = self
                .audit_seq
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let audit = AuditRecord {
                id: format!("audit-{}-{}-{}", period.id, now.timestamp_millis(), seq),
                timestamp: now,
                strategy: request.mode.as_str().to_string(),
                cutoff_date: cutoff,
                end_date: end,
                past_count: past.len() as u32,
                deleted_count: split.to_delete.len() as u32,
                preserved_count: split.preserved.len() as u32,
                affected_count: split.affected_count,
                generated_count: new_rows.len() as u32,
                success: true,
                reason: None,
                notes: Some(impact.summary.clone()),
                bypassed_constraints: request
                    .bypassed_constraints
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
            };
            audit_log_id = Some(audit.id.clone());

            let batch = MutationBatch {
                delete_assignment_ids: split.to_delete.iter().map(|a| a.id.clone()).collect(),
                insert_assignments: new_rows.clone(),
                update_assignments: vec![],
                audit: Some(audit),
            };
            with_backoff(self.retry, || {
                let batch = batch.clone();
                async { store.apply_mutations(batch).await }
            })
            .await?;
            info!(
                generated = new_rows.len(),
                deleted = split.to_delete.len(),
                preserved = split.preserved.len(),
                "regeneration committed"
            );
        }

        Ok(GenerateResult {
            preview: request.preview,
            impact: Some(impact),
            assignments: new_rows.clone(),
            unmet_requirements: outcome.unmet,
            violations: outcome.violations,
            summary: outcome.summary,
            preserved_past: past.len() as u32,
            preserved_future: split.preserved.len() as u32,
            deleted_future: split.to_delete.len() as u32,
            new_generated: new_rows.len() as u32,
            audit_log_id,
        })
    }
}

/// Decide which future assignments survive under the requested mode.
fn classify_future(
    mode: RegenerationMode,
    period: &SchedulingPeriod,
    bundle: &EntityBundle,
    past: &[Assignment],
    mut future: Vec<Assignment>,
    window: (NaiveDate, NaiveDate),
) -> Result<FutureSplit, CoreError> {
    future.sort_by(|a, b| {
        (a.date, &a.student_id, &a.id).cmp(&(b.date, &b.student_id, &b.id))
    });

    match mode {
        RegenerationMode::Full | RegenerationMode::FullReoptimize => Ok(FutureSplit {
            preserved: Vec::new(),
            to_delete: future,
            affected_count: 0,
            replaceable_count: 0,
        }),
        RegenerationMode::Completion => {
            // Preserve everything that still counts; cancelled rows are
            // swept so their slots can be refilled.
            let (preserved, to_delete): (Vec<Assignment>, Vec<Assignment>) =
                future.into_iter().partition(|a| a.status.counts());
            Ok(FutureSplit {
                preserved,
                to_delete,
                affected_count: 0,
                replaceable_count: 0,
            })
        }
        RegenerationMode::MinimalChange => {
            classify_minimal_change(period, bundle, past, future, window)
        }
    }
}

/// Re-validate every future assignment against the current context; keep the
/// valid ones, count how many invalid ones have a replacement preceptor.
fn classify_minimal_change(
    period: &SchedulingPeriod,
    bundle: &EntityBundle,
    past: &[Assignment],
    future: Vec<Assignment>,
    window: (NaiveDate, NaiveDate),
) -> Result<FutureSplit, CoreError> {
    let ctx = SchedulingContext::build(period.clone(), bundle, past.to_vec())?;
    let mut ledger = CapacityLedger::from_assignments(ctx.existing.iter());

    let mut split = FutureSplit {
        preserved: Vec::new(),
        to_delete: Vec::new(),
        affected_count: 0,
        replaceable_count: 0,
    };

    for row in future {
        if !row.status.counts() {
            split.affected_count += 1;
            split.to_delete.push(row);
            continue;
        }
        let valid = evaluate_row(&ctx, bundle, &ledger, &row, &row.preceptor_id, row.date, window)?
            .map_or(false, |e| e.accepted());
        if valid {
            ledger.record(&row.student_id, &row.preceptor_id, row.date);
            split.preserved.push(row);
        } else {
            split.affected_count += 1;
            let mut replaceable = false;
            for candidate_id in ctx.preceptors.keys() {
                if candidate_id == &row.preceptor_id {
                    continue;
                }
                let ok =
                    evaluate_row(&ctx, bundle, &ledger, &row, candidate_id, row.date, window)?
                        .map_or(false, |e| e.accepted());
                if ok {
                    replaceable = true;
                    break;
                }
            }
            if replaceable {
                split.replaceable_count += 1;
            }
            split.to_delete.push(row);
        }
    }

    Ok(split)
}
