use async_trait::async_trait;
use chrono::NaiveDate;

use crate::context::EntityBundle;
use crate::domain::{Assignment, AuditRecord, SchedulingPeriod};

/// One all-or-nothing write against the store. Either every delete, insert,
/// update and the audit append land together, or none do.
#[derive(Debug, Default, Clone)]
pub struct MutationBatch {
    pub delete_assignment_ids: Vec<String>,
    pub insert_assignments: Vec<Assignment>,
    pub update_assignments: Vec<Assignment>,
    pub audit: Option<AuditRecord>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.delete_assignment_ids.is_empty()
            && self.insert_assignments.is_empty()
            && self.update_assignments.is_empty()
            && self.audit.is_none()
    }
}

/// Abstract data store the core schedules against. Any SQL- or
/// document-store implementation is acceptable; transient contention is
/// reported by attaching a [`crate::domain::StoreBusy`] to the error chain.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    /// Fetch a scheduling period by id.
    async fn load_period(&self, period_id: &str) -> anyhow::Result<Option<SchedulingPeriod>>;

    /// Bulk-load every entity the engine needs for a period.
    async fn load_entities(&self, period: &SchedulingPeriod) -> anyhow::Result<EntityBundle>;

    /// All assignments with a date inside `[start, end]`.
    async fn load_assignments(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<Assignment>>;

    /// Apply a mutation batch atomically.
    async fn apply_mutations(&self, batch: MutationBatch) -> anyhow::Result<()>;

    /// Advisory lock so at most one non-preview regeneration runs per
    /// period. Contention surfaces as `StoreBusy`.
    async fn acquire_period_lock(&self, period_id: &str) -> anyhow::Result<()>;

    async fn release_period_lock(&self, period_id: &str) -> anyhow::Result<()>;
}
