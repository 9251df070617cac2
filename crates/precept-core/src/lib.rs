pub mod config;
pub mod constraints;
pub mod context;
pub mod domain;
pub mod editing;
pub mod engine;
pub mod ledger;
pub mod ports;
pub mod regeneration;
pub mod retry;
pub mod strategies;
mod validation;



#[cfg(test)]
mod regeneration_tests;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use domain::{
    Assignment,
    AssignmentStatus,
    AuditRecord,
    Availability,
    BlackoutDate,
    CapacityRule,
    Clerkship,
    ClerkshipType,
    CoreError,
    Elective,
    Enrollment,
    HealthSystem,
    HealthSystemRule,
    NewAssignment,
    Preceptor,
    Requirement,
    RequirementKey,
    RequirementType,
    SchedulingPeriod,
    Site,
    StoreBusy,
    Strategy,
    Student,
    Team,
    TeamMember,
};

pub use config::{
    resolve_config, ClerkshipConfigOverride, ConfigSource, GlobalDefaults, ResolvedConfig,
    SchedulingDefaults,
};

pub use constraints::{CapacityIndex, Candidate, ConstraintId, ConstraintSet, Evaluation, Outcome};

pub use context::{AvailabilityIndex, EntityBundle, SchedulingContext};

pub use engine::{
    CancelToken, EngineOptions, ScheduleOutcome, ScheduleSummary, UnmetRequirement,
    REASON_DEADLINE_EXCEEDED,
};

pub use editing::{AssignmentPatch, EditingService, ValidationResult};

pub use ledger::CapacityLedger;

pub use ports::{Clock, FixedClock, MutationBatch, SchedulingStore, SystemClock};

pub use regeneration::{
    GenerateRequest, GenerateResult, ImpactAnalysis, RegenerationMode, RegenerationService,
    StudentProgress,
};

pub use retry::{with_backoff, RetryPolicy};

pub use strategies::{order_requirements, PlacementResult, Violation};
