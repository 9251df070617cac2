//! Row structs mirroring the SQLite schema, plus conversions into the core
//! domain types. Dates are TEXT `YYYY-MM-DD`; timestamps are epoch millis;
//! booleans are 0/1.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::FromRow;

use precept_core::{
    Assignment, AssignmentStatus, AuditRecord, Availability, BlackoutDate, CapacityRule,
    Clerkship, ClerkshipType, ClerkshipConfigOverride, Elective, Enrollment, HealthSystem,
    HealthSystemRule, Preceptor, RequirementType, SchedulingPeriod, Site, Strategy, Student,
    Team, TeamMember,
};

use crate::error::{Result, StorageError};

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    s.parse()
        .map_err(|_| StorageError::Corrupt(format!("bad date: {}", s)))
}

pub(crate) fn parse_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StorageError::Corrupt(format!("bad timestamp: {}", ms)))
}

#[derive(Debug, FromRow)]
pub struct PeriodRow {
    pub id: String,
    pub start_date: String,
    pub end_date: String,
    pub is_active: i64,
}

impl PeriodRow {
    pub fn into_domain(self) -> Result<SchedulingPeriod> {
        Ok(SchedulingPeriod {
            id: self.id,
            start_date: parse_date(&self.start_date)?,
            end_date: parse_date(&self.end_date)?,
            is_active: self.is_active != 0,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct HealthSystemRow {
    pub id: String,
    pub name: String,
}

impl From<HealthSystemRow> for HealthSystem {
    fn from(row: HealthSystemRow) -> Self {
        HealthSystem {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct SiteRow {
    pub id: String,
    pub name: String,
    pub health_system_id: String,
}

impl From<SiteRow> for Site {
    fn from(row: SiteRow) -> Self {
        Site {
            id: row.id,
            name: row.name,
            health_system_id: row.health_system_id,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ClerkshipRow {
    pub id: String,
    pub name: String,
    pub clerkship_type: String,
    pub required_days: i64,
    pub specialty: Option<String>,
}

impl ClerkshipRow {
    pub fn into_domain(self) -> Result<Clerkship> {
        Ok(Clerkship {
            id: self.id,
            name: self.name,
            clerkship_type: ClerkshipType::parse(&self.clerkship_type)
                .map_err(StorageError::Corrupt)?,
            required_days: self.required_days as u32,
            specialty: self.specialty,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ElectiveRow {
    pub id: String,
    pub parent_clerkship_id: String,
    pub name: String,
    pub minimum_days: i64,
    pub specialty: Option<String>,
    pub is_required: i64,
}

impl ElectiveRow {
    pub fn into_domain(self, allowed_preceptor_ids: Vec<String>) -> Elective {
        Elective {
            id: self.id,
            parent_clerkship_id: self.parent_clerkship_id,
            name: self.name,
            minimum_days: self.minimum_days as u32,
            specialty: self.specialty,
            is_required: self.is_required != 0,
            allowed_preceptor_ids,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
}

impl StudentRow {
    pub fn into_domain(self, onboarded: Vec<String>) -> Student {
        Student {
            id: self.id,
            name: self.name,
            onboarded_health_systems: onboarded.into_iter().collect(),
        }
    }
}

#[derive(Debug, FromRow)]
pub struct PreceptorRow {
    pub id: String,
    pub name: String,
    pub specialty: Option<String>,
    pub health_system_id: String,
    pub max_students: i64,
    pub is_global_fallback_only: i64,
}

impl PreceptorRow {
    pub fn into_domain(self, site_ids: Vec<String>) -> Preceptor {
        Preceptor {
            id: self.id,
            name: self.name,
            specialty: self.specialty,
            health_system_id: self.health_system_id,
            site_ids,
            max_students: self.max_students as u32,
            is_global_fallback_only: self.is_global_fallback_only != 0,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct TeamRow {
    pub id: String,
    pub clerkship_id: String,
    pub require_same_health_system: i64,
    pub require_same_site: i64,
    pub require_same_specialty: i64,
}

impl TeamRow {
    pub fn into_domain(self, site_ids: Vec<String>, members: Vec<TeamMember>) -> Team {
        Team {
            id: self.id,
            clerkship_id: self.clerkship_id,
            site_ids,
            require_same_health_system: self.require_same_health_system != 0,
            require_same_site: self.require_same_site != 0,
            require_same_specialty: self.require_same_specialty != 0,
            members,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct TeamMemberRow {
    pub team_id: String,
    pub preceptor_id: String,
    pub priority: i64,
}

#[derive(Debug, FromRow)]
pub struct AvailabilityRow {
    pub preceptor_id: String,
    pub site_id: String,
    pub date: String,
    pub is_available: i64,
}

impl AvailabilityRow {
    pub fn into_domain(self) -> Result<Availability> {
        Ok(Availability {
            preceptor_id: self.preceptor_id,
            site_id: self.site_id,
            date: parse_date(&self.date)?,
            is_available: self.is_available != 0,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct BlackoutRow {
    pub date: String,
    pub reason: Option<String>,
}

impl BlackoutRow {
    pub fn into_domain(self) -> Result<BlackoutDate> {
        Ok(BlackoutDate {
            date: parse_date(&self.date)?,
            reason: self.reason,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct CapacityRuleRow {
    pub preceptor_id: String,
    pub clerkship_id: Option<String>,
    pub requirement_type: Option<String>,
    pub max_per_day: Option<i64>,
    pub max_per_year: Option<i64>,
    pub max_blocks_per_year: Option<i64>,
}

impl CapacityRuleRow {
    pub fn into_domain(self) -> Result<CapacityRule> {
        let requirement_type = self
            .requirement_type
            .map(|s| RequirementType::parse(&s).map_err(StorageError::Corrupt))
            .transpose()?;
        Ok(CapacityRule {
            preceptor_id: self.preceptor_id,
            clerkship_id: self.clerkship_id,
            requirement_type,
            max_per_day: self.max_per_day.map(|v| v as u32),
            max_per_year: self.max_per_year.map(|v| v as u32),
            max_blocks_per_year: self.max_blocks_per_year.map(|v| v as u32),
        })
    }
}

#[derive(Debug, FromRow)]
pub struct EnrollmentRow {
    pub student_id: String,
    pub clerkship_id: String,
    pub elective_id: Option<String>,
}

impl From<EnrollmentRow> for Enrollment {
    fn from(row: EnrollmentRow) -> Self {
        Enrollment {
            student_id: row.student_id,
            clerkship_id: row.clerkship_id,
            elective_id: row.elective_id,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ConfigOverrideRow {
    pub clerkship_id: String,
    pub strategy: Option<String>,
    pub health_system_rule: Option<String>,
    pub max_per_day: Option<i64>,
    pub max_per_year: Option<i64>,
    pub allow_teams: Option<i64>,
    pub allow_fallbacks: Option<i64>,
    pub fallback_requires_approval: Option<i64>,
    pub fallback_allow_cross_system: Option<i64>,
    pub block_size_days: Option<i64>,
    pub allow_partial_blocks: Option<i64>,
    pub prefer_continuous_blocks: Option<i64>,
    pub team_size_min: Option<i64>,
    pub team_size_max: Option<i64>,
    pub max_blocks_per_year: Option<i64>,
}

impl ConfigOverrideRow {
    pub fn into_domain(self) -> Result<ClerkshipConfigOverride> {
        let strategy = self
            .strategy
            .map(|s| Strategy::parse(&s).map_err(StorageError::Corrupt))
            .transpose()?;
        let health_system_rule = self
            .health_system_rule
            .map(|s| HealthSystemRule::parse(&s).map_err(StorageError::Corrupt))
            .transpose()?;
        Ok(ClerkshipConfigOverride {
            clerkship_id: self.clerkship_id,
            strategy,
            health_system_rule,
            max_per_day: self.max_per_day.map(|v| v as u32),
            max_per_year: self.max_per_year.map(|v| v as u32),
            allow_teams: self.allow_teams.map(|v| v != 0),
            allow_fallbacks: self.allow_fallbacks.map(|v| v != 0),
            fallback_requires_approval: self.fallback_requires_approval.map(|v| v != 0),
            fallback_allow_cross_system: self.fallback_allow_cross_system.map(|v| v != 0),
            block_size_days: self.block_size_days.map(|v| v as u32),
            allow_partial_blocks: self.allow_partial_blocks.map(|v| v != 0),
            prefer_continuous_blocks: self.prefer_continuous_blocks.map(|v| v != 0),
            team_size_min: self.team_size_min.map(|v| v as u32),
            team_size_max: self.team_size_max.map(|v| v as u32),
            max_blocks_per_year: self.max_blocks_per_year.map(|v| v as u32),
        })
    }
}

#[derive(Debug, FromRow)]
pub struct AssignmentRow {
    pub id: String,
    pub student_id: String,
    pub preceptor_id: String,
    pub clerkship_id: String,
    pub site_id: Option<String>,
    pub elective_id: Option<String>,
    pub date: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AssignmentRow {
    pub fn into_domain(self) -> Result<Assignment> {
        Ok(Assignment {
            id: self.id,
            student_id: self.student_id,
            preceptor_id: self.preceptor_id,
            clerkship_id: self.clerkship_id,
            site_id: self.site_id,
            elective_id: self.elective_id,
            date: parse_date(&self.date)?,
            status: AssignmentStatus::parse(&self.status).map_err(StorageError::Corrupt)?,
            created_at: parse_millis(self.created_at)?,
            updated_at: parse_millis(self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct AuditRow {
    pub id: String,
    pub timestamp: i64,
    pub strategy: String,
    pub cutoff_date: String,
    pub end_date: String,
    pub past_count: i64,
    pub deleted_count: i64,
    pub preserved_count: i64,
    pub affected_count: i64,
    pub generated_count: i64,
    pub success: i64,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub bypassed_constraints: String,
}

impl AuditRow {
    pub fn into_domain(self) -> Result<AuditRecord> {
        let bypassed: Vec<String> = serde_json::from_str(&self.bypassed_constraints)
            .map_err(|e| StorageError::Corrupt(format!("bad bypassed_constraints: {}", e)))?;
        Ok(AuditRecord {
            id: self.id,
            timestamp: parse_millis(self.timestamp)?,
            strategy: self.strategy,
            cutoff_date: parse_date(&self.cutoff_date)?,
            end_date: parse_date(&self.end_date)?,
            past_count: self.past_count as u32,
            deleted_count: self.deleted_count as u32,
            preserved_count: self.preserved_count as u32,
            affected_count: self.affected_count as u32,
            generated_count: self.generated_count as u32,
            success: self.success != 0,
            reason: self.reason,
            notes: self.notes,
            bypassed_constraints: bypassed,
        })
    }
}
