use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ===== Closed enums =====

/// The kind of rotation a clerkship represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClerkshipType {
    Outpatient,
    Inpatient,
    ElectiveParent,
}

impl ClerkshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClerkshipType::Outpatient => "outpatient",
            ClerkshipType::Inpatient => "inpatient",
            ClerkshipType::ElectiveParent => "elective_parent",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "outpatient" => Ok(Self::Outpatient),
            "inpatient" => Ok(Self::Inpatient),
            "elective_parent" => Ok(Self::ElectiveParent),
            _ => Err(format!("Unknown clerkship type: {}", s)),
        }
    }
}

impl std::fmt::Display for ClerkshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requirement type a scheduling config is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    Outpatient,
    Inpatient,
    Elective,
}

impl RequirementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementType::Outpatient => "outpatient",
            RequirementType::Inpatient => "inpatient",
            RequirementType::Elective => "elective",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "outpatient" => Ok(Self::Outpatient),
            "inpatient" => Ok(Self::Inpatient),
            "elective" => Ok(Self::Elective),
            _ => Err(format!("Unknown requirement type: {}", s)),
        }
    }
}

impl From<ClerkshipType> for RequirementType {
    fn from(ct: ClerkshipType) -> Self {
        match ct {
            ClerkshipType::Outpatient => RequirementType::Outpatient,
            ClerkshipType::Inpatient => RequirementType::Inpatient,
            ClerkshipType::ElectiveParent => RequirementType::Elective,
        }
    }
}

impl std::fmt::Display for RequirementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Placement strategy for a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ContinuousSingle,
    ContinuousTeam,
    BlockBased,
    DailyRotation,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ContinuousSingle => "continuous_single",
            Strategy::ContinuousTeam => "continuous_team",
            Strategy::BlockBased => "block_based",
            Strategy::DailyRotation => "daily_rotation",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "continuous_single" => Ok(Self::ContinuousSingle),
            "continuous_team" => Ok(Self::ContinuousTeam),
            "block_based" => Ok(Self::BlockBased),
            "daily_rotation" => Ok(Self::DailyRotation),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a student's onboarded health systems bind preceptor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthSystemRule {
    EnforceSameSystem,
    PreferSameSystem,
    NoPreference,
}

impl HealthSystemRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthSystemRule::EnforceSameSystem => "enforce_same_system",
            HealthSystemRule::PreferSameSystem => "prefer_same_system",
            HealthSystemRule::NoPreference => "no_preference",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "enforce_same_system" => Ok(Self::EnforceSameSystem),
            "prefer_same_system" => Ok(Self::PreferSameSystem),
            "no_preference" => Ok(Self::NoPreference),
            _ => Err(format!("Unknown health system rule: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Scheduled => "scheduled",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown assignment status: {}", s)),
        }
    }

    /// Cancelled rows never count toward capacity or credits.
    pub fn counts(&self) -> bool {
        !matches!(self, AssignmentStatus::Cancelled)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== Entities =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSystem {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub health_system_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clerkship {
    pub id: String,
    pub name: String,
    pub clerkship_type: ClerkshipType,
    pub required_days: u32,
    pub specialty: Option<String>,
}

/// A sub-rotation within a clerkship with its own minimum days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Elective {
    pub id: String,
    pub parent_clerkship_id: String,
    pub name: String,
    pub minimum_days: u32,
    pub specialty: Option<String>,
    pub is_required: bool,
    /// Empty means any preceptor of the clerkship's teams is allowed.
    pub allowed_preceptor_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub onboarded_health_systems: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preceptor {
    pub id: String,
    pub name: String,
    pub specialty: Option<String>,
    pub health_system_id: String,
    pub site_ids: Vec<String>,
    /// Baseline students-per-day ceiling when no capacity rule applies.
    pub max_students: u32,
    pub is_global_fallback_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub preceptor_id: String,
    pub priority: u32,
}

/// An ordered group of preceptors used by `continuous_team` for
/// primary + fallback scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub clerkship_id: String,
    pub site_ids: Vec<String>,
    pub require_same_health_system: bool,
    pub require_same_site: bool,
    pub require_same_specialty: bool,
    pub members: Vec<TeamMember>,
}

impl Team {
    /// Members ordered by (priority, preceptor_id) for deterministic scans.
    pub fn members_in_order(&self) -> Vec<&TeamMember> {
        let mut members: Vec<&TeamMember> = self.members.iter().collect();
        members.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.preceptor_id.cmp(&b.preceptor_id))
        });
        members
    }

    /// The highest-priority member, if the team has members at all.
    pub fn primary(&self) -> Option<&TeamMember> {
        self.members_in_order().first().copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub preceptor_id: String,
    pub site_id: String,
    pub date: NaiveDate,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackoutDate {
    pub date: NaiveDate,
    pub reason: Option<String>,
}

/// Capacity override for a preceptor; most-specific rule wins
/// (clerkship+type > clerkship > type > general).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityRule {
    pub preceptor_id: String,
    pub clerkship_id: Option<String>,
    pub requirement_type: Option<RequirementType>,
    pub max_per_day: Option<u32>,
    pub max_per_year: Option<u32>,
    pub max_blocks_per_year: Option<u32>,
}

/// An enrollment row from the external store. A row without an elective
/// enrolls the student in the clerkship; a row with an elective records an
/// explicit opt-in to an optional elective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: String,
    pub clerkship_id: String,
    pub elective_id: Option<String>,
}

/// Derived scheduling requirement; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub student_id: String,
    pub clerkship_id: String,
    pub requirement_type: RequirementType,
    pub required_days: u32,
    pub elective_id: Option<String>,
}

impl Requirement {
    pub fn key(&self) -> RequirementKey {
        RequirementKey {
            student_id: self.student_id.clone(),
            clerkship_id: self.clerkship_id.clone(),
            elective_id: self.elective_id.clone(),
        }
    }
}

/// Identity of a requirement for credit accounting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequirementKey {
    pub student_id: String,
    pub clerkship_id: String,
    pub elective_id: Option<String>,
}

/// A single (student, preceptor, clerkship, date) tuple: one student working
/// with one preceptor on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub student_id: String,
    pub preceptor_id: String,
    pub clerkship_id: String,
    pub site_id: Option<String>,
    pub elective_id: Option<String>,
    pub date: NaiveDate,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn requirement_key(&self) -> RequirementKey {
        RequirementKey {
            student_id: self.student_id.clone(),
            clerkship_id: self.clerkship_id.clone(),
            elective_id: self.elective_id.clone(),
        }
    }
}

/// An assignment produced by the engine before it has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssignment {
    pub student_id: String,
    pub preceptor_id: String,
    pub clerkship_id: String,
    pub site_id: Option<String>,
    pub elective_id: Option<String>,
    pub date: NaiveDate,
}

impl NewAssignment {
    /// Materialize a persistable row. The id is deterministic: student
    /// single-booking (I2) makes (student, date) unique within a schedule.
    pub fn into_assignment(self, now: DateTime<Utc>) -> Assignment {
        let id = format!("{}@{}", self.student_id, self.date);
        Assignment {
            id,
            student_id: self.student_id,
            preceptor_id: self.preceptor_id,
            clerkship_id: self.clerkship_id,
            site_id: self.site_id,
            elective_id: self.elective_id,
            date: self.date,
            status: AssignmentStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingPeriod {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
}

/// Structured record of one regeneration event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub strategy: String,
    pub cutoff_date: NaiveDate,
    pub end_date: NaiveDate,
    pub past_count: u32,
    pub deleted_count: u32,
    pub preserved_count: u32,
    pub affected_count: u32,
    pub generated_count: u32,
    pub success: bool,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub bypassed_constraints: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips() {
        for s in [
            Strategy::ContinuousSingle,
            Strategy::ContinuousTeam,
            Strategy::BlockBased,
            Strategy::DailyRotation,
        ] {
            assert_eq!(Strategy::parse(s.as_str()), Ok(s));
        }
        for rt in [
            RequirementType::Outpatient,
            RequirementType::Inpatient,
            RequirementType::Elective,
        ] {
            assert_eq!(RequirementType::parse(rt.as_str()), Ok(rt));
        }
        assert!(Strategy::parse("bogus").is_err());
    }

    #[test]
    fn test_clerkship_type_maps_to_requirement_type() {
        assert_eq!(
            RequirementType::from(ClerkshipType::ElectiveParent),
            RequirementType::Elective
        );
        assert_eq!(
            RequirementType::from(ClerkshipType::Inpatient),
            RequirementType::Inpatient
        );
    }

    #[test]
    fn test_team_members_in_order() {
        let team = Team {
            id: "t1".into(),
            clerkship_id: "c1".into(),
            site_ids: vec![],
            require_same_health_system: false,
            require_same_site: false,
            require_same_specialty: false,
            members: vec![
                TeamMember {
                    preceptor_id: "p-b".into(),
                    priority: 2,
                },
                TeamMember {
                    preceptor_id: "p-a".into(),
                    priority: 1,
                },
                TeamMember {
                    preceptor_id: "p-c".into(),
                    priority: 2,
                },
            ],
        };
        let ordered: Vec<&str> = team
            .members_in_order()
            .iter()
            .map(|m| m.preceptor_id.as_str())
            .collect();
        assert_eq!(ordered, vec!["p-a", "p-b", "p-c"]);
        assert_eq!(team.primary().unwrap().preceptor_id, "p-a");
    }

    #[test]
    fn test_cancelled_does_not_count() {
        assert!(AssignmentStatus::Scheduled.counts());
        assert!(AssignmentStatus::Completed.counts());
        assert!(!AssignmentStatus::Cancelled.counts());
    }
}
