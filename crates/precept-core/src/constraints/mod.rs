//! Pluggable validation predicates over placement candidates.
//!
//! Every candidate (student, preceptor, clerkship, site?, elective?, date)
//! runs through an ordered list of predicates built from the resolved config.
//! Each predicate owns a stable string id; a bypass set supplied by the
//! caller turns a rejection from that predicate into an accept-with-warning.
//! Any surviving rejection fails the candidate; penalty costs sum for
//! tie-breaking.

pub mod capacity;

pub use capacity::CapacityIndex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ResolvedConfig;
use crate::context::availability::AvailabilityIndex;
use crate::domain::{
    Clerkship, Elective, HealthSystemRule, Preceptor, RequirementType, Strategy, Student, Team,
};
use crate::ledger::CapacityLedger;

// ===== Constraint ids =====

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintId {
    DateInWindow,
    NotBlackedOut,
    StudentNotDoubleBooked,
    PreceptorAvailable,
    PreceptorDailyCapacity,
    PreceptorYearlyCapacity,
    HealthSystemRule,
    SpecialtyMatch,
    ElectivePreceptorAllowed,
    SameSiteForBlock,
    TeamMembership,
}

impl ConstraintId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintId::DateInWindow => "date_in_window",
            ConstraintId::NotBlackedOut => "not_blacked_out",
            ConstraintId::StudentNotDoubleBooked => "student_not_double_booked",
            ConstraintId::PreceptorAvailable => "preceptor_available",
            ConstraintId::PreceptorDailyCapacity => "preceptor_daily_capacity",
            ConstraintId::PreceptorYearlyCapacity => "preceptor_yearly_capacity",
            ConstraintId::HealthSystemRule => "health_system_rule",
            ConstraintId::SpecialtyMatch => "specialty_match",
            ConstraintId::ElectivePreceptorAllowed => "elective_preceptor_allowed",
            ConstraintId::SameSiteForBlock => "same_site_for_block",
            ConstraintId::TeamMembership => "team_membership",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "date_in_window" => Ok(Self::DateInWindow),
            "not_blacked_out" => Ok(Self::NotBlackedOut),
            "student_not_double_booked" => Ok(Self::StudentNotDoubleBooked),
            "preceptor_available" => Ok(Self::PreceptorAvailable),
            "preceptor_daily_capacity" => Ok(Self::PreceptorDailyCapacity),
            "preceptor_yearly_capacity" => Ok(Self::PreceptorYearlyCapacity),
            "health_system_rule" => Ok(Self::HealthSystemRule),
            "specialty_match" => Ok(Self::SpecialtyMatch),
            "elective_preceptor_allowed" => Ok(Self::ElectivePreceptorAllowed),
            "same_site_for_block" => Ok(Self::SameSiteForBlock),
            "team_membership" => Ok(Self::TeamMembership),
            _ => Err(format!("Unknown constraint id: {}", s)),
        }
    }
}

impl std::fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The predicates active for a strategy, in evaluation order.
pub fn active_constraints(strategy: Strategy) -> Vec<ConstraintId> {
    let mut active = vec![
        ConstraintId::DateInWindow,
        ConstraintId::NotBlackedOut,
        ConstraintId::StudentNotDoubleBooked,
        ConstraintId::PreceptorAvailable,
        ConstraintId::PreceptorDailyCapacity,
        ConstraintId::PreceptorYearlyCapacity,
        ConstraintId::HealthSystemRule,
        ConstraintId::SpecialtyMatch,
        ConstraintId::ElectivePreceptorAllowed,
    ];
    if strategy == Strategy::BlockBased {
        active.push(ConstraintId::SameSiteForBlock);
    }
    if strategy == Strategy::ContinuousTeam {
        active.push(ConstraintId::TeamMembership);
    }
    active
}

// ===== Candidate and outcomes =====

/// One placement candidate under evaluation.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub student: &'a Student,
    pub preceptor: &'a Preceptor,
    pub clerkship: &'a Clerkship,
    pub elective: Option<&'a Elective>,
    pub requirement_type: RequirementType,
    pub site_id: Option<&'a str>,
    pub date: NaiveDate,
    /// Site already fixed for the block this candidate extends, if any.
    pub block_site: Option<&'a str>,
    pub via_fallback: bool,
    pub team: Option<&'a Team>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Reject(String),
    Penalty { reason: String, cost: u32 },
}

/// Aggregated result of running every active predicate.
#[derive(Debug, Default, Clone)]
pub struct Evaluation {
    pub penalty: u32,
    pub rejections: Vec<(ConstraintId, String)>,
    /// Rejections converted to warnings by the caller's bypass set.
    pub bypassed: Vec<(ConstraintId, String)>,
}

impl Evaluation {
    pub fn accepted(&self) -> bool {
        self.rejections.is_empty()
    }

    /// Rejection reasons keyed by constraint id, for unmet-requirement
    /// accounting.
    pub fn reason_counts(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for (id, _) in &self.rejections {
            *counts.entry(id.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

// ===== Constraint set =====

/// The ordered constraint list for one (requirement, config) pairing.
pub struct ConstraintSet<'a> {
    pub window: (NaiveDate, NaiveDate),
    blackouts: &'a BTreeSet<NaiveDate>,
    availability: &'a AvailabilityIndex,
    capacity: &'a CapacityIndex,
    pub config: &'a ResolvedConfig,
    bypass: &'a BTreeSet<ConstraintId>,
    active: Vec<ConstraintId>,
}

impl<'a> ConstraintSet<'a> {
    pub fn new(
        window: (NaiveDate, NaiveDate),
        blackouts: &'a BTreeSet<NaiveDate>,
        availability: &'a AvailabilityIndex,
        capacity: &'a CapacityIndex,
        config: &'a ResolvedConfig,
        bypass: &'a BTreeSet<ConstraintId>,
    ) -> Self {
        let active = active_constraints(config.strategy);
        Self {
            window,
            blackouts,
            availability,
            capacity,
            config,
            bypass,
            active,
        }
    }

    /// Run every active predicate against `candidate`. Bypassed predicates
    /// that would reject are recorded as warnings instead.
    pub fn evaluate(&self, candidate: &Candidate<'_>, ledger: &CapacityLedger) -> Evaluation {
        let mut eval = Evaluation::default();
        for id in &self.active {
            match self.check(*id, candidate, ledger) {
                Outcome::Accept => {}
                Outcome::Penalty { cost, .. } => {
                    eval.penalty += cost;
                }
                Outcome::Reject(reason) => {
                    if self.bypass.contains(id) {
                        eval.bypassed.push((*id, reason));
                    } else {
                        eval.rejections.push((*id, reason));
                    }
                }
            }
        }
        eval
    }

    fn check(&self, id: ConstraintId, c: &Candidate<'_>, ledger: &CapacityLedger) -> Outcome {
        match id {
            ConstraintId::DateInWindow => {
                if c.date >= self.window.0 && c.date <= self.window.1 {
                    Outcome::Accept
                } else {
                    Outcome::Reject(format!("{} outside scheduling window", c.date))
                }
            }
            ConstraintId::NotBlackedOut => {
                if self.blackouts.contains(&c.date) {
                    Outcome::Reject(format!("{} is a blackout date", c.date))
                } else {
                    Outcome::Accept
                }
            }
            ConstraintId::StudentNotDoubleBooked => {
                if ledger.student_booked(&c.student.id, c.date) {
                    Outcome::Reject(format!(
                        "student {} already booked on {}",
                        c.student.id, c.date
                    ))
                } else {
                    Outcome::Accept
                }
            }
            ConstraintId::PreceptorAvailable => {
                if self.availability.is_available(c.preceptor, c.site_id, c.date) {
                    Outcome::Accept
                } else {
                    Outcome::Reject(format!(
                        "preceptor {} unavailable on {}",
                        c.preceptor.id, c.date
                    ))
                }
            }
            ConstraintId::PreceptorDailyCapacity => {
                let max = self.capacity.max_per_day(
                    c.preceptor,
                    &c.clerkship.id,
                    c.requirement_type,
                    self.config,
                );
                if ledger.day_count(&c.preceptor.id, c.date) < max {
                    Outcome::Accept
                } else {
                    Outcome::Reject(format!(
                        "preceptor {} at daily capacity ({}) on {}",
                        c.preceptor.id, max, c.date
                    ))
                }
            }
            ConstraintId::PreceptorYearlyCapacity => {
                let max = self.capacity.max_per_year(
                    c.preceptor,
                    &c.clerkship.id,
                    c.requirement_type,
                    self.config,
                );
                let year = crate::domain::calendar::year_of(c.date);
                if ledger.year_count(&c.preceptor.id, year) < max {
                    Outcome::Accept
                } else {
                    Outcome::Reject(format!(
                        "preceptor {} at yearly capacity ({}) for {}",
                        c.preceptor.id, max, year
                    ))
                }
            }
            ConstraintId::HealthSystemRule => {
                let onboarded = c
                    .student
                    .onboarded_health_systems
                    .contains(&c.preceptor.health_system_id);
                match self.config.health_system_rule {
                    HealthSystemRule::NoPreference => Outcome::Accept,
                    HealthSystemRule::EnforceSameSystem => {
                        if onboarded {
                            Outcome::Accept
                        } else {
                            Outcome::Reject(format!(
                                "student {} not onboarded to health system {}",
                                c.student.id, c.preceptor.health_system_id
                            ))
                        }
                    }
                    HealthSystemRule::PreferSameSystem => {
                        if onboarded {
                            Outcome::Accept
                        } else {
                            Outcome::Penalty {
                                reason: format!(
                                    "student {} outside preferred health system {}",
                                    c.student.id, c.preceptor.health_system_id
                                ),
                                cost: 1,
                            }
                        }
                    }
                }
            }
            ConstraintId::SpecialtyMatch => {
                if let Some(elective) = c.elective {
                    if let Some(required) = &elective.specialty {
                        if c.preceptor.specialty.as_deref() != Some(required.as_str()) {
                            return Outcome::Reject(format!(
                                "elective {} requires specialty {}",
                                elective.id, required
                            ));
                        }
                    }
                    return Outcome::Accept;
                }
                if let Some(required) = &c.clerkship.specialty {
                    // A team placement delegates specialty matching to the
                    // team's own formation flag.
                    let enforced = c.team.map_or(true, |t| t.require_same_specialty);
                    if enforced && c.preceptor.specialty.as_deref() != Some(required.as_str()) {
                        return Outcome::Reject(format!(
                            "clerkship {} requires specialty {}",
                            c.clerkship.id, required
                        ));
                    }
                }
                Outcome::Accept
            }
            ConstraintId::ElectivePreceptorAllowed => {
                if let Some(elective) = c.elective {
                    if !elective.allowed_preceptor_ids.is_empty()
                        && !elective
                            .allowed_preceptor_ids
                            .iter()
                            .any(|p| p == &c.preceptor.id)
                    {
                        return Outcome::Reject(format!(
                            "preceptor {} not in allow-list of elective {}",
                            c.preceptor.id, elective.id
                        ));
                    }
                }
                Outcome::Accept
            }
            ConstraintId::SameSiteForBlock => {
                match (c.block_site, c.site_id) {
                    (Some(block_site), Some(site)) if block_site != site => {
                        Outcome::Reject(format!(
                            "site {} differs from block site {}",
                            site, block_site
                        ))
                    }
                    (Some(_), None) => {
                        Outcome::Reject("block assignments require a site".to_string())
                    }
                    _ => Outcome::Accept,
                }
            }
            ConstraintId::TeamMembership => {
                if !c.via_fallback {
                    return Outcome::Accept;
                }
                if !self.config.allow_fallbacks {
                    return Outcome::Reject("fallbacks are disabled".to_string());
                }
                let in_team = c
                    .team
                    .map_or(false, |t| {
                        t.members.iter().any(|m| m.preceptor_id == c.preceptor.id)
                    });
                if in_team || self.config.fallback_allow_cross_system {
                    Outcome::Accept
                } else {
                    Outcome::Reject(format!(
                        "fallback preceptor {} outside the team and cross-team fallback is disabled",
                        c.preceptor.id
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_config, SchedulingDefaults};
    use crate::domain::{Clerkship, ClerkshipType, TeamMember};

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    struct Fixture {
        student: Student,
        preceptor: Preceptor,
        clerkship: Clerkship,
        blackouts: BTreeSet<NaiveDate>,
        availability: AvailabilityIndex,
        capacity: CapacityIndex,
        config: ResolvedConfig,
        bypass: BTreeSet<ConstraintId>,
    }

    impl Fixture {
        fn new() -> Self {
            let clerkship = Clerkship {
                id: "c1".into(),
                name: "FM".into(),
                clerkship_type: ClerkshipType::Outpatient,
                required_days: 10,
                specialty: None,
            };
            let config = resolve_config(
                &clerkship,
                RequirementType::Outpatient,
                &SchedulingDefaults::default(),
                None,
            )
            .unwrap();
            Self {
                student: Student {
                    id: "s1".into(),
                    name: "Alice".into(),
                    onboarded_health_systems: ["hs1".to_string()].into_iter().collect(),
                },
                preceptor: Preceptor {
                    id: "p1".into(),
                    name: "Dr P".into(),
                    specialty: None,
                    health_system_id: "hs1".into(),
                    site_ids: vec!["site1".into()],
                    max_students: 1,
                    is_global_fallback_only: false,
                },
                clerkship,
                blackouts: BTreeSet::new(),
                availability: AvailabilityIndex::from_records(&[]),
                capacity: CapacityIndex::from_rules(&[]),
                config,
                bypass: BTreeSet::new(),
            }
        }

        fn set(&self) -> ConstraintSet<'_> {
            ConstraintSet::new(
                (d("2026-01-01"), d("2026-01-31")),
                &self.blackouts,
                &self.availability,
                &self.capacity,
                &self.config,
                &self.bypass,
            )
        }

        fn candidate(&self, date: &str) -> Candidate<'_> {
            Candidate {
                student: &self.student,
                preceptor: &self.preceptor,
                clerkship: &self.clerkship,
                elective: None,
                requirement_type: RequirementType::Outpatient,
                site_id: Some("site1"),
                date: d(date),
                block_site: None,
                via_fallback: false,
                team: None,
            }
        }
    }

    #[test]
    fn test_accepts_clean_candidate() {
        let f = Fixture::new();
        let eval = f.set().evaluate(&f.candidate("2026-01-05"), &CapacityLedger::default());
        assert!(eval.accepted());
        assert_eq!(eval.penalty, 0);
    }

    #[test]
    fn test_rejects_out_of_window_and_blackout() {
        let mut f = Fixture::new();
        f.blackouts.insert(d("2026-01-06"));

        let eval = f.set().evaluate(&f.candidate("2026-02-02"), &CapacityLedger::default());
        assert!(!eval.accepted());
        assert_eq!(eval.rejections[0].0, ConstraintId::DateInWindow);

        let eval = f.set().evaluate(&f.candidate("2026-01-06"), &CapacityLedger::default());
        assert!(eval
            .rejections
            .iter()
            .any(|(id, _)| *id == ConstraintId::NotBlackedOut));
    }

    #[test]
    fn test_rejects_double_booked_student_and_full_preceptor() {
        let f = Fixture::new();
        let mut ledger = CapacityLedger::default();
        ledger.record("s1", "p-other", d("2026-01-05"));
        let eval = f.set().evaluate(&f.candidate("2026-01-05"), &ledger);
        assert!(eval
            .rejections
            .iter()
            .any(|(id, _)| *id == ConstraintId::StudentNotDoubleBooked));

        // max_students = 1 and another student already with p1 that day
        let mut ledger = CapacityLedger::default();
        ledger.record("s2", "p1", d("2026-01-05"));
        let eval = f.set().evaluate(&f.candidate("2026-01-05"), &ledger);
        assert!(eval
            .rejections
            .iter()
            .any(|(id, _)| *id == ConstraintId::PreceptorDailyCapacity));
    }

    #[test]
    fn test_health_system_enforce_and_prefer() {
        let mut f = Fixture::new();
        f.preceptor.health_system_id = "hs2".into();

        let eval = f.set().evaluate(&f.candidate("2026-01-05"), &CapacityLedger::default());
        assert!(eval
            .rejections
            .iter()
            .any(|(id, _)| *id == ConstraintId::HealthSystemRule));

        f.config.health_system_rule = HealthSystemRule::PreferSameSystem;
        let eval = f.set().evaluate(&f.candidate("2026-01-05"), &CapacityLedger::default());
        assert!(eval.accepted());
        assert_eq!(eval.penalty, 1);
    }

    #[test]
    fn test_bypass_converts_rejection_to_warning() {
        let mut f = Fixture::new();
        f.preceptor.health_system_id = "hs2".into();
        f.bypass.insert(ConstraintId::HealthSystemRule);

        let eval = f.set().evaluate(&f.candidate("2026-01-05"), &CapacityLedger::default());
        assert!(eval.accepted());
        assert_eq!(eval.bypassed.len(), 1);
        assert_eq!(eval.bypassed[0].0, ConstraintId::HealthSystemRule);
    }

    #[test]
    fn test_elective_allow_list_and_specialty() {
        let mut f = Fixture::new();
        let elective = Elective {
            id: "e1".into(),
            parent_clerkship_id: "c1".into(),
            name: "Cardio".into(),
            minimum_days: 5,
            specialty: Some("cardiology".into()),
            is_required: false,
            allowed_preceptor_ids: vec!["p2".into()],
        };
        f.config.strategy = Strategy::DailyRotation;
        let set = f.set();
        let mut candidate = f.candidate("2026-01-05");
        candidate.elective = Some(&elective);
        candidate.requirement_type = RequirementType::Elective;

        let eval = set.evaluate(&candidate, &CapacityLedger::default());
        let ids: Vec<ConstraintId> = eval.rejections.iter().map(|(id, _)| *id).collect();
        assert!(ids.contains(&ConstraintId::SpecialtyMatch));
        assert!(ids.contains(&ConstraintId::ElectivePreceptorAllowed));

        // Empty allow-list means any preceptor; matching specialty passes.
        let open = Elective {
            allowed_preceptor_ids: vec![],
            specialty: None,
            ..elective.clone()
        };
        let mut candidate = f.candidate("2026-01-05");
        candidate.elective = Some(&open);
        let eval = f.set().evaluate(&candidate, &CapacityLedger::default());
        assert!(eval.accepted());
    }

    #[test]
    fn test_block_site_consistency() {
        let mut f = Fixture::new();
        f.config.strategy = Strategy::BlockBased;
        let set = f.set();
        let mut candidate = f.candidate("2026-01-05");
        candidate.block_site = Some("site2");
        let eval = set.evaluate(&candidate, &CapacityLedger::default());
        assert!(eval
            .rejections
            .iter()
            .any(|(id, _)| *id == ConstraintId::SameSiteForBlock));
    }

    #[test]
    fn test_team_membership_fallback_rules() {
        let mut f = Fixture::new();
        f.config.strategy = Strategy::ContinuousTeam;
        let team = Team {
            id: "t1".into(),
            clerkship_id: "c1".into(),
            site_ids: vec![],
            require_same_health_system: true,
            require_same_site: false,
            require_same_specialty: false,
            members: vec![TeamMember {
                preceptor_id: "p-primary".into(),
                priority: 1,
            }],
        };
        let set = f.set();
        let mut candidate = f.candidate("2026-01-05");
        candidate.via_fallback = true;
        candidate.team = Some(&team);

        // p1 is not a team member and cross-team fallback is off by default.
        let eval = set.evaluate(&candidate, &CapacityLedger::default());
        assert!(eval
            .rejections
            .iter()
            .any(|(id, _)| *id == ConstraintId::TeamMembership));

        f.config.fallback_allow_cross_system = true;
        let set = f.set();
        let mut candidate = f.candidate("2026-01-05");
        candidate.via_fallback = true;
        candidate.team = Some(&team);
        let eval = set.evaluate(&candidate, &CapacityLedger::default());
        assert!(eval.accepted());
    }
}
