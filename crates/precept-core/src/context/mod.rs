//! In-memory view of everything one scheduling invocation needs.
//!
//! Entities are loaded into flat id-keyed maps; relations stay id-based and
//! lookup indexes are rebuilt per invocation. The context is owned by the
//! invocation and discarded with it.

pub mod availability;

pub use availability::AvailabilityIndex;

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::config::{
    resolve_config, ClerkshipConfigOverride, ResolvedConfig, SchedulingDefaults,
};
use crate::constraints::CapacityIndex;
use crate::domain::{
    Assignment, Availability, BlackoutDate, CapacityRule, Clerkship, CoreError, Elective,
    Enrollment, HealthSystem, Preceptor, Requirement, RequirementType, SchedulingPeriod, Site,
    Student, Team,
};

/// Everything `load_entities` returns for a period.
#[derive(Debug, Clone, Default)]
pub struct EntityBundle {
    pub health_systems: Vec<HealthSystem>,
    pub sites: Vec<Site>,
    pub clerkships: Vec<Clerkship>,
    pub electives: Vec<Elective>,
    pub students: Vec<Student>,
    pub preceptors: Vec<Preceptor>,
    pub teams: Vec<Team>,
    pub capacity_rules: Vec<CapacityRule>,
    pub availability: Vec<Availability>,
    pub blackouts: Vec<BlackoutDate>,
    pub enrollments: Vec<Enrollment>,
    pub defaults: SchedulingDefaults,
    pub config_overrides: Vec<ClerkshipConfigOverride>,
}

/// Materialized, indexed view for one invocation.
pub struct SchedulingContext {
    pub period: SchedulingPeriod,
    pub students: BTreeMap<String, Student>,
    pub preceptors: BTreeMap<String, Preceptor>,
    pub clerkships: BTreeMap<String, Clerkship>,
    pub electives: BTreeMap<String, Elective>,
    pub sites: BTreeMap<String, Site>,
    pub teams_by_clerkship: BTreeMap<String, Vec<Team>>,
    pub availability: AvailabilityIndex,
    pub blackouts: BTreeSet<NaiveDate>,
    pub capacity: CapacityIndex,
    pub existing: Vec<Assignment>,
    pub requirements: Vec<Requirement>,
    configs: BTreeMap<(String, RequirementType), ResolvedConfig>,
}

impl SchedulingContext {
    /// Build the context from a loaded bundle plus the assignments that
    /// survive into this invocation. Fails only on invalid configuration;
    /// dangling references are skipped with a warning.
    pub fn build(
        period: SchedulingPeriod,
        bundle: &EntityBundle,
        existing: Vec<Assignment>,
    ) -> Result<Self, CoreError> {
        let students: BTreeMap<String, Student> = bundle
            .students
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        let preceptors: BTreeMap<String, Preceptor> = bundle
            .preceptors
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();
        let clerkships: BTreeMap<String, Clerkship> = bundle
            .clerkships
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        let electives: BTreeMap<String, Elective> = bundle
            .electives
            .iter()
            .map(|e| (e.id.clone(), e.clone()))
            .collect();
        let sites: BTreeMap<String, Site> = bundle
            .sites
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();

        let mut teams_by_clerkship: BTreeMap<String, Vec<Team>> = BTreeMap::new();
        for team in &bundle.teams {
            if !clerkships.contains_key(&team.clerkship_id) {
                warn!(team = %team.id, clerkship = %team.clerkship_id, "team references unknown clerkship; skipped");
                continue;
            }
            teams_by_clerkship
                .entry(team.clerkship_id.clone())
                .or_default()
                .push(team.clone());
        }
        for teams in teams_by_clerkship.values_mut() {
            teams.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let requirements = derive_requirements(bundle, &students, &clerkships, &electives);

        let overrides: BTreeMap<&str, &ClerkshipConfigOverride> = bundle
            .config_overrides
            .iter()
            .map(|o| (o.clerkship_id.as_str(), o))
            .collect();

        let mut configs: BTreeMap<(String, RequirementType), ResolvedConfig> = BTreeMap::new();
        for req in &requirements {
            let key = (req.clerkship_id.clone(), req.requirement_type);
            if configs.contains_key(&key) {
                continue;
            }
            let clerkship = clerkships
                .get(&req.clerkship_id)
                .ok_or_else(|| CoreError::not_found("clerkship", req.clerkship_id.clone()))?;
            let config = resolve_config(
                clerkship,
                req.requirement_type,
                &bundle.defaults,
                overrides.get(req.clerkship_id.as_str()).copied(),
            )?;
            configs.insert(key, config);
        }

        Ok(Self {
            period,
            students,
            preceptors,
            clerkships,
            electives,
            sites,
            teams_by_clerkship,
            availability: AvailabilityIndex::from_records(&bundle.availability),
            blackouts: bundle.blackouts.iter().map(|b| b.date).collect(),
            capacity: CapacityIndex::from_rules(&bundle.capacity_rules),
            existing,
            requirements,
            configs,
        })
    }

    pub fn config_for(&self, req: &Requirement) -> Result<&ResolvedConfig, CoreError> {
        self.configs
            .get(&(req.clerkship_id.clone(), req.requirement_type))
            .ok_or_else(|| {
                CoreError::Fatal(format!(
                    "no resolved config for clerkship {} as {}",
                    req.clerkship_id, req.requirement_type
                ))
            })
    }

    /// Resolved config for an arbitrary (clerkship, type) pair; used by the
    /// editing operations, which validate persisted rows rather than derived
    /// requirements.
    pub fn config_for_clerkship(
        &self,
        clerkship_id: &str,
        requirement_type: RequirementType,
        defaults: &SchedulingDefaults,
        overrides: &[ClerkshipConfigOverride],
    ) -> Result<ResolvedConfig, CoreError> {
        if let Some(config) = self
            .configs
            .get(&(clerkship_id.to_string(), requirement_type))
        {
            return Ok(config.clone());
        }
        let clerkship = self
            .clerkships
            .get(clerkship_id)
            .ok_or_else(|| CoreError::not_found("clerkship", clerkship_id.to_string()))?;
        let ov = overrides.iter().find(|o| o.clerkship_id == clerkship_id);
        resolve_config(clerkship, requirement_type, defaults, ov)
    }

    pub fn teams_for(&self, clerkship_id: &str) -> &[Team] {
        self.teams_by_clerkship
            .get(clerkship_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Existing assignments of one student, in date order.
    pub fn assignments_for_student(&self, student_id: &str) -> Vec<&Assignment> {
        let mut rows: Vec<&Assignment> = self
            .existing
            .iter()
            .filter(|a| a.student_id == student_id)
            .collect();
        rows.sort_by_key(|a| a.date);
        rows
    }
}

/// Derive the per-student requirement list from enrollments.
///
/// A clerkship enrollment yields a requirement for the clerkship plus one per
/// required elective. Optional electives need an explicit opt-in enrollment
/// row.
fn derive_requirements(
    bundle: &EntityBundle,
    students: &BTreeMap<String, Student>,
    clerkships: &BTreeMap<String, Clerkship>,
    electives: &BTreeMap<String, Elective>,
) -> Vec<Requirement> {
    let mut enrollments: Vec<&Enrollment> = bundle.enrollments.iter().collect();
    enrollments.sort_by(|a, b| {
        (&a.student_id, &a.clerkship_id, &a.elective_id)
            .cmp(&(&b.student_id, &b.clerkship_id, &b.elective_id))
    });

    let mut seen: BTreeSet<(String, String, Option<String>)> = BTreeSet::new();
    let mut requirements = Vec::new();

    let mut push = |req: Requirement, requirements: &mut Vec<Requirement>| {
        let key = (
            req.student_id.clone(),
            req.clerkship_id.clone(),
            req.elective_id.clone(),
        );
        if seen.insert(key) {
            requirements.push(req);
        }
    };

    for enrollment in enrollments {
        if !students.contains_key(&enrollment.student_id) {
            warn!(student = %enrollment.student_id, "enrollment references unknown student; skipped");
            continue;
        }
        let Some(clerkship) = clerkships.get(&enrollment.clerkship_id) else {
            warn!(clerkship = %enrollment.clerkship_id, "enrollment references unknown clerkship; skipped");
            continue;
        };

        match &enrollment.elective_id {
            None => {
                push(
                    Requirement {
                        student_id: enrollment.student_id.clone(),
                        clerkship_id: clerkship.id.clone(),
                        requirement_type: clerkship.clerkship_type.into(),
                        required_days: clerkship.required_days,
                        elective_id: None,
                    },
                    &mut requirements,
                );
                let mut required: Vec<&Elective> = electives
                    .values()
                    .filter(|e| e.parent_clerkship_id == clerkship.id && e.is_required)
                    .collect();
                required.sort_by(|a, b| a.id.cmp(&b.id));
                for elective in required {
                    push(
                        Requirement {
                            student_id: enrollment.student_id.clone(),
                            clerkship_id: clerkship.id.clone(),
                            requirement_type: RequirementType::Elective,
                            required_days: elective.minimum_days,
                            elective_id: Some(elective.id.clone()),
                        },
                        &mut requirements,
                    );
                }
            }
            Some(elective_id) => {
                let Some(elective) = electives.get(elective_id) else {
                    warn!(elective = %elective_id, "enrollment references unknown elective; skipped");
                    continue;
                };
                if elective.parent_clerkship_id != clerkship.id {
                    warn!(elective = %elective_id, clerkship = %clerkship.id, "elective opt-in does not match parent clerkship; skipped");
                    continue;
                }
                push(
                    Requirement {
                        student_id: enrollment.student_id.clone(),
                        clerkship_id: clerkship.id.clone(),
                        requirement_type: RequirementType::Elective,
                        required_days: elective.minimum_days,
                        elective_id: Some(elective.id.clone()),
                    },
                    &mut requirements,
                );
            }
        }
    }

    requirements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClerkshipType;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn period() -> SchedulingPeriod {
        SchedulingPeriod {
            id: "per1".into(),
            start_date: d("2026-01-01"),
            end_date: d("2026-06-30"),
            is_active: true,
        }
    }

    fn bundle() -> EntityBundle {
        EntityBundle {
            students: vec![Student {
                id: "s1".into(),
                name: "Alice".into(),
                onboarded_health_systems: ["hs1".to_string()].into_iter().collect(),
            }],
            clerkships: vec![
                Clerkship {
                    id: "c1".into(),
                    name: "FM".into(),
                    clerkship_type: ClerkshipType::Outpatient,
                    required_days: 20,
                    specialty: None,
                },
                Clerkship {
                    id: "c2".into(),
                    name: "Electives".into(),
                    clerkship_type: ClerkshipType::ElectiveParent,
                    required_days: 0,
                    specialty: None,
                },
            ],
            electives: vec![
                Elective {
                    id: "e-req".into(),
                    parent_clerkship_id: "c1".into(),
                    name: "Required sub".into(),
                    minimum_days: 5,
                    specialty: None,
                    is_required: true,
                    allowed_preceptor_ids: vec![],
                },
                Elective {
                    id: "e-opt".into(),
                    parent_clerkship_id: "c2".into(),
                    name: "Optional sub".into(),
                    minimum_days: 3,
                    specialty: None,
                    is_required: false,
                    allowed_preceptor_ids: vec![],
                },
            ],
            enrollments: vec![
                Enrollment {
                    student_id: "s1".into(),
                    clerkship_id: "c1".into(),
                    elective_id: None,
                },
                Enrollment {
                    student_id: "s1".into(),
                    clerkship_id: "c2".into(),
                    elective_id: Some("e-opt".into()),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_requirement_derivation() {
        let ctx = SchedulingContext::build(period(), &bundle(), vec![]).unwrap();
        let keys: Vec<(String, Option<String>)> = ctx
            .requirements
            .iter()
            .map(|r| (r.clerkship_id.clone(), r.elective_id.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("c1".to_string(), None),
                ("c1".to_string(), Some("e-req".to_string())),
                ("c2".to_string(), Some("e-opt".to_string())),
            ]
        );
        assert_eq!(ctx.requirements[0].required_days, 20);
        assert_eq!(ctx.requirements[1].required_days, 5);
        assert_eq!(ctx.requirements[1].requirement_type, RequirementType::Elective);
    }

    #[test]
    fn test_optional_elective_needs_opt_in() {
        let mut b = bundle();
        // Drop the opt-in row: only the c1 requirements remain.
        b.enrollments.retain(|e| e.elective_id.is_none());
        let ctx = SchedulingContext::build(period(), &b, vec![]).unwrap();
        assert_eq!(ctx.requirements.len(), 2);
        assert!(ctx
            .requirements
            .iter()
            .all(|r| r.elective_id.as_deref() != Some("e-opt")));
    }

    #[test]
    fn test_dangling_enrollment_is_skipped() {
        let mut b = bundle();
        b.enrollments.push(Enrollment {
            student_id: "ghost".into(),
            clerkship_id: "c1".into(),
            elective_id: None,
        });
        let ctx = SchedulingContext::build(period(), &b, vec![]).unwrap();
        assert!(ctx.requirements.iter().all(|r| r.student_id != "ghost"));
    }

    #[test]
    fn test_configs_resolved_per_requirement_type() {
        let ctx = SchedulingContext::build(period(), &bundle(), vec![]).unwrap();
        let req = &ctx.requirements[0];
        let cfg = ctx.config_for(req).unwrap();
        assert_eq!(cfg.strategy, crate::domain::Strategy::ContinuousSingle);
    }
}
