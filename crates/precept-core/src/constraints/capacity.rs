//! Capacity rule lookup with most-specific-wins resolution.

use std::collections::BTreeMap;

use crate::config::ResolvedConfig;
use crate::domain::{CapacityRule, Preceptor, RequirementType};

/// Indexed capacity rules for one scheduling invocation.
///
/// Resolution order for each field:
/// (preceptor, clerkship, type) > (preceptor, clerkship) >
/// (preceptor, type) > (preceptor); absent everywhere, the resolved config
/// and the preceptor's own ceiling apply.
#[derive(Debug, Default)]
pub struct CapacityIndex {
    by_preceptor: BTreeMap<String, Vec<CapacityRule>>,
}

fn specificity(rule: &CapacityRule) -> u8 {
    match (&rule.clerkship_id, &rule.requirement_type) {
        (Some(_), Some(_)) => 3,
        (Some(_), None) => 2,
        (None, Some(_)) => 1,
        (None, None) => 0,
    }
}

impl CapacityIndex {
    pub fn from_rules(rules: &[CapacityRule]) -> Self {
        let mut by_preceptor: BTreeMap<String, Vec<CapacityRule>> = BTreeMap::new();
        for rule in rules {
            by_preceptor
                .entry(rule.preceptor_id.clone())
                .or_default()
                .push(rule.clone());
        }
        for rules in by_preceptor.values_mut() {
            rules.sort_by(|a, b| specificity(b).cmp(&specificity(a)));
        }
        Self { by_preceptor }
    }

    fn lookup<F>(
        &self,
        preceptor_id: &str,
        clerkship_id: &str,
        requirement_type: RequirementType,
        field: F,
    ) -> Option<u32>
    where
        F: Fn(&CapacityRule) -> Option<u32>,
    {
        let rules = self.by_preceptor.get(preceptor_id)?;
        rules
            .iter()
            .filter(|r| {
                r.clerkship_id
                    .as_deref()
                    .map_or(true, |c| c == clerkship_id)
                    && r.requirement_type.map_or(true, |t| t == requirement_type)
            })
            .find_map(field)
    }

    /// Resolved students-per-day ceiling. A matching rule wins; otherwise the
    /// preceptor's own ceiling floors the config value.
    pub fn max_per_day(
        &self,
        preceptor: &Preceptor,
        clerkship_id: &str,
        requirement_type: RequirementType,
        config: &ResolvedConfig,
    ) -> u32 {
        self.lookup(&preceptor.id, clerkship_id, requirement_type, |r| {
            r.max_per_day
        })
        .unwrap_or_else(|| preceptor.max_students.min(config.max_per_day))
    }

    pub fn max_per_year(
        &self,
        preceptor: &Preceptor,
        clerkship_id: &str,
        requirement_type: RequirementType,
        config: &ResolvedConfig,
    ) -> u32 {
        self.lookup(&preceptor.id, clerkship_id, requirement_type, |r| {
            r.max_per_year
        })
        .unwrap_or(config.max_per_year)
    }

    /// Blocks-per-year ceiling; `None` means unlimited.
    pub fn max_blocks_per_year(
        &self,
        preceptor: &Preceptor,
        clerkship_id: &str,
        requirement_type: RequirementType,
        config: &ResolvedConfig,
    ) -> Option<u32> {
        self.lookup(&preceptor.id, clerkship_id, requirement_type, |r| {
            r.max_blocks_per_year
        })
        .or(config.max_blocks_per_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_config, SchedulingDefaults};
    use crate::domain::{Clerkship, ClerkshipType};

    fn preceptor(max_students: u32) -> Preceptor {
        Preceptor {
            id: "p1".into(),
            name: "Dr P".into(),
            specialty: None,
            health_system_id: "hs1".into(),
            site_ids: vec![],
            max_students,
            is_global_fallback_only: false,
        }
    }

    fn config() -> ResolvedConfig {
        let clerkship = Clerkship {
            id: "c1".into(),
            name: "FM".into(),
            clerkship_type: ClerkshipType::Outpatient,
            required_days: 10,
            specialty: None,
        };
        resolve_config(
            &clerkship,
            RequirementType::Outpatient,
            &SchedulingDefaults::default(),
            None,
        )
        .unwrap()
    }

    fn rule(
        clerkship_id: Option<&str>,
        rt: Option<RequirementType>,
        max_per_day: Option<u32>,
    ) -> CapacityRule {
        CapacityRule {
            preceptor_id: "p1".into(),
            clerkship_id: clerkship_id.map(Into::into),
            requirement_type: rt,
            max_per_day,
            max_per_year: None,
            max_blocks_per_year: None,
        }
    }

    #[test]
    fn test_no_rule_falls_back_to_preceptor_ceiling() {
        let index = CapacityIndex::from_rules(&[]);
        let cfg = config();
        // config default max_per_day is 2; the preceptor ceiling of 1 floors it
        assert_eq!(
            index.max_per_day(&preceptor(1), "c1", RequirementType::Outpatient, &cfg),
            1
        );
        assert_eq!(
            index.max_per_day(&preceptor(5), "c1", RequirementType::Outpatient, &cfg),
            2
        );
    }

    #[test]
    fn test_most_specific_rule_wins() {
        let rules = vec![
            rule(None, None, Some(4)),
            rule(Some("c1"), Some(RequirementType::Outpatient), Some(1)),
            rule(Some("c1"), None, Some(2)),
            rule(None, Some(RequirementType::Outpatient), Some(3)),
        ];
        let index = CapacityIndex::from_rules(&rules);
        let cfg = config();
        let p = preceptor(9);
        assert_eq!(
            index.max_per_day(&p, "c1", RequirementType::Outpatient, &cfg),
            1
        );
        // Different clerkship: the (preceptor, type) rule applies.
        assert_eq!(
            index.max_per_day(&p, "c2", RequirementType::Outpatient, &cfg),
            3
        );
        // Different type: the (preceptor, clerkship) rule applies for c1.
        assert_eq!(
            index.max_per_day(&p, "c1", RequirementType::Inpatient, &cfg),
            2
        );
        // Nothing matches but the general rule.
        assert_eq!(
            index.max_per_day(&p, "c2", RequirementType::Inpatient, &cfg),
            4
        );
    }

    #[test]
    fn test_field_falls_through_to_less_specific_rule() {
        // The most specific rule does not define max_per_year; the general
        // rule does.
        let rules = vec![
            CapacityRule {
                preceptor_id: "p1".into(),
                clerkship_id: Some("c1".into()),
                requirement_type: Some(RequirementType::Outpatient),
                max_per_day: Some(1),
                max_per_year: None,
                max_blocks_per_year: None,
            },
            CapacityRule {
                preceptor_id: "p1".into(),
                clerkship_id: None,
                requirement_type: None,
                max_per_day: None,
                max_per_year: Some(20),
                max_blocks_per_year: None,
            },
        ];
        let index = CapacityIndex::from_rules(&rules);
        let cfg = config();
        let p = preceptor(9);
        assert_eq!(
            index.max_per_year(&p, "c1", RequirementType::Outpatient, &cfg),
            20
        );
    }
}
