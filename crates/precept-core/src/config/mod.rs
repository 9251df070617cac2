//! Per-clerkship scheduling configuration resolution.
//!
//! Each requirement type (outpatient / inpatient / elective) carries a fully
//! populated set of global defaults. A clerkship may override any subset of
//! fields; resolution is field-by-field, recording which fields were
//! overridden and a source tag. Validation collects every failed rule before
//! reporting, so a misconfigured clerkship surfaces all problems at once.

use serde::{Deserialize, Serialize};

use crate::domain::{Clerkship, CoreError, HealthSystemRule, RequirementType, Strategy};

/// Fully populated defaults for one requirement type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalDefaults {
    pub strategy: Strategy,
    pub health_system_rule: HealthSystemRule,
    /// Students a preceptor hosts per day when no capacity rule applies.
    pub max_per_day: u32,
    /// Students a preceptor hosts per calendar year when no rule applies.
    pub max_per_year: u32,
    pub allow_teams: bool,
    pub allow_fallbacks: bool,
    pub fallback_requires_approval: bool,
    pub fallback_allow_cross_system: bool,
    /// Working days per block; required for block-based inpatient configs.
    pub block_size_days: Option<u32>,
    pub allow_partial_blocks: bool,
    /// Keep consecutive blocks with the same preceptor when possible.
    pub prefer_continuous_blocks: bool,
    pub team_size_min: Option<u32>,
    pub team_size_max: Option<u32>,
    pub max_blocks_per_year: Option<u32>,
}

/// The three global default sets, one per requirement type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingDefaults {
    pub outpatient: GlobalDefaults,
    pub inpatient: GlobalDefaults,
    pub elective: GlobalDefaults,
}

impl Default for SchedulingDefaults {
    fn default() -> Self {
        Self {
            outpatient: GlobalDefaults {
                strategy: Strategy::ContinuousSingle,
                health_system_rule: HealthSystemRule::EnforceSameSystem,
                max_per_day: 2,
                max_per_year: 40,
                allow_teams: true,
                allow_fallbacks: true,
                fallback_requires_approval: false,
                fallback_allow_cross_system: false,
                block_size_days: None,
                allow_partial_blocks: false,
                prefer_continuous_blocks: false,
                team_size_min: None,
                team_size_max: None,
                max_blocks_per_year: None,
            },
            inpatient: GlobalDefaults {
                strategy: Strategy::BlockBased,
                health_system_rule: HealthSystemRule::EnforceSameSystem,
                max_per_day: 2,
                max_per_year: 40,
                allow_teams: false,
                allow_fallbacks: true,
                fallback_requires_approval: false,
                fallback_allow_cross_system: false,
                block_size_days: Some(5),
                allow_partial_blocks: true,
                prefer_continuous_blocks: true,
                team_size_min: None,
                team_size_max: None,
                max_blocks_per_year: None,
            },
            elective: GlobalDefaults {
                strategy: Strategy::DailyRotation,
                health_system_rule: HealthSystemRule::PreferSameSystem,
                max_per_day: 2,
                max_per_year: 40,
                allow_teams: false,
                allow_fallbacks: true,
                fallback_requires_approval: true,
                fallback_allow_cross_system: false,
                block_size_days: None,
                allow_partial_blocks: false,
                prefer_continuous_blocks: false,
                team_size_min: None,
                team_size_max: None,
                max_blocks_per_year: None,
            },
        }
    }
}

impl SchedulingDefaults {
    pub fn for_type(&self, rt: RequirementType) -> &GlobalDefaults {
        match rt {
            RequirementType::Outpatient => &self.outpatient,
            RequirementType::Inpatient => &self.inpatient,
            RequirementType::Elective => &self.elective,
        }
    }
}

/// Per-clerkship override row; any `None` field inherits the global default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClerkshipConfigOverride {
    pub clerkship_id: String,
    pub strategy: Option<Strategy>,
    pub health_system_rule: Option<HealthSystemRule>,
    pub max_per_day: Option<u32>,
    pub max_per_year: Option<u32>,
    pub allow_teams: Option<bool>,
    pub allow_fallbacks: Option<bool>,
    pub fallback_requires_approval: Option<bool>,
    pub fallback_allow_cross_system: Option<bool>,
    pub block_size_days: Option<u32>,
    pub allow_partial_blocks: Option<bool>,
    pub prefer_continuous_blocks: Option<bool>,
    pub team_size_min: Option<u32>,
    pub team_size_max: Option<u32>,
    pub max_blocks_per_year: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    GlobalDefaults,
    PartialOverride,
    FullOverride,
}

/// The fields an override row may touch, in declaration order.
const OVERRIDABLE_FIELDS: usize = 14;

/// Fully resolved configuration for one (clerkship, requirement type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub strategy: Strategy,
    pub health_system_rule: HealthSystemRule,
    pub max_per_day: u32,
    pub max_per_year: u32,
    pub allow_teams: bool,
    pub allow_fallbacks: bool,
    pub fallback_requires_approval: bool,
    pub fallback_allow_cross_system: bool,
    pub block_size_days: Option<u32>,
    pub allow_partial_blocks: bool,
    pub prefer_continuous_blocks: bool,
    pub team_size_min: Option<u32>,
    pub team_size_max: Option<u32>,
    pub max_blocks_per_year: Option<u32>,
    pub overridden_fields: Vec<String>,
    pub source: ConfigSource,
}

/// Resolve the effective config for `clerkship` as a `requirement_type`
/// requirement. Validation never stops at the first failure.
pub fn resolve_config(
    clerkship: &Clerkship,
    requirement_type: RequirementType,
    defaults: &SchedulingDefaults,
    overrides: Option<&ClerkshipConfigOverride>,
) -> Result<ResolvedConfig, CoreError> {
    let base = defaults.for_type(requirement_type);
    let mut overridden: Vec<String> = Vec::new();

    macro_rules! pick {
        ($field:ident) => {
            match overrides.and_then(|o| o.$field) {
                Some(v) => {
                    overridden.push(stringify!($field).to_string());
                    v
                }
                None => base.$field,
            }
        };
        (opt $field:ident) => {
            match overrides.and_then(|o| o.$field) {
                Some(v) => {
                    overridden.push(stringify!($field).to_string());
                    Some(v)
                }
                None => base.$field,
            }
        };
    }

    let strategy = pick!(strategy);
    let health_system_rule = pick!(health_system_rule);
    let max_per_day = pick!(max_per_day);
    let max_per_year = pick!(max_per_year);
    let allow_teams = pick!(allow_teams);
    let allow_fallbacks = pick!(allow_fallbacks);
    let fallback_requires_approval = pick!(fallback_requires_approval);
    let fallback_allow_cross_system = pick!(fallback_allow_cross_system);
    let block_size_days = pick!(opt block_size_days);
    let allow_partial_blocks = pick!(allow_partial_blocks);
    let prefer_continuous_blocks = pick!(prefer_continuous_blocks);
    let team_size_min = pick!(opt team_size_min);
    let team_size_max = pick!(opt team_size_max);
    let max_blocks_per_year = pick!(opt max_blocks_per_year);

    let source = if overridden.is_empty() {
        ConfigSource::GlobalDefaults
    } else if overridden.len() == OVERRIDABLE_FIELDS {
        ConfigSource::FullOverride
    } else {
        ConfigSource::PartialOverride
    };

    let mut failures: Vec<String> = Vec::new();

    if requirement_type == RequirementType::Inpatient
        && strategy == Strategy::BlockBased
        && block_size_days.map_or(true, |d| d == 0)
    {
        failures.push("inpatient block_based requires block_size_days > 0".to_string());
    }

    if allow_teams {
        if let (Some(min), Some(max)) = (team_size_min, team_size_max) {
            if min > max {
                failures.push(format!(
                    "team_size_min ({}) must not exceed team_size_max ({})",
                    min, max
                ));
            }
        }
    }

    if max_per_day > max_per_year {
        failures.push(format!(
            "max_per_day ({}) must not exceed max_per_year ({})",
            max_per_day, max_per_year
        ));
    }

    if !failures.is_empty() {
        return Err(CoreError::ConfigInvalid {
            clerkship_id: clerkship.id.clone(),
            failures,
        });
    }

    Ok(ResolvedConfig {
        strategy,
        health_system_rule,
        max_per_day,
        max_per_year,
        allow_teams,
        allow_fallbacks,
        fallback_requires_approval,
        fallback_allow_cross_system,
        block_size_days,
        allow_partial_blocks,
        prefer_continuous_blocks,
        team_size_min,
        team_size_max,
        max_blocks_per_year,
        overridden_fields: overridden,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClerkshipType;

    fn clerkship(ct: ClerkshipType) -> Clerkship {
        Clerkship {
            id: "c1".into(),
            name: "Family Medicine".into(),
            clerkship_type: ct,
            required_days: 20,
            specialty: None,
        }
    }

    #[test]
    fn test_resolves_from_global_defaults() {
        let defaults = SchedulingDefaults::default();
        let cfg = resolve_config(
            &clerkship(ClerkshipType::Outpatient),
            RequirementType::Outpatient,
            &defaults,
            None,
        )
        .unwrap();
        assert_eq!(cfg.strategy, Strategy::ContinuousSingle);
        assert_eq!(cfg.source, ConfigSource::GlobalDefaults);
        assert!(cfg.overridden_fields.is_empty());
    }

    #[test]
    fn test_partial_override_records_fields() {
        let defaults = SchedulingDefaults::default();
        let ov = ClerkshipConfigOverride {
            clerkship_id: "c1".into(),
            strategy: Some(Strategy::DailyRotation),
            max_per_day: Some(1),
            ..Default::default()
        };
        let cfg = resolve_config(
            &clerkship(ClerkshipType::Outpatient),
            RequirementType::Outpatient,
            &defaults,
            Some(&ov),
        )
        .unwrap();
        assert_eq!(cfg.strategy, Strategy::DailyRotation);
        assert_eq!(cfg.max_per_day, 1);
        assert_eq!(cfg.source, ConfigSource::PartialOverride);
        assert_eq!(
            cfg.overridden_fields,
            vec!["strategy".to_string(), "max_per_day".to_string()]
        );
    }

    #[test]
    fn test_inpatient_block_based_requires_block_size() {
        let mut defaults = SchedulingDefaults::default();
        defaults.inpatient.block_size_days = None;
        let err = resolve_config(
            &clerkship(ClerkshipType::Inpatient),
            RequirementType::Inpatient,
            &defaults,
            None,
        )
        .unwrap_err();
        match err {
            CoreError::ConfigInvalid { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("block_size_days"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validation_collects_all_failures() {
        let defaults = SchedulingDefaults::default();
        let ov = ClerkshipConfigOverride {
            clerkship_id: "c1".into(),
            strategy: Some(Strategy::BlockBased),
            block_size_days: Some(0),
            allow_teams: Some(true),
            team_size_min: Some(4),
            team_size_max: Some(2),
            max_per_day: Some(50),
            max_per_year: Some(10),
            ..Default::default()
        };
        let err = resolve_config(
            &clerkship(ClerkshipType::Inpatient),
            RequirementType::Inpatient,
            &defaults,
            Some(&ov),
        )
        .unwrap_err();
        match err {
            CoreError::ConfigInvalid { failures, .. } => {
                assert_eq!(failures.len(), 3, "got: {failures:?}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
