//! Parameter taxonomy: the ordered catalog of column groups a study works with.
//!
//! Key order is the order of definition, never sorted. It drives column order
//! of conformed tables and figure layout downstream.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::data::model::{ColumnKey, HierKey};
use crate::error::StudyError;

// ---------------------------------------------------------------------------
// By-country dataset defaults
// ---------------------------------------------------------------------------

pub const DATE_COLUMN: &str = "date";
pub const REGION_COLUMN: &str = "administrative_area_level_1";
/// Synthetic numeric row id some exports carry as a leading index level.
pub const ROW_ID_COLUMN: &str = "id";

pub fn default_index_columns() -> Vec<String> {
    vec![DATE_COLUMN.to_string(), REGION_COLUMN.to_string()]
}

const EPIDEMIC: &[&str] = &["confirmed", "deaths", "recovered"];
const PROTECTION: &[&str] = &["tests", "vaccines", "people_vaccinated", "people_fully_vaccinated"];
const HEALTH_SYSTEM: &[&str] = &["hosp", "icu", "vent"];
const SOCIAL_DISTANCE: &[&str] = &[
    "school_closing",
    "workplace_closing",
    "cancel_events",
    "gatherings_restrictions",
    "stay_home_restrictions",
];
const MOVEMENT_RESTRICTIONS: &[&str] = &[
    "transport_closing",
    "internal_movement_restrictions",
    "international_movement_restrictions",
];
const INFORMATION: &[&str] = &["information_campaigns"];
const TRACING: &[&str] = &["testing_policy", "contact_tracing"];
const PROTECTION_MEASURES: &[&str] = &[
    "facial_coverings",
    "vaccination_policy",
    "elderly_people_protection",
];
const INDICES: &[&str] = &[
    "government_response_index",
    "stringency_index",
    "containment_health_index",
    "economic_support_index",
];

fn keys(domain: &str, subdomain: &str, names: &[&str]) -> Vec<HierKey> {
    names
        .iter()
        .map(|name| HierKey::new(domain, subdomain, name))
        .collect()
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A named, ordered list of column keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterGroup {
    pub name: String,
    pub keys: Vec<HierKey>,
}

impl ParameterGroup {
    pub fn new(name: &str, keys: Vec<HierKey>) -> Self {
        ParameterGroup {
            name: name.to_string(),
            keys,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaxonomyDef {
    groups: Vec<ParameterGroup>,
}

/// Ordered groups of hierarchical keys. Keys are unique across the taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaxonomyDef")]
pub struct Taxonomy {
    groups: Vec<ParameterGroup>,
}

impl TryFrom<TaxonomyDef> for Taxonomy {
    type Error = StudyError;

    fn try_from(def: TaxonomyDef) -> Result<Self, Self::Error> {
        Taxonomy::new(def.groups)
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Taxonomy::covid_by_country()
    }
}

impl Taxonomy {
    /// Build a taxonomy, rejecting duplicate keys and empty groups.
    pub fn new(groups: Vec<ParameterGroup>) -> Result<Self, StudyError> {
        let mut seen = BTreeSet::new();
        for group in &groups {
            if group.keys.is_empty() {
                return Err(StudyError::ConfigurationError(format!(
                    "taxonomy group '{}' has no keys",
                    group.name
                )));
            }
            for key in &group.keys {
                if !seen.insert(key) {
                    return Err(StudyError::ConfigurationError(format!(
                        "taxonomy key {key} appears more than once"
                    )));
                }
            }
        }
        Ok(Taxonomy { groups })
    }

    /// The five sub-groups the policy group is concatenated from, in order.
    pub fn policy_subgroups() -> Vec<ParameterGroup> {
        vec![
            ParameterGroup::new("social_distance", keys("policy", "social_distance", SOCIAL_DISTANCE)),
            ParameterGroup::new(
                "movement_restrictions",
                keys("policy", "movement_restrictions", MOVEMENT_RESTRICTIONS),
            ),
            ParameterGroup::new("information", keys("policy", "information", INFORMATION)),
            ParameterGroup::new("tracing", keys("policy", "tracing", TRACING)),
            ParameterGroup::new("protection", keys("policy", "protection", PROTECTION_MEASURES)),
        ]
    }

    /// Epidemic, protection, health-system, policy and composite-index groups.
    pub fn covid_by_country() -> Self {
        let policy = Self::policy_subgroups()
            .into_iter()
            .flat_map(|g| g.keys)
            .collect();
        Taxonomy {
            groups: vec![
                ParameterGroup::new("epidemic", keys("covid", "status", EPIDEMIC)),
                ParameterGroup::new("protection", keys("covid", "protection", PROTECTION)),
                ParameterGroup::new("health_system", keys("health_system", "status", HEALTH_SYSTEM)),
                ParameterGroup::new("policy", policy),
                ParameterGroup::new("index", keys("index", "", INDICES)),
            ],
        }
    }

    pub fn groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&ParameterGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Top-level groups as key lists, in order.
    pub fn study_groups(&self) -> Vec<&[HierKey]> {
        self.groups.iter().map(|g| g.keys.as_slice()).collect()
    }

    /// All keys, groups concatenated in order.
    pub fn study_params(&self) -> Vec<HierKey> {
        self.groups
            .iter()
            .flat_map(|g| g.keys.iter().cloned())
            .collect()
    }

    /// `study_params` as column labels of a conformed table.
    pub fn column_keys(&self) -> Vec<ColumnKey> {
        self.study_params().into_iter().map(ColumnKey::from).collect()
    }

    /// Number of keys across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.keys.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
