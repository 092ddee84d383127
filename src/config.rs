//! Study configuration loaded from TOML.
//!
//! ```toml
//! [input]
//! data_path = "data/timeseries_by_country.csv"
//! downsampling = 7
//!
//! [regions]
//! attributes_path = "data/regions.csv"
//! attribute_key = "administrative_area_level_1"
//! attribute_filter = { continent = ["Europe"], income_group = ["High income"] }
//!
//! [aggregation]
//! reductions = [{ function = "max", column = ["health_system", "status", "icu"] }]
//! located = [{ return = "date", function = "max", locate = ["health_system", "status", "icu"] }]
//!
//! [[relationships]]
//! study = [["covid", "status"]]
//! pair_with = [["policy", "protection"]]
//! ```
//!
//! Relative paths are resolved against the directory of the configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::aggregate::{GroupedAggregation, LocatedSpec, ReductionSpec, DEFAULT_AT_STRING};
use crate::data::filter::{AttributeFilter, RegionSelection};
use crate::data::loader::{guess_cell_type, load_file};
use crate::study::{Relationship, StudyOptions, DEFAULT_MIN_DATAPOINTS};
use crate::taxonomy::{default_index_columns, Taxonomy, REGION_COLUMN};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    pub input: InputConfig,
    pub regions: Option<RegionsConfig>,
    pub aggregation: Option<AggregationConfig>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Replaces the built-in by-country taxonomy when present.
    pub taxonomy: Option<Taxonomy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub data_path: PathBuf,
    #[serde(default = "default_index_columns")]
    pub index_columns: Vec<String>,
    #[serde(default = "default_region_column")]
    pub region_column: String,
    #[serde(default = "default_downsampling")]
    pub downsampling: usize,
    #[serde(default = "default_min_datapoints")]
    pub min_datapoints_in_region: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionsConfig {
    pub explicit: Option<Vec<String>>,
    pub attributes_path: Option<PathBuf>,
    #[serde(default = "default_region_column")]
    pub attribute_key: String,
    #[serde(default)]
    pub attribute_filter: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationConfig {
    #[serde(default = "default_at_string")]
    pub at_string: String,
    #[serde(default)]
    pub reductions: Vec<ReductionSpec>,
    #[serde(default)]
    pub located: Vec<LocatedSpec>,
}

fn default_region_column() -> String {
    REGION_COLUMN.to_string()
}

fn default_downsampling() -> usize {
    1
}

fn default_min_datapoints() -> usize {
    DEFAULT_MIN_DATAPOINTS
}

fn default_at_string() -> String {
    DEFAULT_AT_STRING.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl StudyConfig {
    /// Read, parse and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: StudyConfig = toml::from_str(&contents)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.input.data_path);
        if let Some(path) = self.regions.as_mut().and_then(|r| r.attributes_path.as_mut()) {
            join(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.downsampling == 0 {
            return Err(ConfigError::InvalidValue {
                field: "input.downsampling",
                reason: "must be > 0".to_string(),
            });
        }
        if self.input.index_columns.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "input.index_columns",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.input.index_columns.contains(&self.input.region_column) {
            return Err(ConfigError::InvalidValue {
                field: "input.region_column",
                reason: format!(
                    "'{}' is not one of the index columns {:?}",
                    self.input.region_column, self.input.index_columns
                ),
            });
        }
        if let Some(aggregation) = &self.aggregation {
            if aggregation.at_string.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "aggregation.at_string",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if let Some(regions) = &self.regions {
            if let Some((attribute, _)) = regions.attribute_filter.iter().find(|(_, v)| v.is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "regions.attribute_filter",
                    reason: format!("no acceptable values for '{attribute}'"),
                });
            }
        }
        Ok(())
    }

    pub fn taxonomy(&self) -> Taxonomy {
        self.taxonomy.clone().unwrap_or_default()
    }

    /// Relationships to examine; the by-country defaults when none are configured.
    pub fn relationships(&self) -> Vec<Relationship> {
        if self.relationships.is_empty() {
            Relationship::defaults(&self.taxonomy())
        } else {
            self.relationships.clone()
        }
    }

    /// Region selection inputs, loading the attributes table if one is named.
    /// Incomplete inputs are passed through so the study reports them.
    pub fn region_selection(&self) -> Result<Option<RegionSelection>> {
        let Some(regions) = &self.regions else {
            return Ok(None);
        };
        let attributes = match &regions.attributes_path {
            Some(path) => Some(load_file(path).context("loading region attributes")?),
            None => None,
        };
        let attribute_filter = (!regions.attribute_filter.is_empty()).then(|| {
            regions
                .attribute_filter
                .iter()
                .map(|(attr, values)| {
                    (attr.clone(), values.iter().map(|v| guess_cell_type(v)).collect())
                })
                .collect::<AttributeFilter>()
        });
        Ok(Some(RegionSelection {
            explicit: regions.explicit.clone(),
            attributes,
            attribute_filter,
            attribute_key: regions.attribute_key.clone(),
        }))
    }

    pub fn study_options(&self) -> Result<StudyOptions> {
        let aggregation = self.aggregation.as_ref().map(|a| GroupedAggregation {
            region_key: self.input.region_column.clone(),
            at_string: a.at_string.clone(),
            reductions: a.reductions.clone(),
            located: a.located.clone(),
        });
        Ok(StudyOptions {
            taxonomy: self.taxonomy(),
            index_columns: self.input.index_columns.clone(),
            region_column: self.input.region_column.clone(),
            downsampling: self.input.downsampling,
            regions: self.region_selection()?,
            aggregation,
        })
    }
}
