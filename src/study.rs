use std::collections::BTreeSet;

use serde::Deserialize;

use crate::aggregate::{AggregateTable, GroupedAggregation};
use crate::conform::TableConformer;
use crate::data::filter::{filter_table_by_regions, RegionSelection};
use crate::data::model::{CellValue, ColumnKey, ColumnRef, HierKey, Table};
use crate::error::{reported, StudyError};
use crate::resolve::resolve_columns;
use crate::taxonomy::{default_index_columns, Taxonomy, REGION_COLUMN};

/// Minimum rows a region needs before its series are worth showing.
pub const DEFAULT_MIN_DATAPOINTS: usize = 10;

// ---------------------------------------------------------------------------
// Study options
// ---------------------------------------------------------------------------

/// Everything needed to turn a raw table into a [`Study`].
#[derive(Debug, Clone)]
pub struct StudyOptions {
    pub taxonomy: Taxonomy,
    pub index_columns: Vec<String>,
    pub region_column: String,
    /// Keep every n-th input row.
    pub downsampling: usize,
    pub regions: Option<RegionSelection>,
    pub aggregation: Option<GroupedAggregation>,
}

impl Default for StudyOptions {
    fn default() -> Self {
        Self {
            taxonomy: Taxonomy::covid_by_country(),
            index_columns: default_index_columns(),
            region_column: REGION_COLUMN.to_string(),
            downsampling: 1,
            regions: None,
            aggregation: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Study
// ---------------------------------------------------------------------------

/// A conformed table together with its taxonomy and derived aggregate.
#[derive(Debug, Clone)]
pub struct Study {
    pub taxonomy: Taxonomy,
    /// Conformed table.
    pub data: Table,
    pub region_column: String,
    /// `None` when nothing was aggregated.
    pub aggregate: Option<AggregateTable>,
    /// Every condition reported while building or querying the study.
    pub diagnostics: Vec<StudyError>,
}

/// Rows of one region restricted to one taxonomy group.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSlice {
    pub region: CellValue,
    pub group: String,
    /// Indexed by the remaining levels (date), region level dropped.
    pub table: Table,
}

impl Study {
    /// Downsample, conform, select regions and aggregate, in that order.
    pub fn build(raw: Table, options: &StudyOptions) -> Self {
        let mut data = raw;
        data.downsample(options.downsampling);

        let conformer = TableConformer::new(&options.taxonomy, options.index_columns.clone());
        let diagnostics = conformer.conform(&mut data);

        let mut study = Study {
            taxonomy: options.taxonomy.clone(),
            data,
            region_column: options.region_column.clone(),
            aggregate: None,
            diagnostics,
        };
        if let Some(selection) = &options.regions {
            study.select_regions(selection);
        }
        if let Some(aggregation) = &options.aggregation {
            study.compute_aggregate(aggregation);
        }
        study
    }

    /// Restrict the data to the selected regions. A selection that cannot be
    /// resolved leaves the data unfiltered.
    pub fn select_regions(&mut self, selection: &RegionSelection) {
        let result = selection
            .resolve()
            .and_then(|regions| filter_table_by_regions(&mut self.data, &regions, &self.region_column));
        if let Err(err) = result {
            self.diagnostics.push(reported(err));
        }
    }

    /// (Re)compute the aggregate table from the current data, grouped by the
    /// study's region column.
    pub fn compute_aggregate(&mut self, aggregation: &GroupedAggregation) {
        let aggregation = aggregation.clone().with_region_key(&self.region_column);
        match aggregation.compute(&self.data) {
            Ok(table) => {
                self.diagnostics.extend(table.diagnostics.iter().cloned());
                self.aggregate = Some(table);
            }
            Err(err) => {
                self.diagnostics.push(reported(err));
                self.aggregate = None;
            }
        }
    }

    /// Expand column references against the conformed columns.
    pub fn resolve(&self, references: &[ColumnRef]) -> Vec<ColumnKey> {
        resolve_columns(references, &self.data.column_keys())
    }

    /// Distinct regions present in the data, sorted.
    pub fn regions(&self) -> Vec<CellValue> {
        let Some(values) = self.data.values_of(&ColumnKey::Leaf(self.region_column.clone())) else {
            return Vec::new();
        };
        values
            .iter()
            .filter(|v| !v.is_missing())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Per region and taxonomy group, the region's rows for that group's columns.
    ///
    /// Slices with no rows, only missing values or fewer than `min_datapoints`
    /// rows are left out.
    pub fn region_slices(&self, min_datapoints: usize) -> Vec<RegionSlice> {
        let key = ColumnKey::Leaf(self.region_column.clone());
        let Some(values) = self.data.values_of(&key) else {
            log::warn!("region column '{}' not found; no region slices", self.region_column);
            return Vec::new();
        };

        let mut slices = Vec::new();
        for region in self.regions() {
            let rows: Vec<usize> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| **v == region)
                .map(|(i, _)| i)
                .collect();
            let region_rows = self.data.take_rows(&rows);

            for group in self.taxonomy.groups() {
                let keys: Vec<ColumnKey> = group.keys.iter().cloned().map(ColumnKey::from).collect();
                let mut table = region_rows.select_columns(&keys);
                table.drop_index_level(&self.region_column);
                if table.is_empty() || table.width() == 0 || table.all_missing() {
                    continue;
                }
                if table.len() < min_datapoints {
                    log::debug!(
                        "{region}/{}: {} rows < {min_datapoints}, skipped",
                        group.name,
                        table.len()
                    );
                    continue;
                }
                slices.push(RegionSlice {
                    region: region.clone(),
                    group: group.name.clone(),
                    table,
                });
            }
        }
        slices
    }

    /// Resolved column list per relationship, or why it was skipped.
    pub fn relationship_columns(
        &self,
        relationships: &[Relationship],
    ) -> Vec<Result<Vec<ColumnKey>, StudyError>> {
        relationships
            .iter()
            .map(|rel| {
                let mut columns = self.resolve(&rel.study);
                columns.extend(self.resolve(&rel.pair_with));
                let absent = columns
                    .iter()
                    .find(|c| self.data.column(c).is_none())
                    .map(ToString::to_string);
                if let Some(column) = absent {
                    return Err(reported(StudyError::ColumnNotFound {
                        operation: "relationship",
                        column,
                    }));
                }
                if columns.is_empty() {
                    return Err(reported(StudyError::ColumnNotFound {
                        operation: "relationship",
                        column: format!("{:?}", rel.study),
                    }));
                }
                Ok(columns)
            })
            .collect()
    }

    pub fn correlation(&self, columns: &[ColumnKey]) -> CorrelationMatrix {
        correlation_matrix(&self.data, columns)
    }
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

/// Columns to study against columns to pair them with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Relationship {
    pub study: Vec<ColumnRef>,
    pub pair_with: Vec<ColumnRef>,
}

impl Relationship {
    pub fn new(study: Vec<ColumnRef>, pair_with: Vec<ColumnRef>) -> Self {
        Relationship { study, pair_with }
    }

    /// The epidemic group against each other group, then the infection and
    /// protection-policy pairings of the by-country study.
    pub fn defaults(taxonomy: &Taxonomy) -> Vec<Relationship> {
        let as_refs = |keys: &[HierKey]| -> Vec<ColumnRef> {
            keys.iter().cloned().map(ColumnRef::from).collect()
        };
        let mut relationships = Vec::new();
        if let Some((first, rest)) = taxonomy.groups().split_first() {
            for other in rest {
                relationships.push(Relationship::new(as_refs(&first.keys), as_refs(&other.keys)));
            }
        }
        relationships.push(Relationship::new(
            vec![ColumnKey::hier("covid", "status", "confirmed").into()],
            vec![
                ColumnKey::hier("policy", "protection", "facial_coverings").into(),
                ColumnKey::hier("policy", "movement_restrictions", "international_movement_restrictions")
                    .into(),
                ColumnKey::hier("policy", "social_distance", "stay_home_restrictions").into(),
            ],
        ));
        relationships.push(Relationship::new(
            vec![ColumnRef::prefix(&["covid", "status"])],
            vec![ColumnRef::prefix(&["policy", "protection"])],
        ));
        relationships
    }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// Pairwise Pearson correlations over the rows complete in every column.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    pub columns: Vec<ColumnKey>,
    /// `None` where a column is constant or fewer than two rows were complete.
    pub values: Vec<Vec<Option<f64>>>,
    pub rows_used: usize,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &ColumnKey, b: &ColumnKey) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.values[i][j]
    }
}

/// Drop rows with a missing (or non-numeric) value in any of `columns`, then
/// correlate every pair. Absent columns are left out.
pub fn correlation_matrix(table: &Table, columns: &[ColumnKey]) -> CorrelationMatrix {
    let present: Vec<(ColumnKey, &[CellValue])> = columns
        .iter()
        .filter_map(|k| table.column(k).map(|c| (k.clone(), c.values.as_slice())))
        .collect();

    let complete: Vec<usize> = (0..table.len())
        .filter(|&r| present.iter().all(|(_, values)| values[r].as_f64().is_some()))
        .collect();
    let series: Vec<Vec<f64>> = present
        .iter()
        .map(|(_, values)| complete.iter().filter_map(|&r| values[r].as_f64()).collect())
        .collect();

    let values = series
        .iter()
        .map(|a| series.iter().map(|b| pearson(a, b)).collect())
        .collect();

    CorrelationMatrix {
        columns: present.into_iter().map(|(k, _)| k).collect(),
        values,
        rows_used: complete.len(),
    }
}

fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n < 2 || n != b.len() {
        return None;
    }
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}
