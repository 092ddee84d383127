//! Per-region aggregation of a conformed table.
//!
//! Two kinds of spec are evaluated for every region partition:
//! * reduction `(function, column)` → `"<function>_<column>"`
//! * located `(return, function, locate)` → `"<return>_<at>_<function>_<locate>"`,
//!   the value of `return` on the first row where `locate` equals `function(locate)`.
//!
//! Hierarchical column keys are flattened by joining their non-empty segments with `_`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::data::model::{CellValue, ColumnKey, Table};
use crate::error::{reported, StudyError};
use crate::taxonomy::REGION_COLUMN;

pub const DEFAULT_AT_STRING: &str = "@";

// ---------------------------------------------------------------------------
// Reduction functions
// ---------------------------------------------------------------------------

/// Signature of a caller-supplied reduction.
pub type ReduceFn = fn(&[CellValue]) -> CellValue;

/// A reduction over the values of one column within a partition.
/// Missing values are skipped; a reduction over no values is `Null`.
///
/// Deserialized from its name (`"max"`, `"mean"`, ...). `Custom` reductions
/// cannot be named in configuration.
#[derive(Debug, Clone, Copy)]
pub enum Reduction {
    Max,
    Min,
    Mean,
    Median,
    Sum,
    Count,
    /// Sample standard deviation.
    Std,
    First,
    Last,
    Custom { name: &'static str, func: ReduceFn },
}

/// Built-in reductions are equal by variant. Custom reductions are equal when
/// their names are, whatever their functions, and never equal a built-in.
impl PartialEq for Reduction {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Reduction::Custom { name: a, .. }, Reduction::Custom { name: b, .. }) => a == b,
            (Reduction::Custom { .. }, _) | (_, Reduction::Custom { .. }) => false,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl TryFrom<String> for Reduction {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        let reduction = match name.as_str() {
            "max" => Reduction::Max,
            "min" => Reduction::Min,
            "mean" => Reduction::Mean,
            "median" => Reduction::Median,
            "sum" => Reduction::Sum,
            "count" => Reduction::Count,
            "std" => Reduction::Std,
            "first" => Reduction::First,
            "last" => Reduction::Last,
            other => {
                return Err(format!(
                    "unknown reduction '{other}', expected one of max, min, mean, median, sum, count, std, first, last"
                ))
            }
        };
        Ok(reduction)
    }
}

// Equivalent to `#[serde(try_from = "String")]`; written by hand because the
// derive would require `'de: 'static` due to the `&'static str` in `Custom`.
impl<'de> Deserialize<'de> for Reduction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Reduction::try_from(name).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Reduction {
    /// Name used in output column names.
    pub fn name(&self) -> &str {
        match self {
            Reduction::Max => "max",
            Reduction::Min => "min",
            Reduction::Mean => "mean",
            Reduction::Median => "median",
            Reduction::Sum => "sum",
            Reduction::Count => "count",
            Reduction::Std => "std",
            Reduction::First => "first",
            Reduction::Last => "last",
            Reduction::Custom { name, .. } => *name,
        }
    }

    pub fn apply(&self, values: &[CellValue]) -> CellValue {
        if let Reduction::Custom { func, .. } = self {
            return func(values);
        }
        let present: Vec<&CellValue> = values.iter().filter(|v| !v.is_missing()).collect();
        let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();

        match self {
            Reduction::Max => present
                .iter()
                .copied()
                .max_by(|a, b| a.compare(b))
                .cloned()
                .unwrap_or(CellValue::Null),
            Reduction::Min => present
                .iter()
                .copied()
                .min_by(|a, b| a.compare(b))
                .cloned()
                .unwrap_or(CellValue::Null),
            Reduction::First => present.first().map(|v| (*v).clone()).unwrap_or(CellValue::Null),
            Reduction::Last => present.last().map(|v| (*v).clone()).unwrap_or(CellValue::Null),
            Reduction::Count => CellValue::Integer(present.len() as i64),
            Reduction::Sum => {
                if numbers.is_empty() {
                    CellValue::Null
                } else if let Some(total) = integer_sum(&present) {
                    CellValue::Integer(total)
                } else {
                    CellValue::Float(numbers.iter().sum())
                }
            }
            Reduction::Mean => mean(&numbers).map(CellValue::Float).unwrap_or(CellValue::Null),
            Reduction::Median => median(numbers).map(CellValue::Float).unwrap_or(CellValue::Null),
            Reduction::Std => std_dev(&numbers).map(CellValue::Float).unwrap_or(CellValue::Null),
            Reduction::Custom { .. } => unreachable!("handled above"),
        }
    }
}

/// Exact sum when every value is an integer and the total fits in `i64`.
fn integer_sum(values: &[&CellValue]) -> Option<i64> {
    values.iter().try_fold(0i64, |total, v| match v {
        CellValue::Integer(i) => total.checked_add(*i),
        _ => None,
    })
}

fn mean(numbers: &[f64]) -> Option<f64> {
    if numbers.is_empty() {
        return None;
    }
    Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
}

fn median(mut numbers: Vec<f64>) -> Option<f64> {
    if numbers.is_empty() {
        return None;
    }
    numbers.sort_by(|a, b| a.total_cmp(b));
    let mid = numbers.len() / 2;
    if numbers.len() % 2 == 0 {
        Some((numbers[mid - 1] + numbers[mid]) / 2.0)
    } else {
        Some(numbers[mid])
    }
}

fn std_dev(numbers: &[f64]) -> Option<f64> {
    if numbers.len() < 2 {
        return None;
    }
    let m = mean(numbers)?;
    let var = numbers.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (numbers.len() - 1) as f64;
    Some(var.sqrt())
}

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// `function(column)` per region.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReductionSpec {
    pub function: Reduction,
    pub column: ColumnKey,
}

impl ReductionSpec {
    pub fn new(function: Reduction, column: impl Into<ColumnKey>) -> Self {
        ReductionSpec {
            function,
            column: column.into(),
        }
    }

    pub fn output_name(&self) -> String {
        format!("{}_{}", self.function.name(), self.column.label())
    }
}

/// Value of `column_to_return` where `column_to_locate` equals `function(column_to_locate)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocatedSpec {
    #[serde(rename = "return")]
    pub column_to_return: ColumnKey,
    pub function: Reduction,
    #[serde(rename = "locate")]
    pub column_to_locate: ColumnKey,
}

impl LocatedSpec {
    pub fn new(
        column_to_return: impl Into<ColumnKey>,
        function: Reduction,
        column_to_locate: impl Into<ColumnKey>,
    ) -> Self {
        LocatedSpec {
            column_to_return: column_to_return.into(),
            function,
            column_to_locate: column_to_locate.into(),
        }
    }

    pub fn output_name(&self, at_string: &str) -> String {
        [
            self.column_to_return.label().as_str(),
            at_string,
            self.function.name(),
            self.column_to_locate.label().as_str(),
        ]
        .join("_")
    }
}

// ---------------------------------------------------------------------------
// Aggregate table
// ---------------------------------------------------------------------------

/// One row per region, one column per spec. Independent of its source table.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    pub index_name: String,
    pub regions: Vec<CellValue>,
    pub columns: Vec<String>,
    /// Row-major: `values[region][column]`.
    pub values: Vec<Vec<CellValue>>,
    /// Conditions met while computing (absent columns and the like).
    pub diagnostics: Vec<StudyError>,
}

impl AggregateTable {
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn get(&self, region: &str, column: &str) -> Option<&CellValue> {
        let col = self.column_position(column)?;
        let row = self.regions.iter().position(|r| r.to_field() == region)?;
        self.values.get(row)?.get(col)
    }

    /// Non-missing `(region, value)` pairs of one column, in region order.
    pub fn points(&self, column: &str) -> Vec<(CellValue, CellValue)> {
        let Some(col) = self.column_position(column) else {
            return Vec::new();
        };
        self.regions
            .iter()
            .zip(&self.values)
            .filter(|(region, row)| !region.is_missing() && !row[col].is_missing())
            .map(|(region, row)| (region.clone(), row[col].clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The set of specs to compute per region.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupedAggregation {
    /// Column or index level holding the region.
    pub region_key: String,
    /// Delimiter placed between return and locate parts of located-spec names.
    pub at_string: String,
    pub reductions: Vec<ReductionSpec>,
    pub located: Vec<LocatedSpec>,
}

impl Default for GroupedAggregation {
    fn default() -> Self {
        GroupedAggregation {
            region_key: REGION_COLUMN.to_string(),
            at_string: DEFAULT_AT_STRING.to_string(),
            reductions: Vec::new(),
            located: Vec::new(),
        }
    }
}

fn gather(values: &[CellValue], rows: &[usize]) -> Vec<CellValue> {
    rows.iter().map(|&r| values[r].clone()).collect()
}

impl GroupedAggregation {
    pub fn with_region_key(mut self, region_key: &str) -> Self {
        self.region_key = region_key.to_string();
        self
    }

    pub fn output_names(&self) -> Vec<String> {
        self.reductions
            .iter()
            .map(ReductionSpec::output_name)
            .chain(self.located.iter().map(|s| s.output_name(&self.at_string)))
            .collect()
    }

    /// Compute the aggregate table.
    ///
    /// `EmptyInput` is the explicit "nothing to aggregate" result: no table, no
    /// rows, or no specs. A spec whose column is absent yields missing values and
    /// a diagnostic without affecting the other specs.
    pub fn compute<'t>(&self, table: impl Into<Option<&'t Table>>) -> Result<AggregateTable, StudyError> {
        let Some(table) = table.into() else {
            return Err(StudyError::EmptyInput("no source table".to_string()));
        };
        if table.is_empty() {
            return Err(StudyError::EmptyInput("source table has no rows".to_string()));
        }
        if self.reductions.is_empty() && self.located.is_empty() {
            return Err(StudyError::EmptyInput("no aggregation specs requested".to_string()));
        }

        let region_values = table
            .values_of(&ColumnKey::Leaf(self.region_key.clone()))
            .ok_or_else(|| StudyError::ColumnNotFound {
                operation: "aggregate",
                column: self.region_key.clone(),
            })?;

        let mut partitions: BTreeMap<&CellValue, Vec<usize>> = BTreeMap::new();
        for (row, region) in region_values.iter().enumerate() {
            if !region.is_missing() {
                partitions.entry(region).or_default().push(row);
            }
        }

        let mut diagnostics = Vec::new();
        let mut lookup = |key: &ColumnKey, operation: &'static str| {
            let found = table.values_of(key);
            if found.is_none() {
                diagnostics.push(reported(StudyError::ColumnNotFound {
                    operation,
                    column: key.to_string(),
                }));
            }
            found
        };
        let reduction_columns: Vec<_> = self
            .reductions
            .iter()
            .map(|spec| lookup(&spec.column, "reduction"))
            .collect();
        let located_columns: Vec<_> = self
            .located
            .iter()
            .map(|spec| {
                (
                    lookup(&spec.column_to_return, "located return"),
                    lookup(&spec.column_to_locate, "located locate"),
                )
            })
            .collect();

        let mut regions = Vec::with_capacity(partitions.len());
        let mut values = Vec::with_capacity(partitions.len());
        for (region, rows) in &partitions {
            let mut row = Vec::with_capacity(self.reductions.len() + self.located.len());
            for (spec, column) in self.reductions.iter().zip(&reduction_columns) {
                row.push(match column {
                    Some(column) => spec.function.apply(&gather(column, rows)),
                    None => CellValue::Null,
                });
            }
            for (spec, columns) in self.located.iter().zip(&located_columns) {
                row.push(match columns {
                    (Some(to_return), Some(to_locate)) => {
                        locate(spec.function, to_return, to_locate, rows)
                    }
                    _ => CellValue::Null,
                });
            }
            regions.push((*region).clone());
            values.push(row);
        }

        log::info!(
            "aggregated {} region(s) × {} spec(s)",
            regions.len(),
            self.reductions.len() + self.located.len()
        );
        Ok(AggregateTable {
            index_name: self.region_key.clone(),
            regions,
            columns: self.output_names(),
            values,
            diagnostics,
        })
    }
}

/// `to_return` on the first partition row where `to_locate` equals the reduction result.
fn locate(function: Reduction, to_return: &[CellValue], to_locate: &[CellValue], rows: &[usize]) -> CellValue {
    let target = function.apply(&gather(to_locate, rows));
    if target.is_missing() {
        return CellValue::Null;
    }
    rows.iter()
        .find(|&&r| !to_locate[r].is_missing() && to_locate[r].same_value(&target))
        .map(|&r| to_return[r].clone())
        .unwrap_or(CellValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Column, IndexLevel};

    fn ints(values: &[i64]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::Integer(*v)).collect()
    }

    fn regions(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::from(*v)).collect()
    }

    fn table() -> Table {
        Table::from_columns(vec![
            Column::new("icu", ints(&[3, 7, 5, 5, 5])),
            Column::new("deaths", ints(&[1, 2, 3, 10, 20])),
        ])
        .unwrap()
        .with_index(vec![
            IndexLevel::new(
                "date",
                vec![
                    "2021-01-01".into(),
                    "2021-01-02".into(),
                    "2021-01-03".into(),
                    "2021-01-01".into(),
                    "2021-01-02".into(),
                ],
            ),
            IndexLevel::new("region", regions(&["Spain", "Spain", "Spain", "Chile", "Chile"])),
        ])
        .unwrap()
    }

    fn engine() -> GroupedAggregation {
        GroupedAggregation::default().with_region_key("region")
    }

    #[test]
    fn reduction_named_after_function_and_column() {
        let mut agg = engine();
        agg.reductions.push(ReductionSpec::new(Reduction::Max, "icu"));
        let out = agg.compute(&table()).unwrap();
        assert_eq!(out.columns, ["max_icu"]);
        assert_eq!(out.get("Spain", "max_icu"), Some(&CellValue::Integer(7)));
    }

    #[test]
    fn partitions_come_out_in_sorted_region_order() {
        let mut agg = engine();
        agg.reductions.push(ReductionSpec::new(Reduction::Count, "icu"));
        let out = agg.compute(&table()).unwrap();
        assert_eq!(out.regions, regions(&["Chile", "Spain"]));
        assert_eq!(out.index_name, "region");
    }

    #[test]
    fn located_value_ties_resolve_to_first_row() {
        let mut agg = engine();
        agg.located.push(LocatedSpec::new("deaths", Reduction::Max, "icu"));
        let out = agg.compute(&table()).unwrap();
        assert_eq!(out.columns, ["deaths_@_max_icu"]);
        assert_eq!(out.get("Chile", "deaths_@_max_icu"), Some(&CellValue::Integer(10)));
        assert_eq!(out.get("Spain", "deaths_@_max_icu"), Some(&CellValue::Integer(2)));
    }

    #[test]
    fn located_value_can_return_an_index_level() {
        let mut agg = engine();
        agg.at_string = "at".to_string();
        agg.located.push(LocatedSpec::new("date", Reduction::Max, "icu"));
        let out = agg.compute(&table()).unwrap();
        assert_eq!(out.get("Spain", "date_at_max_icu"), Some(&CellValue::from("2021-01-02")));
    }

    #[test]
    fn absent_locate_column_only_blanks_its_own_spec() {
        let mut agg = engine();
        agg.reductions.push(ReductionSpec::new(Reduction::Sum, "deaths"));
        agg.located.push(LocatedSpec::new("deaths", Reduction::Max, "vent"));
        let out = agg.compute(&table()).unwrap();
        assert_eq!(out.get("Chile", "sum_deaths"), Some(&CellValue::Integer(30)));
        assert_eq!(out.get("Chile", "deaths_@_max_vent"), Some(&CellValue::Null));
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn hierarchical_columns_are_underscore_joined() {
        let spec = LocatedSpec::new(
            ColumnKey::hier("covid", "status", "deaths"),
            Reduction::Max,
            ColumnKey::hier("index", "", "stringency_index"),
        );
        assert_eq!(spec.output_name("@"), "covid_status_deaths_@_max_index_stringency_index");
        let spec = ReductionSpec::new(Reduction::Mean, ColumnKey::hier("health_system", "status", "icu"));
        assert_eq!(spec.output_name(), "mean_health_system_status_icu");
    }

    #[test]
    fn empty_inputs_produce_no_aggregate() {
        let mut agg = engine();
        assert!(matches!(agg.compute(&table()), Err(StudyError::EmptyInput(_))));
        agg.reductions.push(ReductionSpec::new(Reduction::Max, "icu"));
        assert!(matches!(agg.compute(&Table::default()), Err(StudyError::EmptyInput(_))));
        assert!(matches!(agg.compute(None::<&Table>), Err(StudyError::EmptyInput(_))));
    }

    #[test]
    fn reductions_skip_missing_values() {
        let values = vec![CellValue::Integer(4), CellValue::Null, CellValue::Float(2.0), CellValue::from(f64::NAN)];
        assert_eq!(Reduction::Mean.apply(&values), CellValue::Float(3.0));
        assert_eq!(Reduction::Median.apply(&values), CellValue::Float(3.0));
        assert_eq!(Reduction::Count.apply(&values), CellValue::Integer(2));
        assert_eq!(Reduction::Min.apply(&values), CellValue::Float(2.0));
        assert_eq!(Reduction::Max.apply(&[CellValue::Null]), CellValue::Null);
    }

    #[test]
    fn custom_reductions_use_their_own_name() {
        fn peak_to_trough(values: &[CellValue]) -> CellValue {
            let numbers: Vec<f64> = values.iter().filter_map(CellValue::as_f64).collect();
            let max = numbers.iter().cloned().fold(f64::MIN, f64::max);
            let min = numbers.iter().cloned().fold(f64::MAX, f64::min);
            CellValue::Float(max - min)
        }
        let f = Reduction::Custom { name: "range", func: peak_to_trough };
        let mut agg = engine();
        agg.reductions.push(ReductionSpec::new(f, "icu"));
        let out = agg.compute(&table()).unwrap();
        assert_eq!(out.get("Spain", "range_icu"), Some(&CellValue::Float(4.0)));
    }

    #[test]
    fn integer_sums_are_exact_and_overflow_to_float() {
        let big = 9_007_199_254_740_993i64;
        assert_eq!(Reduction::Sum.apply(&[CellValue::Integer(big)]), CellValue::Integer(big));
        assert_eq!(
            Reduction::Sum.apply(&[CellValue::Integer(big), CellValue::Null, CellValue::Integer(-3)]),
            CellValue::Integer(big - 3)
        );
        assert_eq!(
            Reduction::Sum.apply(&[CellValue::Integer(i64::MAX), CellValue::Integer(1)]),
            CellValue::Float(i64::MAX as f64 + 1.0)
        );
        assert_eq!(
            Reduction::Sum.apply(&[CellValue::Integer(1), CellValue::Float(0.5)]),
            CellValue::Float(1.5)
        );
    }

    #[test]
    fn reductions_deserialize_from_their_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            function: Reduction,
        }
        let parsed: Wrapper = toml::from_str("function = \"median\"").unwrap();
        assert_eq!(parsed.function, Reduction::Median);
        assert!(toml::from_str::<Wrapper>("function = \"mode\"").is_err());

        let spec: ReductionSpec = toml::from_str("function = \"sum\"\ncolumn = \"deaths\"").unwrap();
        assert_eq!(spec, ReductionSpec::new(Reduction::Sum, "deaths"));
    }

    #[test]
    fn custom_reductions_never_equal_built_ins() {
        fn constant(_: &[CellValue]) -> CellValue {
            CellValue::Integer(0)
        }
        let custom = Reduction::Custom { name: "max", func: constant };
        assert_ne!(custom, Reduction::Max);
        assert_ne!(Reduction::Max, custom);
        assert_eq!(custom, Reduction::Custom { name: "max", func: constant });
        assert_ne!(Reduction::Min, Reduction::Max);
    }
}
