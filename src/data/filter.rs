use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::model::{CellValue, ColumnKey, Table};
use crate::error::StudyError;

// ---------------------------------------------------------------------------
// Attribute filter: which attribute values make a region eligible
// ---------------------------------------------------------------------------

/// Per-attribute acceptable values: attribute_name → set of values.
/// A region is selected when *any* of its attributes holds an acceptable value.
pub type AttributeFilter = BTreeMap<String, BTreeSet<CellValue>>;

/// Inputs a region list can be derived from.
#[derive(Debug, Clone, Default)]
pub struct RegionSelection {
    /// Concrete ordered list; wins over everything else when present.
    pub explicit: Option<Vec<String>>,
    /// One row per region, arbitrary attribute columns.
    pub attributes: Option<Table>,
    pub attribute_filter: Option<AttributeFilter>,
    /// Column of `attributes` holding the region identifier.
    pub attribute_key: String,
}

impl RegionSelection {
    pub fn explicit(regions: Vec<String>) -> Self {
        RegionSelection {
            explicit: Some(regions),
            ..Default::default()
        }
    }

    pub fn by_attributes(attributes: Table, filter: AttributeFilter, attribute_key: &str) -> Self {
        RegionSelection {
            explicit: None,
            attributes: Some(attributes),
            attribute_filter: Some(filter),
            attribute_key: attribute_key.to_string(),
        }
    }

    pub fn resolve(&self) -> Result<Vec<String>, StudyError> {
        resolve_region_list(
            self.explicit.as_deref(),
            self.attributes.as_ref(),
            self.attribute_filter.as_ref(),
            &self.attribute_key,
        )
    }
}

/// Regions to study: the explicit list unchanged when given, otherwise the
/// regions of `attributes` (in table order) matching `filter`.
///
/// Matching is OR across attributes: one acceptable attribute value suffices.
pub fn resolve_region_list(
    explicit: Option<&[String]>,
    attributes: Option<&Table>,
    filter: Option<&AttributeFilter>,
    attribute_key: &str,
) -> Result<Vec<String>, StudyError> {
    if let Some(regions) = explicit {
        return Ok(regions.to_vec());
    }
    let (Some(attributes), Some(filter)) = (attributes, filter) else {
        return Err(StudyError::ConfigurationError(
            "region selection needs an explicit list or an attributes table with a filter"
                .to_string(),
        ));
    };
    if filter.is_empty() {
        return Err(StudyError::ConfigurationError(
            "attribute filter is empty".to_string(),
        ));
    }
    let ids = attributes
        .values_of(&ColumnKey::Leaf(attribute_key.to_string()))
        .ok_or_else(|| {
            StudyError::ConfigurationError(format!(
                "attributes table has no region key column '{attribute_key}'"
            ))
        })?;

    let mut checks: Vec<(&[CellValue], &BTreeSet<CellValue>)> = Vec::new();
    for (attribute, accepted) in filter {
        match attributes.values_of(&ColumnKey::Leaf(attribute.clone())) {
            Some(values) => checks.push((values, accepted)),
            None => log::warn!("attribute '{attribute}' not in attributes table; ignoring it"),
        }
    }
    if checks.is_empty() {
        return Err(StudyError::ConfigurationError(format!(
            "none of the filtered attributes {:?} exist in the attributes table",
            filter.keys().collect::<Vec<_>>()
        )));
    }

    let selected: Vec<String> = ids
        .iter()
        .enumerate()
        .filter(|(row, id)| {
            !id.is_missing()
                && checks.iter().any(|(values, accepted)| {
                    let value = &values[*row];
                    !value.is_missing() && accepted.iter().any(|a| a.same_value(value))
                })
        })
        .map(|(_, id)| id.to_field())
        .collect();

    log::info!("{} region(s) selected by attribute filter", selected.len());
    Ok(selected)
}

/// Keep only the rows whose region is in `regions`, preserving row order.
///
/// The region is looked up as an ordinary column first, then as an index level.
pub fn filter_table_by_regions(
    table: &mut Table,
    regions: &[String],
    region_key: &str,
) -> Result<(), StudyError> {
    let values = table
        .values_of(&ColumnKey::Leaf(region_key.to_string()))
        .ok_or_else(|| StudyError::ColumnNotFound {
            operation: "filter_table_by_regions",
            column: region_key.to_string(),
        })?;

    let wanted: HashSet<&str> = regions.iter().map(String::as_str).collect();
    let rows: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| wanted.contains(v.to_field().as_str()))
        .map(|(i, _)| i)
        .collect();

    log::debug!(
        "filter_table_by_regions: kept {}/{} rows for {} region(s)",
        rows.len(),
        table.len(),
        regions.len()
    );
    *table = table.take_rows(&rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Column, IndexLevel};

    fn attributes() -> Table {
        Table::from_columns(vec![
            Column::new("id", vec!["A".into(), "B".into(), "C".into()]),
            Column::new("continent", vec!["EU".into(), "AS".into(), CellValue::Null]),
            Column::new("income", vec!["low".into(), "high".into(), "mid".into()]),
        ])
        .unwrap()
    }

    fn filter(pairs: &[(&str, &str)]) -> AttributeFilter {
        let mut f = AttributeFilter::new();
        for (attr, value) in pairs {
            f.entry(attr.to_string())
                .or_default()
                .insert(CellValue::from(*value));
        }
        f
    }

    #[test]
    fn explicit_list_is_returned_unchanged() {
        let explicit = vec!["Zambia".to_string(), "Austria".to_string()];
        let f = filter(&[("continent", "EU")]);
        let got = resolve_region_list(Some(explicit.as_slice()), Some(&attributes()), Some(&f), "id").unwrap();
        assert_eq!(got, explicit);
    }

    #[test]
    fn attribute_filter_is_or_across_attributes() {
        let attrs = attributes();
        let only_eu = filter(&[("continent", "EU")]);
        assert_eq!(resolve_region_list(None, Some(&attrs), Some(&only_eu), "id").unwrap(), ["A"]);

        let eu_or_high = filter(&[("continent", "EU"), ("income", "high")]);
        assert_eq!(
            resolve_region_list(None, Some(&attrs), Some(&eu_or_high), "id").unwrap(),
            ["A", "B"]
        );
    }

    #[test]
    fn incomplete_inputs_are_a_configuration_error() {
        let f = filter(&[("continent", "EU")]);
        assert!(matches!(
            resolve_region_list(None, None, Some(&f), "id"),
            Err(StudyError::ConfigurationError(_))
        ));
        assert!(matches!(
            resolve_region_list(None, Some(&attributes()), Some(&f), "iso3"),
            Err(StudyError::ConfigurationError(_))
        ));
        let unknown = filter(&[("climate", "dry")]);
        assert!(matches!(
            resolve_region_list(None, Some(&attributes()), Some(&unknown), "id"),
            Err(StudyError::ConfigurationError(_))
        ));
    }

    #[test]
    fn rows_filtered_by_index_level_keep_order() {
        let mut table = Table::from_columns(vec![Column::new(
            "icu",
            vec![1i64.into(), 2i64.into(), 3i64.into(), 4i64.into()],
        )])
        .unwrap()
        .with_index(vec![IndexLevel::new(
            "region",
            vec!["B".into(), "A".into(), "C".into(), "A".into()],
        )])
        .unwrap();
        filter_table_by_regions(&mut table, &["A".to_string(), "B".to_string()], "region").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.columns()[0].values,
            vec![CellValue::Integer(1), CellValue::Integer(2), CellValue::Integer(4)]
        );
    }

    #[test]
    fn unknown_region_key_leaves_table_unchanged() {
        let mut table = attributes();
        let before = table.clone();
        let err = filter_table_by_regions(&mut table, &["A".to_string()], "country").unwrap_err();
        assert!(matches!(err, StudyError::ColumnNotFound { .. }));
        assert_eq!(table, before);
    }

    #[test]
    fn matching_rows_without_a_region_id_are_skipped() {
        let attrs = Table::from_columns(vec![
            Column::new("id", vec!["A".into(), CellValue::Null, "C".into()]),
            Column::new("continent", vec!["EU".into(), "EU".into(), "EU".into()]),
        ])
        .unwrap();
        let eu = filter(&[("continent", "EU")]);
        assert_eq!(resolve_region_list(None, Some(&attrs), Some(&eu), "id").unwrap(), ["A", "C"]);
    }

    #[test]
    fn region_column_wins_over_index_level_of_same_name() {
        let mut table = Table::from_columns(vec![
            Column::new("region", vec!["A".into(), "B".into(), "A".into()]),
            Column::new("icu", vec![1i64.into(), 2i64.into(), 3i64.into()]),
        ])
        .unwrap()
        .with_index(vec![IndexLevel::new("region", vec!["B".into(), "A".into(), "B".into()])])
        .unwrap();
        filter_table_by_regions(&mut table, &["A".to_string()], "region").unwrap();
        assert_eq!(table.len(), 2);
        let icu = table.column(&ColumnKey::leaf("icu")).unwrap();
        assert_eq!(icu.values, vec![CellValue::Integer(1), CellValue::Integer(3)]);
    }
}
