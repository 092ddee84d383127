//! Property tests for the conformer, the region list and the resolver.

use covid_study::conform::{relabel_columns, TableConformer};
use covid_study::data::filter::resolve_region_list;
use covid_study::resolve::resolve_column;
use covid_study::{CellValue, Column, ColumnKey, ColumnRef, HierKey, Table, Taxonomy};
use proptest::prelude::*;

// ============================================================================
// STRATEGIES
// ============================================================================

/// A raw leaf-labelled table holding a random subset of the taxonomy columns,
/// shuffled, plus the index columns and an unrelated one.
fn arb_raw_table() -> impl Strategy<Value = Table> {
    let names: Vec<String> = Taxonomy::covid_by_country()
        .study_params()
        .into_iter()
        .map(|k| k.name)
        .collect();
    let n = names.len();
    (
        proptest::sample::subsequence(names, 0..=n).prop_shuffle(),
        1usize..6,
        any::<u64>(),
    )
        .prop_map(|(picked, rows, seed)| {
            let mut columns = vec![
                Column::new("population", vec![CellValue::Integer(1); rows]),
                Column::new(
                    "date",
                    (0..rows).map(|d| CellValue::Date(format!("2021-01-{:02}", d + 1))).collect(),
                ),
                Column::new("administrative_area_level_1", vec![CellValue::from("Chile"); rows]),
            ];
            for (i, name) in picked.iter().enumerate() {
                let values = (0..rows)
                    .map(|r| CellValue::Integer((seed.wrapping_add((i * rows + r) as u64) % 97) as i64))
                    .collect();
                columns.push(Column::new(name.as_str(), values));
            }
            Table::from_columns(columns).unwrap()
        })
}

fn arb_hier_key() -> impl Strategy<Value = HierKey> {
    ("[a-c]", "[a-c]?", "[a-z]{1,4}").prop_map(|(d, s, n)| HierKey::new(&d, &s, &n))
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    /// Conforming twice gives the same table as conforming once.
    #[test]
    fn conform_is_idempotent(raw in arb_raw_table()) {
        let taxonomy = Taxonomy::covid_by_country();
        let conformer = TableConformer::new(&taxonomy, vec!["date".into(), "administrative_area_level_1".into()]);
        let mut once = raw;
        conformer.conform(&mut once);
        let mut twice = once.clone();
        let diagnostics = conformer.conform(&mut twice);
        prop_assert_eq!(&once, &twice);
        // The second pass can only repeat the relabel skip.
        prop_assert!(diagnostics.len() <= 1);
    }

    /// Conformed columns follow taxonomy order, whatever the input order.
    #[test]
    fn conformed_columns_follow_taxonomy_order(raw in arb_raw_table()) {
        let taxonomy = Taxonomy::covid_by_country();
        let order: Vec<String> = taxonomy.study_params().into_iter().map(|k| k.name).collect();
        let conformer = TableConformer::new(&taxonomy, vec!["date".into(), "administrative_area_level_1".into()]);
        let mut table = raw;
        conformer.conform(&mut table);
        let positions: Vec<usize> = table
            .column_keys()
            .iter()
            .map(|k| order.iter().position(|n| n == k.leaf_name()).unwrap())
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(table.index_names(), vec!["date", "administrative_area_level_1"]);
    }

    /// Without its date column a table keeps its leaf labels, however many
    /// taxonomy columns it carries.
    #[test]
    fn missing_index_column_never_relabels(raw in arb_raw_table()) {
        let taxonomy = Taxonomy::covid_by_country();
        let conformer = TableConformer::new(&taxonomy, vec!["date".into(), "administrative_area_level_1".into()]);
        let keys: Vec<ColumnKey> = raw
            .column_keys()
            .into_iter()
            .filter(|k| k != &ColumnKey::leaf("date"))
            .collect();
        let mut table = raw.select_columns(&keys);
        let diagnostics = conformer.conform(&mut table);
        prop_assert!(table.column_keys().iter().all(|k| matches!(k, ColumnKey::Leaf(_))));
        prop_assert!(table.index_levels().is_empty());
        prop_assert!(!diagnostics.is_empty());
    }

    /// Relabeling applies exactly when the counts match, and never partially.
    #[test]
    fn relabel_requires_matching_count(width in 0usize..6, keys in proptest::collection::vec(arb_hier_key(), 0..6)) {
        let columns = (0..width)
            .map(|i| Column::new(format!("c{i}").as_str(), vec![CellValue::Null]))
            .collect();
        let mut table = Table::from_columns(columns).unwrap();
        let before = table.clone();
        let result = relabel_columns(&mut table, &keys);
        if width == keys.len() {
            prop_assert!(result.is_ok());
            let expected: Vec<ColumnKey> = keys.iter().cloned().map(ColumnKey::from).collect();
            prop_assert_eq!(table.column_keys(), expected);
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(table, before);
        }
    }

    /// An explicit region list is returned exactly as given.
    #[test]
    fn explicit_region_list_round_trips(regions in proptest::collection::vec("[A-Za-z ]{0,12}", 0..8)) {
        let resolved = resolve_region_list(Some(regions.as_slice()), None, None, "administrative_area_level_1");
        prop_assert_eq!(resolved, Ok(regions));
    }

    /// A complete key resolves to itself, present or not.
    #[test]
    fn complete_key_resolves_to_itself(key in arb_hier_key(), others in proptest::collection::vec(arb_hier_key(), 1..5)) {
        let columns: Vec<ColumnKey> = others.into_iter().map(ColumnKey::from).collect();
        let key = ColumnKey::from(key);
        prop_assert_eq!(resolve_column(&ColumnRef::from(key.clone()), &columns), vec![key]);
    }
}
