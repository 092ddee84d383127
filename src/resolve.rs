//! Expansion of partial column references against a table's columns.

use crate::data::model::{ColumnKey, ColumnRef};

/// Concrete columns denoted by `reference`.
///
/// A reference with the same arity as the column labels is complete and comes
/// back unchanged, whether or not the table holds it. Anything shorter is a
/// prefix matched against the leading segments of every column, in column order.
pub fn resolve_column(reference: &ColumnRef, columns: &[ColumnKey]) -> Vec<ColumnKey> {
    let arity = columns.first().map(ColumnKey::arity);
    if let Some(key) = arity.and_then(|a| reference.as_key(a)) {
        return vec![key];
    }

    let prefix = reference.segments();
    let matched: Vec<ColumnKey> = columns
        .iter()
        .filter(|key| {
            let segments = key.segments();
            segments.len() > prefix.len() && segments[..prefix.len()] == prefix[..]
        })
        .cloned()
        .collect();
    if matched.is_empty() {
        log::debug!("no column matches {reference}");
    }
    matched
}

/// Resolve each reference and concatenate the results in reference order.
pub fn resolve_columns(references: &[ColumnRef], columns: &[ColumnKey]) -> Vec<ColumnKey> {
    references
        .iter()
        .flat_map(|r| resolve_column(r, columns))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnKey> {
        vec![
            ColumnKey::hier("covid", "status", "confirmed"),
            ColumnKey::hier("covid", "status", "deaths"),
            ColumnKey::hier("policy", "protection", "facial_coverings"),
            ColumnKey::hier("policy", "tracing", "contact_tracing"),
        ]
    }

    #[test]
    fn prefix_expands_to_matching_columns_in_table_order() {
        let got = resolve_column(&ColumnRef::prefix(&["covid", "status"]), &columns());
        assert_eq!(got, columns()[..2].to_vec());
        let got = resolve_column(&ColumnRef::prefix(&["policy"]), &columns());
        assert_eq!(got, columns()[2..].to_vec());
    }

    #[test]
    fn unmatched_prefix_contributes_nothing() {
        assert!(resolve_column(&ColumnRef::prefix(&["covid", "protection"]), &columns()).is_empty());
    }

    #[test]
    fn complete_key_is_returned_as_is() {
        let key = ColumnKey::hier("health_system", "status", "icu");
        assert_eq!(resolve_column(&key.clone().into(), &columns()), vec![key]);
    }

    #[test]
    fn leaf_tables_treat_leaf_references_as_complete() {
        let leaves = vec![ColumnKey::leaf("icu"), ColumnKey::leaf("deaths")];
        assert_eq!(
            resolve_column(&ColumnKey::leaf("vent").into(), &leaves),
            vec![ColumnKey::leaf("vent")]
        );
    }

    #[test]
    fn reference_lists_are_flattened_in_order() {
        let refs = vec![
            ColumnRef::from(ColumnKey::hier("policy", "tracing", "contact_tracing")),
            ColumnRef::prefix(&["covid", "status"]),
            ColumnRef::prefix(&["vaccines"]),
        ];
        let got = resolve_columns(&refs, &columns());
        assert_eq!(got, vec![columns()[3].clone(), columns()[0].clone(), columns()[1].clone()]);
    }
}
