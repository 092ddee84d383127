//! Table conformer: raw table → `(date, region)`-indexed table whose columns are
//! exactly the taxonomy keys, in taxonomy order.
//!
//! ```text
//!  raw table (leaf labels, any order, extra columns)
//!        │  filter_columns   keep index + taxonomy columns, taxonomy order
//!        ▼
//!        │  set_row_index    promote index columns to the row index
//!        ▼
//!        │  relabel_columns  leaf labels → hierarchical keys (count must match)
//!        ▼
//!  conformed table
//! ```
//!
//! Relabeling is positional, so the three steps only make sense in this order.
//! Every step leaves the table untouched when it returns `Err`.

use crate::data::model::{ColumnKey, HierKey, IndexLevel, Table, KEY_ARITY};
use crate::error::{reported, StudyError};
use crate::taxonomy::Taxonomy;

/// Retain the columns named by `index_names` or `taxonomy_keys`, in that order.
///
/// Leaf-labelled tables are matched on the key's leaf name, hierarchical tables on
/// the full key. Requested columns that are absent are skipped.
pub fn filter_columns(
    table: &mut Table,
    index_names: &[String],
    taxonomy_keys: &[HierKey],
) -> Result<(), StudyError> {
    if table.columns.is_empty() {
        return Ok(());
    }

    let wanted: Vec<ColumnKey> = match table.column_arity() {
        Some(1) => index_names
            .iter()
            .map(|n| ColumnKey::Leaf(n.clone()))
            .chain(taxonomy_keys.iter().map(|k| ColumnKey::Leaf(k.name.clone())))
            .collect(),
        Some(KEY_ARITY) => taxonomy_keys.iter().cloned().map(ColumnKey::from).collect(),
        other => {
            return Err(StudyError::SchemaMismatch {
                operation: "filter_columns",
                details: match other {
                    Some(depth) => format!("unsupported column label depth {depth}"),
                    None => "column labels mix leaf names and hierarchical keys".to_string(),
                },
            });
        }
    };

    let mut remaining = std::mem::take(&mut table.columns);
    let mut kept = Vec::with_capacity(wanted.len());
    let mut missing = Vec::new();
    for key in &wanted {
        match remaining.iter().position(|c| &c.key == key) {
            Some(pos) => kept.push(remaining.remove(pos)),
            None => missing.push(key.to_string()),
        }
    }

    if !remaining.is_empty() {
        log::debug!("filter_columns: dropped {} irrelevant column(s)", remaining.len());
    }
    if !missing.is_empty() {
        log::debug!("filter_columns: absent from input: {}", missing.join(", "));
    }
    table.columns = kept;
    Ok(())
}

/// Promote the named columns to the row index, in the given order.
///
/// A no-op when they already all are index levels. An existing index (e.g. a
/// synthetic row id) is kept as the leading levels.
pub fn set_row_index(table: &mut Table, index_names: &[String]) -> Result<(), StudyError> {
    let in_index = |name: &String| table.index.iter().any(|l| &l.name == name);
    if index_names.iter().all(in_index) {
        return Ok(());
    }
    if index_names.iter().any(in_index) {
        return Err(StudyError::SchemaMismatch {
            operation: "set_row_index",
            details: format!(
                "index {:?} only partially covers {index_names:?}",
                table.index_names()
            ),
        });
    }
    if let Some(absent) = index_names
        .iter()
        .find(|n| table.column(&ColumnKey::Leaf((*n).clone())).is_none())
    {
        return Err(StudyError::ColumnNotFound {
            operation: "set_row_index",
            column: absent.clone(),
        });
    }

    for name in index_names {
        let key = ColumnKey::Leaf(name.clone());
        if let Some(pos) = table.column_position(&key) {
            let column = table.columns.remove(pos);
            table.index.push(IndexLevel {
                name: name.clone(),
                values: column.values,
            });
        }
    }
    Ok(())
}

/// Replace column labels with `keys`, position by position.
///
/// Only applied when the counts match exactly; a partial relabel would attach
/// keys to the wrong data.
pub fn relabel_columns(table: &mut Table, keys: &[HierKey]) -> Result<(), StudyError> {
    if table.columns.len() != keys.len() {
        return Err(StudyError::SchemaMismatch {
            operation: "relabel_columns",
            details: format!(
                "table has {} columns, taxonomy has {} keys",
                table.columns.len(),
                keys.len()
            ),
        });
    }
    for (column, key) in table.columns.iter_mut().zip(keys) {
        column.key = ColumnKey::Hierarchical(key.clone());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Conformer
// ---------------------------------------------------------------------------

/// Applies filter → set-index → relabel for one taxonomy and index layout.
#[derive(Debug, Clone)]
pub struct TableConformer<'a> {
    taxonomy: &'a Taxonomy,
    index_columns: Vec<String>,
}

impl<'a> TableConformer<'a> {
    pub fn new(taxonomy: &'a Taxonomy, index_columns: Vec<String>) -> Self {
        TableConformer {
            taxonomy,
            index_columns,
        }
    }

    pub fn index_columns(&self) -> &[String] {
        &self.index_columns
    }

    /// Conform `table` in place. Returns the conditions of the skipped steps.
    ///
    /// Relabeling is positional, so it only runs when filtering and indexing
    /// both succeeded; otherwise it is skipped and reported as a mismatch.
    pub fn conform(&self, table: &mut Table) -> Vec<StudyError> {
        let keys = self.taxonomy.study_params();
        let mut diagnostics: Vec<StudyError> = [
            filter_columns(table, &self.index_columns, &keys),
            set_row_index(table, &self.index_columns),
        ]
        .into_iter()
        .filter_map(Result::err)
        .map(reported)
        .collect();

        let relabeled = if diagnostics.is_empty() {
            relabel_columns(table, &keys)
        } else {
            Err(StudyError::SchemaMismatch {
                operation: "relabel_columns",
                details: format!("skipped after {} failed conform step(s)", diagnostics.len()),
            })
        };
        if let Err(err) = relabeled {
            diagnostics.push(reported(err));
        }

        log::info!(
            "conformed table: {} rows, {}/{} taxonomy columns, index {:?}",
            table.len(),
            table.width(),
            keys.len(),
            table.index_names()
        );
        diagnostics
    }
}
