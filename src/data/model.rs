use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StudyError;

/// Number of levels of a hierarchical column key.
pub const KEY_ARITY: usize = 3;

// ---------------------------------------------------------------------------
// CellValue – a single cell of a study table
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value mirroring common Pandas dtypes.
/// Region partitions are keyed by `BTreeMap<CellValue, _>` so `CellValue` must be `Ord`.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date string kept as text for simplicity.
    Date(String),
    Null,
}

// -- Manual Eq/Ord so we can put CellValue in BTreeSet --

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use CellValue::*;
        fn discriminant(v: &CellValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) | (Date(a), Date(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl std::hash::Hash for CellValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::String(s) | CellValue::Date(s) => s.hash(state),
            CellValue::Integer(i) => i.hash(state),
            CellValue::Float(f) => f.to_bits().hash(state),
            CellValue::Bool(b) => b.hash(state),
            CellValue::Null => {}
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v:.4}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Date(d) => write!(f, "{d}"),
            CellValue::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Integer(i)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            CellValue::Null
        } else {
            CellValue::Float(v)
        }
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

impl CellValue {
    /// Try to interpret the value as an `f64` for numeric reductions.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Missing values are `Null` and NaN floats.
    pub fn is_missing(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Ordering used by extremum reductions: integers and floats compare as one
    /// numeric domain, everything else falls back to the total order.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => self.cmp(other),
        }
    }

    /// Equality used when locating the row of a reduction result (`2 == 2.0`).
    pub fn same_value(&self, other: &Self) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Text written to CSV exports: full precision, empty for missing values.
    pub fn to_field(&self) -> String {
        match self {
            CellValue::Float(v) if v.is_nan() => String::new(),
            CellValue::Float(v) => v.to_string(),
            CellValue::Null => String::new(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Column keys and references
// ---------------------------------------------------------------------------

/// A `(domain, subdomain, name)` column identifier, e.g. `(covid, status, confirmed)`.
/// `subdomain` may be empty for ungrouped leaves such as composite indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct HierKey {
    pub domain: String,
    pub subdomain: String,
    pub name: String,
}

impl HierKey {
    pub fn new(domain: &str, subdomain: &str, name: &str) -> Self {
        HierKey {
            domain: domain.to_string(),
            subdomain: subdomain.to_string(),
            name: name.to_string(),
        }
    }

    pub fn segments(&self) -> [&str; KEY_ARITY] {
        [&self.domain, &self.subdomain, &self.name]
    }

    /// Non-empty segments joined with `_`: `(index, "", stringency_index)` → `index_stringency_index`.
    pub fn joined(&self) -> String {
        self.segments()
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl From<(String, String, String)> for HierKey {
    fn from((domain, subdomain, name): (String, String, String)) -> Self {
        HierKey {
            domain,
            subdomain,
            name,
        }
    }
}

impl From<HierKey> for (String, String, String) {
    fn from(key: HierKey) -> Self {
        (key.domain, key.subdomain, key.name)
    }
}

impl fmt::Display for HierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.domain, self.subdomain, self.name)
    }
}

/// Label of a table column: a plain leaf name as read from a file, or a
/// hierarchical key once the table has been conformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawColumn")]
pub enum ColumnKey {
    Leaf(String),
    Hierarchical(HierKey),
}

impl ColumnKey {
    pub fn leaf(name: &str) -> Self {
        ColumnKey::Leaf(name.to_string())
    }

    pub fn hier(domain: &str, subdomain: &str, name: &str) -> Self {
        ColumnKey::Hierarchical(HierKey::new(domain, subdomain, name))
    }

    pub fn arity(&self) -> usize {
        match self {
            ColumnKey::Leaf(_) => 1,
            ColumnKey::Hierarchical(_) => KEY_ARITY,
        }
    }

    pub fn segments(&self) -> Vec<&str> {
        match self {
            ColumnKey::Leaf(name) => vec![name.as_str()],
            ColumnKey::Hierarchical(key) => key.segments().to_vec(),
        }
    }

    /// The last segment, i.e. the name a raw input file would use.
    pub fn leaf_name(&self) -> &str {
        match self {
            ColumnKey::Leaf(name) => name,
            ColumnKey::Hierarchical(key) => &key.name,
        }
    }

    /// Flat name used when deriving aggregate column names.
    pub fn label(&self) -> String {
        match self {
            ColumnKey::Leaf(name) => name.clone(),
            ColumnKey::Hierarchical(key) => key.joined(),
        }
    }
}

impl From<HierKey> for ColumnKey {
    fn from(key: HierKey) -> Self {
        ColumnKey::Hierarchical(key)
    }
}

impl From<&str> for ColumnKey {
    fn from(name: &str) -> Self {
        ColumnKey::leaf(name)
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKey::Leaf(name) => write!(f, "{name}"),
            ColumnKey::Hierarchical(key) => write!(f, "{key}"),
        }
    }
}

/// A column reference as written by a caller: either a complete key or a
/// shorter prefix path (`["covid", "status"]`) denoting every column below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawColumn")]
pub enum ColumnRef {
    Key(ColumnKey),
    Prefix(Vec<String>),
}

impl ColumnRef {
    pub fn prefix(segments: &[&str]) -> Self {
        ColumnRef::Prefix(segments.iter().map(|s| s.to_string()).collect())
    }

    pub fn arity(&self) -> usize {
        match self {
            ColumnRef::Key(key) => key.arity(),
            ColumnRef::Prefix(segments) => segments.len(),
        }
    }

    pub fn segments(&self) -> Vec<&str> {
        match self {
            ColumnRef::Key(key) => key.segments(),
            ColumnRef::Prefix(segments) => segments.iter().map(String::as_str).collect(),
        }
    }

    /// Interpret the reference as a concrete key of the given arity, if it is one.
    pub fn as_key(&self, arity: usize) -> Option<ColumnKey> {
        match self {
            ColumnRef::Key(key) if key.arity() == arity => Some(key.clone()),
            ColumnRef::Prefix(segments) if segments.len() == arity => match segments.as_slice() {
                [name] => Some(ColumnKey::Leaf(name.clone())),
                [domain, subdomain, name] => Some(ColumnKey::hier(domain, subdomain, name)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<ColumnKey> for ColumnRef {
    fn from(key: ColumnKey) -> Self {
        ColumnRef::Key(key)
    }
}

impl From<HierKey> for ColumnRef {
    fn from(key: HierKey) -> Self {
        ColumnRef::Key(key.into())
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Key(key) => write!(f, "{key}"),
            ColumnRef::Prefix(segments) => write!(f, "({}, ..)", segments.join(", ")),
        }
    }
}

/// Configuration spelling of a column: `"icu"` or `["health_system", "status", "icu"]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawColumn {
    Name(String),
    Path(Vec<String>),
}

impl TryFrom<RawColumn> for ColumnRef {
    type Error = String;

    fn try_from(raw: RawColumn) -> Result<Self, Self::Error> {
        match raw {
            RawColumn::Name(name) => Ok(ColumnRef::Key(ColumnKey::Leaf(name))),
            RawColumn::Path(path) => match path.len() {
                KEY_ARITY => {
                    let mut it = path.into_iter();
                    let key = HierKey {
                        domain: it.next().unwrap_or_default(),
                        subdomain: it.next().unwrap_or_default(),
                        name: it.next().unwrap_or_default(),
                    };
                    Ok(ColumnRef::Key(key.into()))
                }
                1 | 2 => Ok(ColumnRef::Prefix(path)),
                n => Err(format!("column path must have 1 to {KEY_ARITY} segments, got {n}")),
            },
        }
    }
}

impl TryFrom<RawColumn> for ColumnKey {
    type Error = String;

    fn try_from(raw: RawColumn) -> Result<Self, Self::Error> {
        match ColumnRef::try_from(raw)? {
            ColumnRef::Key(key) => Ok(key),
            ColumnRef::Prefix(path) => Err(format!(
                "expected a leaf name or a full {KEY_ARITY}-level key, got prefix {path:?}"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Table – column-major frame with an optional composite row index
// ---------------------------------------------------------------------------

/// One labelled column of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub key: ColumnKey,
    pub values: Vec<CellValue>,
}

impl Column {
    pub fn new(key: impl Into<ColumnKey>, values: Vec<CellValue>) -> Self {
        Column {
            key: key.into(),
            values,
        }
    }
}

/// One named level of the row index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexLevel {
    pub name: String,
    pub values: Vec<CellValue>,
}

impl IndexLevel {
    pub fn new(name: &str, values: Vec<CellValue>) -> Self {
        IndexLevel {
            name: name.to_string(),
            values,
        }
    }
}

/// An in-memory table. An empty `index` means the default positional index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub(crate) index: Vec<IndexLevel>,
    pub(crate) columns: Vec<Column>,
    pub(crate) rows: usize,
}

impl Table {
    /// Build a table from equally long columns.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, StudyError> {
        let rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
            return Err(StudyError::SchemaMismatch {
                operation: "from_columns",
                details: format!(
                    "column {} has {} values, expected {rows}",
                    bad.key,
                    bad.values.len()
                ),
            });
        }
        Ok(Table {
            index: Vec::new(),
            columns,
            rows,
        })
    }

    /// Attach explicit index levels (replacing the current index).
    pub fn with_index(mut self, index: Vec<IndexLevel>) -> Result<Self, StudyError> {
        if self.columns.is_empty() && self.index.is_empty() {
            self.rows = index.first().map(|l| l.values.len()).unwrap_or(0);
        }
        if let Some(bad) = index.iter().find(|l| l.values.len() != self.rows) {
            return Err(StudyError::SchemaMismatch {
                operation: "with_index",
                details: format!(
                    "index level '{}' has {} values, expected {}",
                    bad.name,
                    bad.values.len(),
                    self.rows
                ),
            });
        }
        self.index = index;
        Ok(self)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_keys(&self) -> Vec<ColumnKey> {
        self.columns.iter().map(|c| c.key.clone()).collect()
    }

    pub fn column(&self, key: &ColumnKey) -> Option<&Column> {
        self.columns.iter().find(|c| &c.key == key)
    }

    pub fn column_position(&self, key: &ColumnKey) -> Option<usize> {
        self.columns.iter().position(|c| &c.key == key)
    }

    pub fn index_levels(&self) -> &[IndexLevel] {
        &self.index
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.index.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn index_level(&self, name: &str) -> Option<&IndexLevel> {
        self.index.iter().find(|l| l.name == name)
    }

    /// Depth of the column labels: 1 when all leaves, 3 when all hierarchical,
    /// `None` for a mix of both or a table without columns.
    pub fn column_arity(&self) -> Option<usize> {
        let first = self.columns.first()?.key.arity();
        self.columns
            .iter()
            .all(|c| c.key.arity() == first)
            .then_some(first)
    }

    /// Values of a column, or of an index level when `key` is a leaf naming one.
    /// Ordinary columns take precedence.
    pub fn values_of(&self, key: &ColumnKey) -> Option<&[CellValue]> {
        if let Some(col) = self.column(key) {
            return Some(&col.values);
        }
        match key {
            ColumnKey::Leaf(name) => self.index_level(name).map(|l| l.values.as_slice()),
            ColumnKey::Hierarchical(_) => None,
        }
    }

    /// New table holding the given rows, in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> Table {
        let pick = |values: &[CellValue]| -> Vec<CellValue> {
            rows.iter().map(|&r| values[r].clone()).collect()
        };
        Table {
            index: self
                .index
                .iter()
                .map(|l| IndexLevel {
                    name: l.name.clone(),
                    values: pick(&l.values),
                })
                .collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    key: c.key.clone(),
                    values: pick(&c.values),
                })
                .collect(),
            rows: rows.len(),
        }
    }

    /// Keep only the given columns (in the given order, absent ones skipped).
    pub fn select_columns(&self, keys: &[ColumnKey]) -> Table {
        Table {
            index: self.index.clone(),
            columns: keys
                .iter()
                .filter_map(|k| self.column(k).cloned())
                .collect(),
            rows: self.rows,
        }
    }

    /// Keep every `step`-th row, starting with the first.
    pub fn downsample(&mut self, step: usize) {
        if step <= 1 {
            return;
        }
        let rows: Vec<usize> = (0..self.rows).step_by(step).collect();
        *self = self.take_rows(&rows);
    }

    /// Remove an index level; returns whether it existed.
    pub fn drop_index_level(&mut self, name: &str) -> bool {
        let before = self.index.len();
        self.index.retain(|l| l.name != name);
        self.index.len() != before
    }

    /// Whether every cell of every column is missing.
    pub fn all_missing(&self) -> bool {
        self.columns
            .iter()
            .all(|c| c.values.iter().all(CellValue::is_missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::from_columns(vec![
            Column::new("date", vec!["2020-01-01".into(), "2020-01-02".into(), "2020-01-03".into()]),
            Column::new(ColumnKey::hier("covid", "status", "deaths"), vec![1i64.into(), 2i64.into(), 3i64.into()]),
        ])
        .unwrap()
    }

    #[test]
    fn hierarchical_key_joins_non_empty_segments() {
        assert_eq!(HierKey::new("covid", "status", "confirmed").joined(), "covid_status_confirmed");
        assert_eq!(HierKey::new("index", "", "stringency_index").joined(), "index_stringency_index");
    }

    #[test]
    fn unequal_columns_are_rejected() {
        let err = Table::from_columns(vec![
            Column::new("a", vec![CellValue::Null]),
            Column::new("b", vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, StudyError::SchemaMismatch { .. }));
    }

    #[test]
    fn mixed_labels_have_no_arity() {
        assert_eq!(table().column_arity(), None);
        assert_eq!(table().select_columns(&[ColumnKey::leaf("date")]).column_arity(), Some(1));
    }

    #[test]
    fn values_of_falls_back_to_index_levels() {
        let t = Table::from_columns(vec![Column::new("icu", vec![5i64.into()])])
            .unwrap()
            .with_index(vec![IndexLevel::new("date", vec!["2021-03-01".into()])])
            .unwrap();
        assert_eq!(t.values_of(&ColumnKey::leaf("date")), Some(&[CellValue::from("2021-03-01")][..]));
        assert!(t.values_of(&ColumnKey::leaf("vent")).is_none());
    }

    #[test]
    fn downsample_keeps_first_row_and_every_step() {
        let mut t = table();
        t.downsample(2);
        assert_eq!(t.len(), 2);
        assert_eq!(t.columns()[1].values, vec![CellValue::Integer(1), CellValue::Integer(3)]);
    }

    #[test]
    fn numeric_values_compare_across_integer_and_float() {
        assert!(CellValue::Integer(2).same_value(&CellValue::Float(2.0)));
        assert_eq!(CellValue::Integer(3).compare(&CellValue::Float(2.5)), Ordering::Greater);
        assert!(CellValue::from(f64::NAN).is_missing());
    }

    #[test]
    fn raw_paths_become_keys_or_prefixes() {
        let key: ColumnRef = RawColumn::Path(vec!["covid".into(), "status".into(), "deaths".into()])
            .try_into()
            .unwrap();
        assert_eq!(key, ColumnRef::Key(ColumnKey::hier("covid", "status", "deaths")));
        let prefix: ColumnRef = RawColumn::Path(vec!["covid".into()]).try_into().unwrap();
        assert_eq!(prefix, ColumnRef::prefix(&["covid"]));
        assert!(ColumnKey::try_from(RawColumn::Path(vec!["covid".into()])).is_err());
    }
}
