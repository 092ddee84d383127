//! Country-level COVID-19 study: conform a raw time-series table to a
//! hierarchical parameter taxonomy, select regions, and aggregate per region.

pub mod aggregate;
pub mod config;
pub mod conform;
pub mod data;
pub mod error;
pub mod resolve;
pub mod study;
pub mod taxonomy;

pub use aggregate::{AggregateTable, GroupedAggregation, LocatedSpec, Reduction, ReductionSpec};
pub use conform::TableConformer;
pub use data::model::{CellValue, Column, ColumnKey, ColumnRef, HierKey, Table};
pub use error::StudyError;
pub use study::{Relationship, Study, StudyOptions};
pub use taxonomy::{ParameterGroup, Taxonomy};
