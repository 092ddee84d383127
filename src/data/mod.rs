/// Data layer: core types, loading, region filtering and export.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Table (leaf columns, positional index)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Table    │  Vec<Column>, index levels (date × region once conformed)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  attribute rule / explicit list → region rows
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  export   │  aggregate table → CSV
///   └──────────┘
/// ```

pub mod export;
pub mod filter;
pub mod loader;
pub mod model;
