use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::aggregate::AggregateTable;

/// Write an aggregate table as CSV: a leading region column named after the
/// aggregate's index, then one column per spec. Missing values are empty cells.
pub fn write_aggregate<W: Write>(table: &AggregateTable, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);

    let mut header = vec![table.index_name.as_str()];
    header.extend(table.columns.iter().map(String::as_str));
    out.write_record(&header).context("writing CSV header")?;

    for (region, row) in table.regions.iter().zip(&table.values) {
        let record: Vec<String> = std::iter::once(region.to_field())
            .chain(row.iter().map(|v| v.to_field()))
            .collect();
        out.write_record(&record)
            .with_context(|| format!("writing aggregate row for {region}"))?;
    }
    out.flush().context("flushing CSV output")?;
    Ok(())
}

pub fn write_aggregate_csv(table: &AggregateTable, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_aggregate(table, file)?;
    log::info!("wrote {} aggregate row(s) to {}", table.len(), path.display());
    Ok(())
}
