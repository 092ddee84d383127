use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::datatypes::{DataType, Date32Type};
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{CellValue, Column, ColumnKey, Table};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row with leaf column names (recommended)
/// * `.json`    – `[{ "date": "2020-03-01", "confirmed": 12, ... }, ...]`
/// * `.parquet` – flat scalar columns, as written by Pandas or Polars
///
/// Columns keep the file's order and the row index is the default positional one.
pub fn load_file(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let table = match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        "parquet" | "pq" => load_parquet(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;

    log::info!(
        "loaded {} rows × {} columns from {}",
        table.len(),
        table.width(),
        path.display()
    );
    Ok(table)
}

/// Infer the type of a text cell: empty → Null, then integer, float, bool,
/// ISO date, and finally plain string.
pub fn guess_cell_type(s: &str) -> CellValue {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return CellValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return CellValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return CellValue::from(f);
    }
    if s == "true" || s == "false" {
        return CellValue::Bool(s == "true");
    }
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return CellValue::Date(s.to_string());
    }
    CellValue::String(s.to_string())
}

fn into_table(names: Vec<String>, values: Vec<Vec<CellValue>>) -> Result<Table> {
    let columns = names
        .into_iter()
        .zip(values)
        .map(|(name, values)| Column::new(ColumnKey::Leaf(name), values))
        .collect();
    Ok(Table::from_columns(columns)?)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names, one row per date × region.
/// Every column is loaded; selecting the relevant ones is the conformer's job.
fn load_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut values: Vec<Vec<CellValue>> = vec![Vec::new(); headers.len()];

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.len() != headers.len() {
            bail!(
                "CSV row {row_no}: {} fields but {} headers",
                record.len(),
                headers.len()
            );
        }
        for (col_idx, value) in record.iter().enumerate() {
            values[col_idx].push(guess_cell_type(value));
        }
    }

    into_table(headers, values)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, the default `df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "date": "2020-03-01", "administrative_area_level_1": "Italy", "confirmed": 1694 },
///   ...
/// ]
/// ```
///
/// Keys missing from a record become `Null`.
fn load_json(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    let mut names: Vec<String> = Vec::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    let values: Vec<Vec<CellValue>> = names
        .iter()
        .map(|name| {
            records
                .iter()
                .map(|rec| rec.get(name).map(json_to_cell).unwrap_or(CellValue::Null))
                .collect()
        })
        .collect();

    into_table(names, values)
}

fn json_to_cell(val: &JsonValue) -> CellValue {
    match val {
        JsonValue::String(s) => guess_cell_type(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                CellValue::from(f)
            } else {
                CellValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => CellValue::Bool(*b),
        JsonValue::Null => CellValue::Null,
        other => CellValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with flat scalar columns (strings, ints, floats, bools, dates).
fn load_parquet(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut values: Vec<Vec<CellValue>> = vec![Vec::new(); names.len()];

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (col_idx, column) in batch.columns().iter().enumerate() {
            for row in 0..batch.num_rows() {
                values[col_idx].push(extract_cell(column, row)?);
            }
        }
    }

    into_table(names, values)
}

// -- Parquet / Arrow helpers --

/// Extract a single cell from an Arrow column at a given row.
fn extract_cell(col: &Arc<dyn Array>, row: usize) -> Result<CellValue> {
    if col.is_null(row) {
        return Ok(CellValue::Null);
    }
    let value = match col.data_type() {
        DataType::Utf8 => {
            let s = col
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            guess_cell_type(s.value(row))
        }
        DataType::LargeUtf8 => guess_cell_type(col.as_string::<i64>().value(row)),
        DataType::Int32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int32Array>()
                .context("expected Int32Array")?;
            CellValue::Integer(arr.value(row) as i64)
        }
        DataType::Int64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int64Array>()
                .context("expected Int64Array")?;
            CellValue::Integer(arr.value(row))
        }
        DataType::Float32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("expected Float32Array")?;
            CellValue::from(arr.value(row) as f64)
        }
        DataType::Float64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("expected Float64Array")?;
            CellValue::from(arr.value(row))
        }
        DataType::Boolean => {
            let arr = col
                .as_any()
                .downcast_ref::<BooleanArray>()
                .context("expected BooleanArray")?;
            CellValue::Bool(arr.value(row))
        }
        DataType::Date32 => col
            .as_primitive::<Date32Type>()
            .value_as_date(row)
            .map(|d| CellValue::Date(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(CellValue::Null),
        other => bail!("Unsupported parquet column type {other:?}"),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn guesses_cell_types() {
        assert_eq!(guess_cell_type(""), CellValue::Null);
        assert_eq!(guess_cell_type("12"), CellValue::Integer(12));
        assert_eq!(guess_cell_type("0.5"), CellValue::Float(0.5));
        assert_eq!(guess_cell_type("2020-03-01"), CellValue::Date("2020-03-01".into()));
        assert_eq!(guess_cell_type("Italy"), CellValue::String("Italy".into()));
    }

    #[test]
    fn csv_keeps_column_order_and_empty_cells() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "id,date,administrative_area_level_1,confirmed,icu").unwrap();
        writeln!(file, "1,2020-03-01,Italy,1694,").unwrap();
        writeln!(file, "2,2020-03-02,Italy,2036,140").unwrap();
        let table = load_file(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column_keys()[1], ColumnKey::leaf("date"));
        let icu = table.column(&ColumnKey::leaf("icu")).unwrap();
        assert_eq!(icu.values, vec![CellValue::Null, CellValue::Integer(140)]);
    }

    #[test]
    fn json_records_fill_missing_keys_with_null() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[{{"administrative_area_level_1": "Chile", "deaths": 3}},
               {{"administrative_area_level_1": "Chile", "deaths": 4, "vent": 1.5}}]"#
        )
        .unwrap();
        let table = load_file(file.path()).unwrap();
        let vent = table.column(&ColumnKey::leaf("vent")).unwrap();
        assert_eq!(vent.values, vec![CellValue::Null, CellValue::Float(1.5)]);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        assert!(load_file(file.path()).is_err());
    }
}
