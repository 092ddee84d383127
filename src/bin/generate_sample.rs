use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{Duration, NaiveDate};
use parquet::arrow::ArrowWriter;

use covid_study::taxonomy::{DATE_COLUMN, REGION_COLUMN, ROW_ID_COLUMN};
use covid_study::Taxonomy;

const DAYS: i64 = 120;

/// (region, continent, income group, population in millions)
const REGIONS: [(&str, &str, &str, f64); 5] = [
    ("Chile", "South America", "High income", 19.1),
    ("Peru", "South America", "Upper middle income", 33.0),
    ("Spain", "Europe", "High income", 47.4),
    ("Italy", "Europe", "High income", 59.1),
    ("Kenya", "Africa", "Lower middle income", 53.8),
];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Logistic epidemic curve with its midpoint at `peak_day`.
fn logistic(day: f64, peak_day: f64, size: f64) -> f64 {
    size / (1.0 + (-(day - peak_day) / 9.0).exp())
}

/// One synthetic value for `column` in a region on a given day.
/// Cumulative counts follow a logistic curve, hospital load its derivative,
/// policy levels step up as the outbreak grows.
fn synthetic_value(column: &str, day: f64, peak_day: f64, population: f64, rng: &mut SimpleRng) -> Option<f64> {
    let size = population * 2_000.0;
    let cumulative = logistic(day, peak_day, size);
    let growth = cumulative * (1.0 - cumulative / size) / 9.0;
    let phase = (cumulative / size).clamp(0.0, 1.0);
    let value = match column {
        "confirmed" => cumulative,
        "deaths" => cumulative * 0.02,
        "recovered" => logistic(day, peak_day + 14.0, size * 0.95),
        "tests" => cumulative * 12.0,
        "vaccines" | "people_vaccinated" | "people_fully_vaccinated" => {
            // No vaccination data before day 60.
            if day < 60.0 {
                return None;
            }
            population * 1e4 * (day - 60.0)
        }
        "hosp" => growth * 0.15,
        "icu" => growth * 0.04,
        "vent" => growth * 0.02,
        "stringency_index" | "containment_health_index" | "economic_support_index" | "government_response_index" => {
            100.0 * phase
        }
        _ => (4.0 * phase).round(),
    };
    Some((value + rng.gauss(0.0, value.abs() * 0.01)).max(0.0))
}

fn write_csv(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    let mut out = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    out.write_record(header)?;
    for row in rows {
        out.write_record(row)?;
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&out_dir)?;

    let mut rng = SimpleRng::new(42);
    let start = NaiveDate::from_ymd_opt(2020, 3, 1).context("invalid start date")?;
    let measures: Vec<String> = Taxonomy::covid_by_country()
        .study_params()
        .iter()
        .map(|key| key.name.clone())
        .collect();

    // Raw column order differs from the taxonomy's and carries an extra column.
    let mut header = vec![
        ROW_ID_COLUMN.to_string(),
        DATE_COLUMN.to_string(),
        REGION_COLUMN.to_string(),
        "population".to_string(),
    ];
    header.extend(measures.iter().rev().cloned());

    let mut ids: Vec<i64> = Vec::new();
    let mut dates: Vec<String> = Vec::new();
    let mut regions: Vec<String> = Vec::new();
    let mut populations: Vec<f64> = Vec::new();
    let mut series: Vec<Vec<Option<f64>>> = vec![Vec::new(); measures.len()];

    let mut row_id: i64 = 0;
    for (region_no, &(region, _, _, population)) in REGIONS.iter().enumerate() {
        let peak_day = 30.0 + 12.0 * region_no as f64;
        for day in 0..DAYS {
            ids.push(row_id);
            dates.push((start + Duration::days(day)).format("%Y-%m-%d").to_string());
            regions.push(region.to_string());
            populations.push(population * 1e6);
            for (values, column) in series.iter_mut().zip(measures.iter().rev()) {
                values.push(synthetic_value(column, day as f64, peak_day, population, &mut rng));
            }
            row_id += 1;
        }
    }

    let rows: Vec<Vec<String>> = (0..ids.len())
        .map(|r| {
            let mut row = vec![ids[r].to_string(), dates[r].clone(), regions[r].clone(), populations[r].to_string()];
            row.extend(series.iter().map(|s| s[r].map(|v| format!("{v:.3}")).unwrap_or_default()));
            row
        })
        .collect();
    let csv_path = out_dir.join("timeseries_by_country.csv");
    write_csv(&csv_path, &header, &rows)?;

    // Parquet
    let mut fields = vec![
        Field::new(ROW_ID_COLUMN, DataType::Int64, false),
        Field::new(DATE_COLUMN, DataType::Utf8, false),
        Field::new(REGION_COLUMN, DataType::Utf8, false),
        Field::new("population", DataType::Float64, false),
    ];
    fields.extend(header[4..].iter().map(|name| Field::new(name, DataType::Float64, true)));
    let schema = Arc::new(Schema::new(fields));

    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(StringArray::from(dates)),
        Arc::new(StringArray::from(regions)),
        Arc::new(Float64Array::from(populations)),
    ];
    arrays.extend(series.into_iter().map(|s| Arc::new(Float64Array::from(s)) as ArrayRef));

    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;
    let parquet_path = out_dir.join("timeseries_by_country.parquet");
    let file = std::fs::File::create(&parquet_path)
        .with_context(|| format!("creating {}", parquet_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    // Region attributes
    let attributes: Vec<Vec<String>> = REGIONS
        .iter()
        .map(|&(region, continent, income, _)| vec![region.to_string(), continent.to_string(), income.to_string()])
        .collect();
    let attributes_path = out_dir.join("regions.csv");
    write_csv(
        &attributes_path,
        &[REGION_COLUMN.to_string(), "continent".to_string(), "income_group".to_string()],
        &attributes,
    )?;

    println!(
        "Wrote {row_id} rows ({} regions × {DAYS} days) to {} and {}, attributes to {}",
        REGIONS.len(),
        csv_path.display(),
        parquet_path.display(),
        attributes_path.display()
    );
    Ok(())
}
