use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use covid_study::config::StudyConfig;
use covid_study::data::{export, loader};
use covid_study::{ColumnRef, Study, Taxonomy};

#[derive(Parser)]
#[command(name = "covid-study", version, about = "Per-region study of COVID-19 time series")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the built-in parameter taxonomy
    Taxonomy,
    /// Build a study and print (or write) its per-region aggregate
    Run(RunArgs),
    /// List the regions left after region selection
    Regions(ConfigArgs),
    /// Expand a column reference against the conformed columns
    Resolve(ResolveArgs),
}

#[derive(Parser)]
struct ConfigArgs {
    /// Study configuration TOML
    #[arg(long, value_name = "PATH")]
    config: PathBuf,
}

#[derive(Parser)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Write the aggregate as CSV instead of printing it
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Parser)]
struct ResolveArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Reference segments, e.g. `covid status` or `policy protection facial_coverings`
    #[arg(required = true)]
    segments: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Taxonomy => print_taxonomy(&Taxonomy::covid_by_country()),
        Commands::Run(args) => run(args),
        Commands::Regions(args) => {
            let (study, _) = build_study(&args)?;
            for region in study.regions() {
                println!("{region}");
            }
            Ok(())
        }
        Commands::Resolve(args) => {
            let (study, _) = build_study(&args.config)?;
            for key in study.resolve(&[ColumnRef::Prefix(args.segments)]) {
                println!("{key}");
            }
            Ok(())
        }
    }
}

fn build_study(args: &ConfigArgs) -> Result<(Study, StudyConfig)> {
    let config = StudyConfig::from_path(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let raw = loader::load_file(&config.input.data_path)?;
    let study = Study::build(raw, &config.study_options()?);
    Ok((study, config))
}

fn print_taxonomy(taxonomy: &Taxonomy) -> Result<()> {
    for group in taxonomy.groups() {
        println!("{}", group.name);
        for key in &group.keys {
            println!("  {key}");
        }
    }
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let (study, config) = build_study(&args.config)?;
    println!(
        "{} rows × {} columns, {} region(s)",
        study.data.len(),
        study.data.width(),
        study.regions().len()
    );

    let slices = study.region_slices(config.input.min_datapoints_in_region);
    println!("{} region/group slice(s) with enough data", slices.len());

    let relationships = config.relationships();
    for (i, columns) in study.relationship_columns(&relationships).into_iter().enumerate() {
        let Ok(columns) = columns else {
            continue;
        };
        let matrix = study.correlation(&columns);
        println!(
            "relationship {}: {} column(s), {} complete row(s)",
            i + 1,
            matrix.columns.len(),
            matrix.rows_used
        );
    }

    match (&study.aggregate, &args.output) {
        (Some(aggregate), Some(path)) => export::write_aggregate_csv(aggregate, path)?,
        (Some(aggregate), None) => export::write_aggregate(aggregate, std::io::stdout().lock())?,
        (None, _) => println!("no aggregate computed"),
    }

    if !study.diagnostics.is_empty() {
        eprintln!("{} diagnostic(s):", study.diagnostics.len());
        for diagnostic in &study.diagnostics {
            eprintln!("  {diagnostic}");
        }
    }
    Ok(())
}
