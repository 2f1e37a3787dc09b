//! Fiscal Sim CLI
//!
//! Runs the bundled (or a supplied) population under current law or a
//! reform and prints weighted revenue totals per year.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;

use fiscal_sim::config::{DataFiles, DEFAULT_DATA_PATH, DEFAULT_DATA_YEAR};
use fiscal_sim::simulation::liability_column;
use fiscal_sim::{EntityKind, Reform, YearTotals};

#[derive(Parser, Debug)]
#[command(name = "fiscal_sim", about = "Project PIT, CIT and GST revenue year by year")]
struct Cli {
    /// Directory holding sample data, weights and growth factors
    #[arg(long, default_value = DEFAULT_DATA_PATH)]
    data_dir: PathBuf,

    /// Assessment year of the sample data
    #[arg(long, default_value_t = DEFAULT_DATA_YEAR)]
    data_year: i32,

    /// First year to report
    #[arg(long, default_value_t = DEFAULT_DATA_YEAR)]
    start: i32,

    /// Last year to report, inclusive
    #[arg(long, default_value_t = 2023)]
    end: i32,

    /// Reform file to apply on top of current law
    #[arg(long)]
    reform: Option<PathBuf>,

    /// Write the per-year summary as JSON
    #[arg(long)]
    json_out: Option<PathBuf>,

    /// Write a per-record projection of `--columns` as CSV, one file per year
    /// named `<prefix>_<year>.csv`
    #[arg(long)]
    csv_out: Option<PathBuf>,

    /// Population for `--csv-out`
    #[arg(long, default_value = "individual")]
    entity: EntityKind,

    /// Columns for `--csv-out`
    #[arg(long, value_delimiter = ',', default_value = "SALARIES,pitax,weight")]
    columns: Vec<String>,
}

#[derive(Serialize)]
struct RunSummary {
    generated_at: DateTime<Utc>,
    reform: Option<PathBuf>,
    years: Vec<YearTotals>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if cli.end < cli.start {
        bail!("--end {} is before --start {}", cli.end, cli.start);
    }

    println!("Fiscal Sim v{}", env!("CARGO_PKG_VERSION"));
    println!("==================\n");

    let reform = cli
        .reform
        .as_ref()
        .map(|path| {
            Reform::from_path(path).with_context(|| format!("reading reform {}", path.display()))
        })
        .transpose()?;

    let files = DataFiles::in_dir(&cli.data_dir);
    let mut sim = files
        .load_simulation(cli.data_year, reform.as_ref())
        .with_context(|| format!("loading data from {}", cli.data_dir.display()))?;
    sim.advance_to_year(cli.start)
        .with_context(|| format!("advancing to start year {}", cli.start))?;

    for kind in sim.kinds() {
        let store = sim.store(kind)?;
        println!("{:<12} {:>6} records, data year {}", kind.as_str(), store.rows(), store.data_year());
    }
    println!();

    let columns: Vec<(EntityKind, &str)> = sim.kinds().into_iter().map(|k| (k, liability_column(k))).collect();
    println!("{:>6} {:>18} {:>18} {:>18}", "Year", "PIT", "CIT", "GST");
    println!("{}", "-".repeat(63));

    let csv_columns: Vec<&str> = cli.columns.iter().map(String::as_str).collect();
    let mut years = Vec::new();
    for year in cli.start..=cli.end {
        if year > cli.start {
            sim.increment_year()?;
        }
        sim.calc_all().with_context(|| format!("calculating {year}"))?;

        let mut totals = YearTotals {
            year,
            totals: Default::default(),
        };
        for (kind, column) in &columns {
            totals.totals.insert(format!("{kind}.{column}"), sim.weighted_total(*kind, column)?);
        }
        let total = |kind: EntityKind| {
            totals
                .totals
                .get(&format!("{kind}.{}", liability_column(kind)))
                .copied()
                .unwrap_or(0.0)
        };
        println!(
            "{:>6} {:>18.0} {:>18.0} {:>18.0}",
            year,
            total(EntityKind::Individual),
            total(EntityKind::Corporate),
            total(EntityKind::Consumption),
        );

        if let Some(prefix) = &cli.csv_out {
            let path = prefix.with_file_name(format!(
                "{}_{year}.csv",
                prefix.file_stem().and_then(|s| s.to_str()).unwrap_or("projection")
            ));
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            sim.table(cli.entity, &csv_columns)?.write_csv(file)?;
        }
        years.push(totals);
    }

    if let Some(path) = &cli.json_out {
        let summary = RunSummary {
            generated_at: Utc::now(),
            reform: cli.reform.clone(),
            years,
        };
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(file, &summary)?;
        println!("\nSummary written to: {}", path.display());
    }
    Ok(())
}
