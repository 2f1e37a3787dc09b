//! Compare current-law and reform revenue year by year
//!
//! Usage: cargo run --bin compare_reform -- --reform data/reforms/budget_reform.json

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use fiscal_sim::config::{DataFiles, DEFAULT_DATA_PATH, DEFAULT_DATA_YEAR};
use fiscal_sim::simulation::liability_column;
use fiscal_sim::{EntityKind, Reform, Simulation, YearTotals};

#[derive(Parser, Debug)]
#[command(name = "compare_reform", about = "Baseline vs reform revenue by year")]
struct Cli {
    #[arg(long)]
    reform: PathBuf,

    #[arg(long, default_value = DEFAULT_DATA_PATH)]
    data_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_DATA_YEAR)]
    data_year: i32,

    /// Number of years to project from the data year
    #[arg(long, default_value_t = 7)]
    years: usize,
}

fn run(sim: &Simulation, years: usize) -> Result<Vec<YearTotals>> {
    let columns: Vec<(EntityKind, &str)> = sim.kinds().into_iter().map(|k| (k, liability_column(k))).collect();
    Ok(sim.multi_year_totals(years, &columns)?)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let reform = Reform::from_path(&cli.reform)
        .with_context(|| format!("reading reform {}", cli.reform.display()))?;
    let files = DataFiles::in_dir(&cli.data_dir);
    let baseline = files.load_simulation(cli.data_year, None).context("loading baseline")?;
    let reformed = files
        .load_simulation(cli.data_year, Some(&reform))
        .context("loading reform")?;

    let (base, alt) = rayon::join(|| run(&baseline, cli.years), || run(&reformed, cli.years));
    let (base, alt) = (base?, alt?);

    println!("Reform: {}", cli.reform.display());
    println!("{}", "=".repeat(72));
    println!("{:>6} {:>10} {:>18} {:>18} {:>16}", "Year", "Tax", "Baseline", "Reform", "Change");
    println!("{}", "-".repeat(72));
    for (b, r) in base.iter().zip(&alt) {
        for (key, before) in &b.totals {
            let after = r.totals.get(key).copied().unwrap_or(0.0);
            let tax = key.split('.').next().unwrap_or(key);
            println!(
                "{:>6} {:>10} {:>18.0} {:>18.0} {:>16.0}",
                b.year,
                tax,
                before,
                after,
                after - before
            );
        }
    }
    Ok(())
}
