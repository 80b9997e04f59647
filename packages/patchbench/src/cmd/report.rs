//! Fold pending batch fragments and print a run's report.

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;
use patchbench::RunLayout;
use patchbench::report::update_run_report;

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Run identifier (the run's timestamp).
    #[arg(short, long)]
    run_id: String,

    /// Directory holding run results.
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,
}

pub fn main(config: Config) -> Result<()> {
    let layout = RunLayout::new(&config.results_dir, config.run_id.as_str());
    let report = update_run_report(&layout)?;
    report.print_summary();
    Ok(())
}
