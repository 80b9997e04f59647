//! Run an evaluation over requested patch submissions.

use std::path::PathBuf;
use std::thread::available_parallelism;

use clap::Args;
use color_eyre::{Result, eyre::eyre};
use owo_colors::OwoColorize;
use patchbench::batch::{BatchRunner, write_predictions, write_test_instances};
use patchbench::layout::cache_path;
use patchbench::{
    CachePolicy, CacheStore, CommandHarness, DatasetProvider, LocalDataset, Report, RunLayout,
    Submission, request,
};

/// Largest worker count picked automatically.
const MAX_AUTO_WORKERS: usize = 24;

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Request document (local path or URL) with `{instance_id, patch}`
    /// records. Mutually exclusive with `--interactive`.
    #[arg(short, long, conflicts_with = "interactive")]
    input: Option<String>,

    /// Prompt for instance ids and patch locations on stdin.
    #[arg(long)]
    interactive: bool,

    /// How the cache participates in this run.
    #[arg(long, value_enum, default_value_t = CachePolicy::Normal)]
    cache_policy: CachePolicy,

    /// Harness worker count; 0 picks one from the available CPUs.
    #[arg(short, long, default_value = "0")]
    workers: usize,

    /// Run all uncached work as a single batch instead of chunking it
    /// by worker count.
    #[arg(long)]
    no_chunking: bool,

    /// Benchmark dataset name.
    #[arg(short, long, default_value = "SWE-bench")]
    dataset: String,

    /// Dataset split to evaluate against.
    #[arg(long, default_value = "test")]
    split: String,

    /// Per-batch wall-clock budget passed to the harness, in seconds.
    #[arg(long, default_value = "1800")]
    timeout: u64,

    /// Directory holding run results.
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Directory holding the evaluation cache.
    #[arg(long, default_value = "cache")]
    cache_dir: PathBuf,

    /// Directory holding dataset snapshots.
    #[arg(long, default_value = "datasets")]
    dataset_dir: PathBuf,

    /// Harness program to invoke per batch.
    #[arg(long, default_value = "swebench-eval")]
    harness: String,
}

impl Config {
    fn submissions(&self) -> Result<Vec<Submission>> {
        match (&self.input, self.interactive) {
            (Some(location), _) => request::from_document(location),
            (None, true) => request::interactive(),
            (None, false) => Err(eyre!("either --input or --interactive is required")),
        }
    }

    fn resolved_workers(&self) -> usize {
        if self.workers != 0 {
            return self.workers;
        }
        let cpus = available_parallelism().map(usize::from).unwrap_or(1);
        (cpus * 3 / 4).clamp(1, MAX_AUTO_WORKERS)
    }
}

pub fn main(config: Config) -> Result<()> {
    let requested = config.submissions()?;
    if requested.is_empty() {
        println!("{}", "Nothing to evaluate.".yellow());
        return Ok(());
    }

    let workers = config.resolved_workers();
    let layout = RunLayout::for_now(&config.results_dir);

    println!("{}", "Evaluation".bold().underline());
    println!("  {} {}", "Dataset:".cyan(), config.dataset);
    println!("  {} {}", "Run id:".cyan(), layout.run_id());
    println!("  {} {}", "Cache policy:".cyan(), config.cache_policy);
    println!(
        "  {} {}{}",
        "Workers:".cyan(),
        workers,
        if config.workers == 0 { " (auto)" } else { "" }
    );
    println!("  {} {}", "Requested:".cyan(), requested.len());
    println!();

    let mut store = CacheStore::open(&cache_path(&config.cache_dir, &config.dataset))?;
    let filtered = store.filter(&requested, config.cache_policy, &layout)?;

    if !filtered.served.is_empty() {
        println!("{}", "Served from cache".bold());
        for outcome in &filtered.served {
            println!("  {outcome}");
        }
        println!();
    }

    // Seed the run report with the cache-served instances, so batch
    // fragments accumulate onto it.
    Report::from_cached(&filtered.served).save(&layout.report_path())?;

    if filtered.to_run.is_empty() {
        println!("{}", "All requested submissions were served from cache.".green());
        Report::load(&layout.report_path())?.print_summary();
        return Ok(());
    }

    write_predictions(&layout, &filtered.to_run, None)?;

    let instance_ids: Vec<String> = filtered
        .to_run
        .iter()
        .map(|submission| submission.instance_id.clone())
        .collect();
    let dataset = LocalDataset::new(&config.dataset_dir, &config.dataset);
    let instances = dataset.instances(&instance_ids)?;
    write_test_instances(&layout, &instances)?;

    let harness = CommandHarness::new(config.harness.as_str());
    let runner = BatchRunner::new(
        &harness,
        &layout,
        config.dataset.as_str(),
        config.split.as_str(),
        workers,
        config.timeout,
        if config.no_chunking { None } else { Some(workers) },
    );
    let report = runner.run(&mut store, config.cache_policy, &filtered.to_run)?;

    println!();
    report.print_summary();
    println!();
    println!(
        "{} report at {}",
        "Evaluation complete;".bold(),
        layout.report_path().display().to_string().dimmed()
    );

    Ok(())
}
