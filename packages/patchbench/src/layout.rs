//! On-disk layout for a single evaluation run.
//!
//! Every artifact of a run lives under `{results_root}/{run_id}/`:
//!
//! ```text
//! {results_root}/{run_id}/
//!   report.json                  cumulative run report
//!   predictions.json             all pending submissions
//!   test_instances.json          dataset slice handed to the harness
//!   temp/predictions_{i}.json    per-batch harness input
//!   temp/report_{i}.json         per-batch report fragment
//!   log/{instance_id}/           harness logs, one folder per instance
//!   log/{instance_id}/report.json  per-instance result document
//! ```

use std::path::{Path, PathBuf};

use chrono::Local;

/// Version suffix on the cache filename. Schema changes bump this; old
/// cache files are left behind rather than migrated.
pub const CACHE_VERSION: u32 = 4;

/// Submitter tag written into every predictions record.
pub const SUBMITTER: &str = "patchbench";

/// Resolves every run-scoped path for a given results root and run id.
#[derive(Debug, Clone)]
pub struct RunLayout {
    results_root: PathBuf,
    run_id: String,
}

impl RunLayout {
    pub fn new(results_root: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            results_root: results_root.into(),
            run_id: run_id.into(),
        }
    }

    /// Layout for a fresh run identified by the current local time.
    pub fn for_now(results_root: impl Into<PathBuf>) -> Self {
        Self::new(results_root, Local::now().format("%m-%d-%H-%M-%S").to_string())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    /// Layout for the same results root but a different run id. Used to
    /// locate the log folders of the run a cache entry was recorded in.
    pub fn sibling(&self, run_id: &str) -> Self {
        Self::new(&self.results_root, run_id)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.results_root.join(&self.run_id)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.run_dir().join("temp")
    }

    pub fn log_dir(&self, instance_id: &str) -> PathBuf {
        self.run_dir().join("log").join(instance_id)
    }

    /// The per-instance result document the harness writes on completion.
    pub fn instance_report(&self, instance_id: &str) -> PathBuf {
        self.log_dir(instance_id).join("report.json")
    }

    /// Predictions artifact path. Batch-scoped predictions go under
    /// `temp/`; the run-wide copy sits at the run root.
    pub fn predictions_path(&self, batch_index: Option<usize>) -> PathBuf {
        match batch_index {
            Some(i) => self.temp_dir().join(format!("predictions_{i}.json")),
            None => self.run_dir().join("predictions.json"),
        }
    }

    pub fn test_instances_path(&self) -> PathBuf {
        self.run_dir().join("test_instances.json")
    }

    /// Cumulative report for the run.
    pub fn report_path(&self) -> PathBuf {
        self.run_dir().join("report.json")
    }

    /// Per-batch report fragment, folded into the cumulative report and
    /// then deleted.
    pub fn fragment_path(&self, batch_index: usize) -> PathBuf {
        self.temp_dir().join(format!("report_{batch_index}.json"))
    }
}

/// Path of the versioned cache file for a dataset.
pub fn cache_path(cache_dir: &Path, dataset: &str) -> PathBuf {
    cache_dir.join(format!(
        "cache_{}_v{CACHE_VERSION}.json",
        dataset.to_lowercase()
    ))
}
