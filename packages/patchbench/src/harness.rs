//! The external evaluation harness and dataset, behind capability traits.
//!
//! The harness is an opaque collaborator: given a dataset, a predictions
//! artifact, and a set of instance ids, it builds isolated environments,
//! applies each patch, runs the target test suites, and writes one log
//! folder plus a `report.json` result document per instance under the
//! run's log directory. This module defines that contract and a
//! subprocess-backed implementation; it never interprets harness
//! internals beyond locating the output documents.

use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::process::Command;

use bon::Builder;
use color_eyre::{
    Result, Section, SectionExt,
    eyre::{Context, eyre},
};
use serde::{Deserialize, Serialize};

use crate::layout::RunLayout;

/// One invocation of the evaluation harness.
#[derive(Debug, Clone, Builder)]
#[non_exhaustive]
pub struct HarnessRequest {
    /// Benchmark dataset name, e.g. `SWE-bench` or `SWE-bench_Lite`.
    #[builder(into)]
    pub dataset: String,

    /// Dataset split to evaluate against.
    #[builder(into)]
    pub split: String,

    /// The instance ids in this batch.
    pub instance_ids: Vec<String>,

    /// Path to the predictions artifact for this batch.
    #[builder(into)]
    pub predictions_path: PathBuf,

    /// Worker count forwarded to the harness.
    pub workers: usize,

    /// Run identifier; the harness keys its log directory by it.
    #[builder(into)]
    pub run_id: String,

    /// Per-batch wall-clock budget, in seconds. Exceeding it is the
    /// harness's failure to report, surfaced as missing result documents.
    pub timeout: u64,
}

/// Capability seam over the external harness, so the batch pipeline can
/// be driven by a deterministic fake in tests.
pub trait EvaluationHarness {
    /// Run one batch to completion. An `Err` fails the batch in its
    /// entirety; partial progress inside the harness is not recovered
    /// at this layer.
    fn run(&self, request: &HarnessRequest) -> Result<()>;
}

/// Harness invoked as an external program, synchronously.
#[derive(Debug, Clone)]
pub struct CommandHarness {
    program: String,
}

impl CommandHarness {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl EvaluationHarness for CommandHarness {
    #[tracing::instrument(skip(request), fields(run_id = %request.run_id, batch = request.instance_ids.len()))]
    fn run(&self, request: &HarnessRequest) -> Result<()> {
        Command::new(&self.program)
            .arg("--dataset_name")
            .arg(&request.dataset)
            .arg("--split")
            .arg(&request.split)
            .arg("--predictions_path")
            .arg(&request.predictions_path)
            .arg("--max_workers")
            .arg(request.workers.to_string())
            .arg("--run_id")
            .arg(&request.run_id)
            .arg("--timeout")
            .arg(request.timeout.to_string())
            .arg("--instance_ids")
            .args(&request.instance_ids)
            .output()
            .with_context(|| format!("run harness {:?}", self.program))
            .and_then(|output| {
                if output.status.success() {
                    Ok(())
                } else {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(eyre!("harness {:?} failed for run {}", self.program, request.run_id))
                        .section(stdout.to_string().header("Stdout:"))
                        .section(stderr.to_string().header("Stderr:"))
                }
            })
    }
}

/// Per-instance result document the harness writes under
/// `log/{instance_id}/report.json`, keyed by instance id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceResult {
    /// False when the patch could not be applied; such instances never
    /// reach a verdict and are excluded from cache writeback.
    #[serde(default)]
    pub patch_successfully_applied: bool,

    /// The harness verdict: did the target tests pass?
    #[serde(default)]
    pub resolved: bool,

    /// Per-group test status breakdown, absent when the harness did not
    /// get far enough to produce one.
    #[serde(default)]
    pub tests_status: Option<TestsStatus>,
}

impl InstanceResult {
    /// Read the result document for one instance from the run layout.
    /// Returns `Ok(None)` when the harness produced no document, which
    /// the caller accounts as an incomplete instance.
    pub fn read(layout: &RunLayout, instance_id: &str) -> Result<Option<Self>> {
        let path = layout.instance_report(instance_id);
        if !path.exists() {
            return Ok(None);
        }
        let content =
            read_to_string(&path).with_context(|| format!("read result document {path:?}"))?;
        let mut documents: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&content)
                .with_context(|| format!("parse result document {path:?}"))?;
        let result = documents
            .remove(instance_id)
            .map(serde_json::from_value)
            .transpose()
            .with_context(|| format!("parse result for {instance_id} in {path:?}"))?;
        Ok(result)
    }

    /// Render the `"successes / total"` pair for both test groups, or
    /// `"0 / 0"` for each when the breakdown is absent.
    pub fn pass_info(&self) -> (String, String) {
        match &self.tests_status {
            Some(status) => (status.pass_to_pass.ratio(), status.fail_to_pass.ratio()),
            None => ("0 / 0".to_string(), "0 / 0".to_string()),
        }
    }
}

/// Test outcomes grouped by expectation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsStatus {
    /// Tests expected to keep passing after the patch.
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: TestGroup,

    /// Tests expected to flip from failing to passing.
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: TestGroup,
}

/// Names of tests that succeeded and failed within one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestGroup {
    #[serde(default)]
    pub success: Vec<String>,

    #[serde(default)]
    pub failure: Vec<String>,
}

impl TestGroup {
    /// Partial-credit ratio rendered as `"successes / total"`.
    pub fn ratio(&self) -> String {
        format!("{} / {}", self.success.len(), self.success.len() + self.failure.len())
    }
}

/// A single benchmark task instance, as stored in the dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskInstance {
    pub repo: String,
    pub instance_id: String,
    pub base_commit: String,
    pub patch: String,
    pub test_patch: String,
    pub problem_statement: String,
    #[serde(default)]
    pub hints_text: String,
    pub created_at: String,
    pub version: String,
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: String,
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: String,
    pub environment_setup_commit: String,
}

/// Capability seam over dataset retrieval.
pub trait DatasetProvider {
    /// The dataset instances for the given ids, in dataset order.
    /// Unknown ids are silently absent from the result.
    fn instances(&self, instance_ids: &[String]) -> Result<Vec<TaskInstance>>;
}

/// Dataset snapshot stored as a JSON array on local disk.
#[derive(Debug, Clone)]
pub struct LocalDataset {
    path: PathBuf,
}

impl LocalDataset {
    /// Snapshot at `{dataset_dir}/{dataset}.json`.
    pub fn new(dataset_dir: &Path, dataset: &str) -> Self {
        Self {
            path: dataset_dir.join(format!("{dataset}.json")),
        }
    }
}

impl DatasetProvider for LocalDataset {
    #[tracing::instrument(skip(instance_ids), fields(requested = instance_ids.len()))]
    fn instances(&self, instance_ids: &[String]) -> Result<Vec<TaskInstance>> {
        let content = read_to_string(&self.path).with_context(|| {
            format!(
                "read dataset snapshot {:?} (download the dataset split to this path first)",
                self.path
            )
        })?;
        let all: Vec<TaskInstance> = serde_json::from_str(&content)
            .with_context(|| format!("parse dataset snapshot {:?}", self.path))?;

        Ok(all
            .into_iter()
            .filter(|instance| instance_ids.contains(&instance.instance_id))
            .collect())
    }
}
