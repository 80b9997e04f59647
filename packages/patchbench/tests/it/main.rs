//! Integration tests for the evaluation pipeline.
//!
//! These tests drive the cache filter, batch runner, and report
//! aggregator together against a fake harness that writes deterministic
//! result documents, verifying that:
//! - fresh results are cached and replayed on resubmission
//! - harness and per-instance failures degrade per the error taxonomy
//! - cumulative reports keep counts consistent with their id sets

mod pipeline;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, create_dir_all};
use std::path::PathBuf;

use color_eyre::{Result, eyre::eyre};
use patchbench::{
    EvaluationHarness, HarnessRequest, InstanceResult, RunLayout, Submission,
};

/// Harness double: writes a preconfigured result document per instance
/// into the run's log directory, like the real harness does.
pub struct FakeHarness {
    results_root: PathBuf,
    results: BTreeMap<String, InstanceResult>,
    fail: bool,
    pub invocations: RefCell<Vec<Vec<String>>>,
}

impl FakeHarness {
    pub fn new(results_root: impl Into<PathBuf>) -> Self {
        Self {
            results_root: results_root.into(),
            results: BTreeMap::new(),
            fail: false,
            invocations: RefCell::new(Vec::new()),
        }
    }

    pub fn with_result(mut self, instance_id: &str, result: InstanceResult) -> Self {
        self.results.insert(instance_id.to_string(), result);
        self
    }

    /// Every invocation errors, as if the harness process crashed.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl EvaluationHarness for FakeHarness {
    fn run(&self, request: &HarnessRequest) -> Result<()> {
        self.invocations
            .borrow_mut()
            .push(request.instance_ids.clone());

        if self.fail {
            return Err(eyre!("harness crashed"));
        }

        let layout = RunLayout::new(&self.results_root, request.run_id.as_str());
        for instance_id in &request.instance_ids {
            // Instances without a configured result get no document at
            // all, like a harness that timed out on them.
            let Some(result) = self.results.get(instance_id) else {
                continue;
            };
            let dir = layout.log_dir(instance_id);
            create_dir_all(&dir)?;
            fs::write(dir.join("run_instance.log"), "harness output\n")?;

            let mut document = serde_json::Map::new();
            document.insert(instance_id.clone(), serde_json::to_value(result)?);
            fs::write(
                layout.instance_report(instance_id),
                serde_json::to_string_pretty(&document)?,
            )?;
        }
        Ok(())
    }
}

pub fn submission(instance_id: &str, patch: &str) -> Submission {
    Submission {
        instance_id: instance_id.to_string(),
        patch: patch.to_string(),
    }
}

pub fn resolved() -> InstanceResult {
    InstanceResult {
        patch_successfully_applied: true,
        resolved: true,
        tests_status: None,
    }
}

pub fn unresolved() -> InstanceResult {
    InstanceResult {
        patch_successfully_applied: true,
        resolved: false,
        tests_status: None,
    }
}

pub fn unapplied() -> InstanceResult {
    InstanceResult {
        patch_successfully_applied: false,
        resolved: false,
        tests_status: None,
    }
}
