//! Sequential batch execution against the evaluation harness.
//!
//! Uncached work is split into fixed-size batches, preserving request
//! order. Each batch gets a predictions artifact, one synchronous
//! harness invocation, a cache writeback, and a report fragment that is
//! folded into the run's cumulative report before the next batch
//! starts. Batches never overlap; the strictly sequential order is what
//! keeps the shared cache file and report free of concurrent mutation.

use std::fs::{self, create_dir_all};
use std::path::PathBuf;

use color_eyre::{Result, eyre::Context};
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::cache::{CachePolicy, CacheStore, CachedOutcome};
use crate::harness::{EvaluationHarness, HarnessRequest, InstanceResult, TaskInstance};
use crate::layout::{RunLayout, SUBMITTER};
use crate::report::{Report, update_run_report};
use crate::request::Submission;

/// A predictions record handed to the harness.
#[derive(Debug, Serialize)]
struct Prediction<'a> {
    instance_id: &'a str,
    model_patch: &'a str,
    model_name_or_path: &'a str,
}

/// Write the predictions artifact for the given submissions. Batch
/// indices go to the batch-scoped temp path; `None` writes the run-wide
/// copy.
#[tracing::instrument(skip(layout, submissions), fields(count = submissions.len()))]
pub fn write_predictions(
    layout: &RunLayout,
    submissions: &[Submission],
    batch_index: Option<usize>,
) -> Result<PathBuf> {
    let path = layout.predictions_path(batch_index);
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("create predictions directory {parent:?}"))?;
    }

    let predictions: Vec<Prediction> = submissions
        .iter()
        .map(|submission| Prediction {
            instance_id: &submission.instance_id,
            model_patch: &submission.patch,
            model_name_or_path: SUBMITTER,
        })
        .collect();

    fs::write(&path, serde_json::to_string_pretty(&predictions)?)
        .with_context(|| format!("write predictions {path:?}"))?;
    Ok(path)
}

/// Write the dataset slice the harness evaluates against.
pub fn write_test_instances(layout: &RunLayout, instances: &[TaskInstance]) -> Result<()> {
    let path = layout.test_instances_path();
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("create run directory {parent:?}"))?;
    }
    fs::write(&path, serde_json::to_string_pretty(instances)?)
        .with_context(|| format!("write test instances {path:?}"))
}

/// Drives uncached work through the harness, batch by batch.
pub struct BatchRunner<'a, H> {
    harness: &'a H,
    layout: &'a RunLayout,
    dataset: String,
    split: String,
    workers: usize,
    timeout: u64,
    /// Batch size; `None` runs everything as one batch.
    chunk_size: Option<usize>,
}

impl<'a, H: EvaluationHarness> BatchRunner<'a, H> {
    pub fn new(
        harness: &'a H,
        layout: &'a RunLayout,
        dataset: impl Into<String>,
        split: impl Into<String>,
        workers: usize,
        timeout: u64,
        chunk_size: Option<usize>,
    ) -> Self {
        Self {
            harness,
            layout,
            dataset: dataset.into(),
            split: split.into(),
            workers,
            timeout,
            chunk_size,
        }
    }

    /// Run every batch to completion and return the cumulative run
    /// report. Cache writeback is skipped entirely under
    /// [`CachePolicy::Bypass`].
    #[tracing::instrument(skip(self, store, to_run), fields(pending = to_run.len()))]
    pub fn run(
        &self,
        store: &mut CacheStore,
        policy: CachePolicy,
        to_run: &[Submission],
    ) -> Result<Report> {
        let chunk_size = self.chunk_size.unwrap_or(to_run.len()).max(1);

        for (batch_index, batch) in to_run.chunks(chunk_size).enumerate() {
            println!(
                "{} batch {} ({} instance{})",
                "Running".green().bold(),
                batch_index + 1,
                batch.len(),
                if batch.len() == 1 { "" } else { "s" }
            );

            let fragment = self.run_batch(store, policy, batch, batch_index)?;
            fragment.save(&self.layout.fragment_path(batch_index))?;
            update_run_report(self.layout)?;
        }

        Report::load(&self.layout.report_path())
    }

    /// One batch: predictions, harness invocation, cache writeback, and
    /// the batch's report fragment. A harness failure fails the batch in
    /// its entirety; its instances stay uncached and unresolved, and
    /// processing continues with the next batch.
    fn run_batch(
        &self,
        store: &mut CacheStore,
        policy: CachePolicy,
        batch: &[Submission],
        batch_index: usize,
    ) -> Result<Report> {
        let predictions_path = write_predictions(self.layout, batch, Some(batch_index))?;

        let request = HarnessRequest::builder()
            .dataset(self.dataset.as_str())
            .split(self.split.as_str())
            .instance_ids(batch.iter().map(|s| s.instance_id.clone()).collect())
            .predictions_path(predictions_path)
            .workers(self.workers.min(batch.len()))
            .run_id(self.layout.run_id())
            .timeout(self.timeout)
            .build();

        let mut fragment = Report::new();

        if let Err(report) = self.harness.run(&request) {
            tracing::error!(batch = batch_index, "harness invocation failed: {report:#}");
            println!("  {} batch {} failed: {report:#}", "✗".red(), batch_index + 1);
            for submission in batch {
                fragment.fold_missing(&submission.instance_id);
            }
            return Ok(fragment);
        }

        // Pick up entries appended by earlier batches before committing
        // this one, then rewrite the whole mapping.
        if policy != CachePolicy::Bypass {
            store.refresh()?;
        }

        for submission in batch {
            match InstanceResult::read(self.layout, &submission.instance_id)? {
                None => {
                    println!(
                        "  {} {} produced no result document",
                        "✗".red(),
                        submission.instance_id.bold()
                    );
                    fragment.fold_missing(&submission.instance_id);
                }
                Some(result) => {
                    fragment.fold_result(&submission.instance_id, &result);
                    if !result.patch_successfully_applied {
                        println!(
                            "  {} {} patch did not apply",
                            "✗".red(),
                            submission.instance_id.bold()
                        );
                        continue;
                    }
                    let (pass_to_pass, fail_to_pass) = result.pass_info();
                    let outcome = CachedOutcome {
                        instance_id: submission.instance_id.clone(),
                        passed: result.resolved,
                        patch: submission.patch.clone(),
                        pass_to_pass,
                        fail_to_pass,
                        timestamp: self.layout.run_id().to_string(),
                    };
                    println!("  {outcome}");
                    if policy != CachePolicy::Bypass {
                        store.insert(outcome);
                    }
                }
            }
        }

        if policy != CachePolicy::Bypass {
            store.save()?;
        }

        Ok(fragment)
    }
}
