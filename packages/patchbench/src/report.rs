//! Cumulative run reports and cross-batch merging.
//!
//! A [`Report`] carries eight counters and their paired identifier
//! sets. The invariant maintained everywhere is that each counter
//! equals the length of its paired set; every constructor and merge
//! path goes through [`Report::recount`] to enforce it.

use std::collections::BTreeSet;
use std::fs::{self, create_dir_all, read_to_string};
use std::path::Path;

use color_eyre::{Result, eyre::Context};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};

use crate::cache::CachedOutcome;
use crate::harness::InstanceResult;
use crate::layout::RunLayout;

const SCHEMA_VERSION: u32 = 2;

/// How two reports are merged. Decided explicitly at the call site, not
/// inferred inside the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// The reports cover disjoint submissions: union every id set and
    /// sum every counter. The normal multi-batch accumulation case.
    Accumulate,

    /// The reports overlap (a re-run or accidental re-submission):
    /// keep only ids both runs agree on, intersecting every id set and
    /// recomputing `unresolved_ids` as submitted minus resolved. A
    /// defensive strategy, not a supported workflow.
    Reconcile,
}

impl MergePolicy {
    /// The policy the two reports call for: `Reconcile` iff their
    /// submitted-id sets intersect.
    pub fn for_reports(a: &Report, b: &Report) -> Self {
        let submitted: BTreeSet<&String> = a.submitted_ids.iter().collect();
        if b.submitted_ids.iter().any(|id| submitted.contains(id)) {
            Self::Reconcile
        } else {
            Self::Accumulate
        }
    }
}

/// Aggregate evaluation report, in the harness's report schema
/// (schema_version 2) so harness-written fragments deserialize
/// directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub total_instances: usize,
    pub submitted_instances: usize,
    pub completed_instances: usize,
    pub resolved_instances: usize,
    pub unresolved_instances: usize,
    pub empty_patch_instances: usize,
    pub error_instances: usize,
    pub unstopped_instances: usize,
    pub completed_ids: Vec<String>,
    pub incomplete_ids: Vec<String>,
    pub empty_patch_ids: Vec<String>,
    pub submitted_ids: Vec<String>,
    pub resolved_ids: Vec<String>,
    pub unresolved_ids: Vec<String>,
    pub error_ids: Vec<String>,
    pub unstopped_containers: Vec<String>,
    pub unremoved_images: Vec<String>,
    pub schema_version: u32,
}

impl Report {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ..Self::default()
        }
    }

    /// Seed a run report from cache-served outcomes. Every served
    /// instance is submitted and completed; resolved and unresolved
    /// partition them by the cached verdict.
    pub fn from_cached(served: &[CachedOutcome]) -> Self {
        let mut report = Self::new();
        for outcome in served {
            report.submitted_ids.push(outcome.instance_id.clone());
            report.completed_ids.push(outcome.instance_id.clone());
            if outcome.passed {
                report.resolved_ids.push(outcome.instance_id.clone());
            } else {
                report.unresolved_ids.push(outcome.instance_id.clone());
            }
        }
        report.recount();
        report
    }

    /// Fold one harness result into the report. A missing result
    /// document is folded with [`Report::fold_missing`] instead.
    pub fn fold_result(&mut self, instance_id: &str, result: &InstanceResult) {
        self.submitted_ids.push(instance_id.to_string());
        if !result.patch_successfully_applied {
            // Never reached a verdict; accounted as incomplete and
            // excluded from cache writeback by the caller.
            self.incomplete_ids.push(instance_id.to_string());
        } else {
            self.completed_ids.push(instance_id.to_string());
            if result.resolved {
                self.resolved_ids.push(instance_id.to_string());
            } else {
                self.unresolved_ids.push(instance_id.to_string());
            }
        }
        self.recount();
    }

    /// Fold an instance whose result document never appeared: submitted
    /// but incomplete, and counted as an error.
    pub fn fold_missing(&mut self, instance_id: &str) {
        self.submitted_ids.push(instance_id.to_string());
        self.incomplete_ids.push(instance_id.to_string());
        self.error_ids.push(instance_id.to_string());
        self.recount();
    }

    /// Merge `other` into `self` under an explicitly chosen policy.
    pub fn merge(&mut self, other: Report, policy: MergePolicy) {
        match policy {
            MergePolicy::Accumulate => {
                self.completed_ids.extend(other.completed_ids);
                self.incomplete_ids.extend(other.incomplete_ids);
                self.empty_patch_ids.extend(other.empty_patch_ids);
                self.submitted_ids.extend(other.submitted_ids);
                self.resolved_ids.extend(other.resolved_ids);
                self.unresolved_ids.extend(other.unresolved_ids);
                self.error_ids.extend(other.error_ids);
                self.unstopped_containers.extend(other.unstopped_containers);
                self.unremoved_images.extend(other.unremoved_images);
            }
            MergePolicy::Reconcile => {
                intersect(&mut self.completed_ids, &other.completed_ids);
                intersect(&mut self.incomplete_ids, &other.incomplete_ids);
                intersect(&mut self.empty_patch_ids, &other.empty_patch_ids);
                intersect(&mut self.submitted_ids, &other.submitted_ids);
                intersect(&mut self.resolved_ids, &other.resolved_ids);
                intersect(&mut self.error_ids, &other.error_ids);
                intersect(&mut self.unstopped_containers, &other.unstopped_containers);
                intersect(&mut self.unremoved_images, &other.unremoved_images);
                // Settled ids the runs agree on; unresolved is then by
                // construction submitted minus resolved.
                let resolved: BTreeSet<&String> = self.resolved_ids.iter().collect();
                self.unresolved_ids = self
                    .submitted_ids
                    .iter()
                    .filter(|id| !resolved.contains(id))
                    .cloned()
                    .collect();
            }
        }
        self.recount();
    }

    /// Recompute every counter from its paired id set.
    pub fn recount(&mut self) {
        self.total_instances = self.submitted_ids.len();
        self.submitted_instances = self.submitted_ids.len();
        self.completed_instances = self.completed_ids.len();
        self.resolved_instances = self.resolved_ids.len();
        self.unresolved_instances = self.unresolved_ids.len();
        self.empty_patch_instances = self.empty_patch_ids.len();
        self.error_instances = self.error_ids.len();
        self.unstopped_instances = self.unstopped_containers.len();
        self.schema_version = SCHEMA_VERSION;
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content =
            read_to_string(path).with_context(|| format!("read report {path:?}"))?;
        serde_json::from_str(&content).with_context(|| format!("parse report {path:?}"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .with_context(|| format!("create report directory {parent:?}"))?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("write report {path:?}"))
    }

    /// Console summary for operators.
    pub fn print_summary(&self) {
        println!("{}", "Evaluation Report".bold().underline());
        println!("  {} {}", "Submitted:".cyan(), self.submitted_instances);
        println!("  {} {}", "Completed:".cyan(), self.completed_instances);
        println!(
            "  {} {}",
            "Resolved:".cyan(),
            self.resolved_instances.to_string().green()
        );
        println!(
            "  {} {}",
            "Unresolved:".cyan(),
            self.unresolved_instances.to_string().red()
        );
        if self.error_instances > 0 {
            println!(
                "  {} {}",
                "Errors:".cyan(),
                self.error_instances.to_string().red().bold()
            );
        }
        if self.empty_patch_instances > 0 {
            println!("  {} {}", "Empty patches:".cyan(), self.empty_patch_instances);
        }
    }
}

fn intersect(ids: &mut Vec<String>, other: &[String]) {
    let keep: BTreeSet<&String> = other.iter().collect();
    ids.retain(|id| keep.contains(id));
}

/// Fold every pending `temp/report_*.json` fragment into the run's
/// cumulative report, deleting each fragment once folded. The merge
/// policy is decided per fragment; overlapping submissions trigger the
/// defensive reconcile branch with a warning.
#[tracing::instrument(skip(layout), fields(run_id = %layout.run_id()))]
pub fn update_run_report(layout: &RunLayout) -> Result<Report> {
    let report_path = layout.report_path();
    let mut cumulative = if report_path.exists() {
        Some(Report::load(&report_path)?)
    } else {
        None
    };

    let temp_dir = layout.temp_dir();
    if temp_dir.is_dir() {
        let mut fragments = Vec::new();
        for entry in temp_dir
            .read_dir()
            .with_context(|| format!("read temp directory {temp_dir:?}"))?
        {
            let path = entry.context("read temp directory entry")?.path();
            let is_fragment = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("report_") && name.ends_with(".json"));
            if is_fragment {
                fragments.push(path);
            }
        }
        fragments.sort();

        for path in fragments {
            let fragment = Report::load(&path)?;
            cumulative = Some(match cumulative {
                None => fragment,
                Some(mut report) => {
                    let policy = MergePolicy::for_reports(&report, &fragment);
                    if policy == MergePolicy::Reconcile {
                        tracing::warn!(
                            fragment = %path.display(),
                            "fragment overlaps cumulative report; reconciling by intersection"
                        );
                    }
                    report.merge(fragment, policy);
                    report
                }
            });
            fs::remove_file(&path)
                .with_context(|| format!("remove folded fragment {path:?}"))?;
        }
    }

    let report = cumulative.unwrap_or_else(Report::new);
    report.save(&report_path)?;
    Ok(report)
}
