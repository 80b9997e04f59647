//! Disk-backed cache of already-evaluated (instance, patch) pairs.
//!
//! The cache maps `{instance_id}-{sha256(patch)}` to the recorded
//! outcome of a prior evaluation, so a resubmitted identical patch can
//! be served from cache instead of re-running the harness. The store is
//! an explicit handle threaded through the pipeline: `open`, `refresh`,
//! and `save` are its only I/O boundary.
//!
//! Concurrent processes writing the same cache file are unsafe; the
//! store is re-read before each writeback commit to narrow (not close)
//! the lost-update window.

use std::collections::BTreeMap;
use std::fs::{self, create_dir_all, read_to_string};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use color_eyre::{Result, eyre::Context};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::digest::cache_key;
use crate::layout::RunLayout;
use crate::request::Submission;

/// Cache failure classes that callers must tell apart from generic I/O.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache file exists but does not parse. Never auto-repaired;
    /// the operator removes or migrates the file.
    #[error("cache file {path:?} is corrupt; remove it or bump the cache version")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A cache entry references a log folder that no longer exists. The
    /// cache and the log store have diverged; fatal for the run.
    #[error("cached logs for {instance_id} missing at {path:?}")]
    MissingLogs { instance_id: String, path: PathBuf },
}

/// How the cache participates in a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Serve any pair whose key is present, regardless of verdict.
    Normal,

    /// Neither consult nor update the cache; force a full re-run.
    Bypass,

    /// Serve only pairs whose cached verdict passed; cached failures
    /// are re-queued as not yet solved.
    SkipUnsolved,
}

serde_plain::derive_display_from_serialize!(CachePolicy);

/// The recorded outcome of one evaluated (instance, patch) pair.
/// Immutable once written for a given key; a later write to the same
/// key supersedes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedOutcome {
    pub instance_id: String,

    /// Harness verdict: did the patch resolve the instance?
    pub passed: bool,

    /// The exact patch text that was evaluated.
    pub patch: String,

    /// `"successes / total"` for tests expected to keep passing.
    pub pass_to_pass: String,

    /// `"successes / total"` for tests expected to flip to passing.
    pub fail_to_pass: String,

    /// Run id of the evaluation that produced this outcome; locates its
    /// log folder for replay.
    pub timestamp: String,
}

impl std::fmt::Display for CachedOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.passed {
            write!(f, "{} {} passed", "✓".green(), self.instance_id.bold())
        } else {
            write!(
                f,
                "{} {} failed  {} {}  {} {}",
                "✗".red(),
                self.instance_id.bold(),
                "pass_to_pass:".dimmed(),
                self.pass_to_pass,
                "fail_to_pass:".dimmed(),
                self.fail_to_pass,
            )
        }
    }
}

/// Persisted file shape: a single `instances` mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheFile {
    instances: BTreeMap<String, CachedOutcome>,
}

/// Result of partitioning requested work against the cache.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Pairs that must go to the harness, in request order.
    pub to_run: Vec<Submission>,

    /// Outcomes served from cache, with their logs replayed into the
    /// current run.
    pub served: Vec<CachedOutcome>,
}

/// Handle on the persisted cache mapping.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    file: CacheFile,
}

impl CacheStore {
    /// Load the store from disk. A missing file is soft: an empty store
    /// is created and persisted. A present-but-unparseable file is
    /// [`CacheError::Corrupt`].
    #[tracing::instrument]
    pub fn open(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            Self::parse(path)?
        } else {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)
                    .with_context(|| format!("create cache directory {parent:?}"))?;
            }
            let file = CacheFile::default();
            fs::write(path, serde_json::to_string(&file)?)
                .with_context(|| format!("write empty cache file {path:?}"))?;
            file
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn parse(path: &Path) -> Result<CacheFile> {
        let content =
            read_to_string(path).with_context(|| format!("read cache file {path:?}"))?;
        serde_json::from_str(&content)
            .map_err(|source| {
                CacheError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }
                .into()
            })
    }

    /// Re-read the mapping from disk, dropping unsaved in-memory writes.
    /// Called before each batch writeback is committed, so results
    /// appended by a prior batch are not clobbered on save.
    pub fn refresh(&mut self) -> Result<()> {
        self.file = Self::parse(&self.path)?;
        Ok(())
    }

    /// Persist the full mapping, overwriting prior content.
    #[tracing::instrument(skip(self), fields(entries = self.file.instances.len()))]
    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, serde_json::to_string(&self.file)?)
            .with_context(|| format!("write cache file {:?}", self.path))
    }

    pub fn lookup(&self, instance_id: &str, patch: &str) -> Option<&CachedOutcome> {
        self.file.instances.get(&cache_key(instance_id, patch))
    }

    /// Upsert by composite key.
    pub fn insert(&mut self, outcome: CachedOutcome) {
        let key = cache_key(&outcome.instance_id, &outcome.patch);
        self.file.instances.insert(key, outcome);
    }

    pub fn len(&self) -> usize {
        self.file.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.instances.is_empty()
    }

    /// Partition requested pairs into uncached work and cache-served
    /// outcomes, replaying the logs of every served entry into the
    /// current run's log folder.
    #[tracing::instrument(skip(self, requested, layout), fields(requested = requested.len(), %policy))]
    pub fn filter(
        &self,
        requested: &[Submission],
        policy: CachePolicy,
        layout: &RunLayout,
    ) -> Result<FilterOutcome> {
        if policy == CachePolicy::Bypass {
            return Ok(FilterOutcome {
                to_run: requested.to_vec(),
                served: Vec::new(),
            });
        }

        let mut outcome = FilterOutcome::default();
        for submission in requested {
            match self.lookup(&submission.instance_id, &submission.patch) {
                Some(cached) if !(policy == CachePolicy::SkipUnsolved && !cached.passed) => {
                    replay_logs(layout, cached)?;
                    outcome.served.push(cached.clone());
                }
                _ => outcome.to_run.push(submission.clone()),
            }
        }

        tracing::info!(
            served = outcome.served.len(),
            to_run = outcome.to_run.len(),
            "filtered requested work against cache"
        );
        Ok(outcome)
    }
}

/// Copy the log folder of a cached outcome's original run into the
/// current run, so downstream report assembly finds logs uniformly for
/// fresh and cached results alike. A missing source folder means the
/// cache outlived its log artifacts, which is fatal.
#[tracing::instrument(skip(layout, cached), fields(instance_id = %cached.instance_id))]
pub fn replay_logs(layout: &RunLayout, cached: &CachedOutcome) -> Result<()> {
    let source = layout.sibling(&cached.timestamp).log_dir(&cached.instance_id);
    let target = layout.log_dir(&cached.instance_id);

    if !source.is_dir() {
        return Err(CacheError::MissingLogs {
            instance_id: cached.instance_id.clone(),
            path: source,
        }
        .into());
    }

    for entry in WalkDir::new(&source) {
        let entry = entry.context("walk cached log folder")?;
        let relative = entry
            .path()
            .strip_prefix(&source)
            .context("strip log folder prefix")?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            create_dir_all(&destination)
                .with_context(|| format!("create log folder {destination:?}"))?;
        } else {
            if let Some(parent) = destination.parent() {
                create_dir_all(parent)
                    .with_context(|| format!("create log folder {parent:?}"))?;
            }
            fs::copy(entry.path(), &destination)
                .with_context(|| format!("copy cached log {:?}", entry.path()))?;
        }
    }

    Ok(())
}
