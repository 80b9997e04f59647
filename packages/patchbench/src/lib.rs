//! Cached batch evaluation of code-patch submissions.
//!
//! Patchbench orchestrates evaluation runs of candidate patches against
//! a benchmark dataset, delegating the actual test execution (isolated
//! environments, patch application, scoring) to an external harness.
//! What lives here is the part worth keeping between runs:
//!
//! - A disk-backed [`cache::CacheStore`] keyed by
//!   `{instance_id}-{sha256(patch)}`, so an identical patch is never
//!   evaluated twice. Cache-served instances replay their recorded log
//!   folders into the current run, making cached and fresh results
//!   indistinguishable downstream.
//! - A [`batch::BatchRunner`] that feeds uncached work to the harness
//!   in strictly sequential batches.
//! - A [`report::Report`] aggregator that folds per-instance results
//!   and per-batch fragments into one cumulative report with counts
//!   that always match their identifier sets.
//!
//! The harness and the dataset are capability traits
//! ([`harness::EvaluationHarness`], [`harness::DatasetProvider`]), so
//! the whole pipeline runs under test with deterministic fakes.

pub use crate::cache::{CacheError, CachePolicy, CacheStore, CachedOutcome, FilterOutcome};
pub use crate::harness::{
    CommandHarness, DatasetProvider, EvaluationHarness, HarnessRequest, InstanceResult,
    LocalDataset, TaskInstance,
};
pub use crate::layout::RunLayout;
pub use crate::report::{MergePolicy, Report};
pub use crate::request::Submission;

pub mod batch;
pub mod cache;
pub mod digest;
pub mod harness;
pub mod layout;
pub mod report;
pub mod request;
