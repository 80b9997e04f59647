//! End-to-end pipeline tests: filter, batches, writeback, replay.

use patchbench::batch::BatchRunner;
use patchbench::layout::cache_path;
use patchbench::{CachePolicy, CacheStore, Report, RunLayout};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::{FakeHarness, resolved, submission, unapplied, unresolved};

fn runner<'a>(
    harness: &'a FakeHarness,
    layout: &'a RunLayout,
    chunk_size: Option<usize>,
) -> BatchRunner<'a, FakeHarness> {
    BatchRunner::new(harness, layout, "SWE-bench", "test", 4, 1_800, chunk_size)
}

#[test]
fn fresh_run_caches_results_and_reports() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let layout = RunLayout::new(&results, "02-01-10-00-00");
    let mut store = CacheStore::open(&cache_path(&dir.path().join("cache"), "SWE-bench")).unwrap();

    let harness = FakeHarness::new(&results)
        .with_result("id1", resolved())
        .with_result("id2", unresolved());
    let work = vec![submission("id1", "patchA"), submission("id2", "patchB")];

    Report::from_cached(&[]).save(&layout.report_path()).unwrap();
    let report = runner(&harness, &layout, None)
        .run(&mut store, CachePolicy::Normal, &work)
        .unwrap();

    assert_eq!(report.submitted_instances, 2);
    assert_eq!(report.completed_instances, 2);
    assert_eq!(report.resolved_ids, vec!["id1".to_string()]);
    assert_eq!(report.unresolved_ids, vec!["id2".to_string()]);

    // Both verdicts were written back under their composite keys.
    let cached = store.lookup("id1", "patchA").unwrap();
    assert!(cached.passed);
    assert_eq!(cached.timestamp, "02-01-10-00-00");
    assert!(!store.lookup("id2", "patchB").unwrap().passed);

    // Fragments were folded into the cumulative report and removed.
    assert!(!layout.fragment_path(0).exists());
}

#[test]
fn resubmission_is_served_from_cache_with_logs_replayed() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let cache_file = cache_path(&dir.path().join("cache"), "SWE-bench");
    let work = vec![submission("id1", "patchA")];

    // First run evaluates for real.
    let first = RunLayout::new(&results, "02-01-10-00-00");
    let harness = FakeHarness::new(&results).with_result("id1", resolved());
    let mut store = CacheStore::open(&cache_file).unwrap();
    Report::from_cached(&[]).save(&first.report_path()).unwrap();
    runner(&harness, &first, None)
        .run(&mut store, CachePolicy::Normal, &work)
        .unwrap();

    // Second run with the identical patch is fully served from cache.
    let second = RunLayout::new(&results, "02-02-11-00-00");
    let store = CacheStore::open(&cache_file).unwrap();
    let filtered = store.filter(&work, CachePolicy::Normal, &second).unwrap();

    assert!(filtered.to_run.is_empty());
    assert_eq!(filtered.served.len(), 1);
    assert!(second.log_dir("id1").join("run_instance.log").exists());

    let report = Report::from_cached(&filtered.served);
    assert_eq!(report.resolved_instances, 1);
    assert_eq!(report.total_instances, 1);
}

#[test]
fn changed_patch_is_not_served_from_cache() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let cache_file = cache_path(&dir.path().join("cache"), "SWE-bench");

    let first = RunLayout::new(&results, "02-01-10-00-00");
    let harness = FakeHarness::new(&results).with_result("id1", resolved());
    let mut store = CacheStore::open(&cache_file).unwrap();
    Report::from_cached(&[]).save(&first.report_path()).unwrap();
    runner(&harness, &first, None)
        .run(&mut store, CachePolicy::Normal, &vec![submission("id1", "patchA")])
        .unwrap();

    let second = RunLayout::new(&results, "02-02-11-00-00");
    let store = CacheStore::open(&cache_file).unwrap();
    let filtered = store
        .filter(&[submission("id1", "patchA-revised")], CachePolicy::Normal, &second)
        .unwrap();
    assert_eq!(filtered.to_run.len(), 1);
    assert!(filtered.served.is_empty());
}

#[test]
fn skip_unsolved_reruns_cached_failure_and_supersedes_it() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let cache_file = cache_path(&dir.path().join("cache"), "SWE-bench");
    let work = vec![submission("id1", "patchA")];

    // First run fails the instance.
    let first = RunLayout::new(&results, "02-01-10-00-00");
    let harness = FakeHarness::new(&results).with_result("id1", unresolved());
    let mut store = CacheStore::open(&cache_file).unwrap();
    Report::from_cached(&[]).save(&first.report_path()).unwrap();
    runner(&harness, &first, None)
        .run(&mut store, CachePolicy::Normal, &work)
        .unwrap();
    assert!(!store.lookup("id1", "patchA").unwrap().passed);

    // Skip-unsolved re-queues the cached failure; this time it passes,
    // and the later write supersedes the cached entry.
    let second = RunLayout::new(&results, "02-02-11-00-00");
    let harness = FakeHarness::new(&results).with_result("id1", resolved());
    let mut store = CacheStore::open(&cache_file).unwrap();
    let filtered = store.filter(&work, CachePolicy::SkipUnsolved, &second).unwrap();
    assert_eq!(filtered.to_run, work);

    Report::from_cached(&filtered.served).save(&second.report_path()).unwrap();
    runner(&harness, &second, None)
        .run(&mut store, CachePolicy::SkipUnsolved, &filtered.to_run)
        .unwrap();

    let cached = store.lookup("id1", "patchA").unwrap();
    assert!(cached.passed);
    assert_eq!(cached.timestamp, "02-02-11-00-00");
}

#[test]
fn bypass_never_touches_the_cache() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let cache_file = cache_path(&dir.path().join("cache"), "SWE-bench");
    let layout = RunLayout::new(&results, "02-01-10-00-00");

    let harness = FakeHarness::new(&results).with_result("id1", resolved());
    let mut store = CacheStore::open(&cache_file).unwrap();
    Report::from_cached(&[]).save(&layout.report_path()).unwrap();
    let report = runner(&harness, &layout, None)
        .run(&mut store, CachePolicy::Bypass, &vec![submission("id1", "patchA")])
        .unwrap();

    assert_eq!(report.resolved_instances, 1);
    let reopened = CacheStore::open(&cache_file).unwrap();
    assert!(reopened.is_empty());
}

#[test]
fn unapplied_patch_is_reported_incomplete_and_not_cached() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let layout = RunLayout::new(&results, "02-01-10-00-00");
    let mut store = CacheStore::open(&cache_path(&dir.path().join("cache"), "SWE-bench")).unwrap();

    let harness = FakeHarness::new(&results).with_result("id1", unapplied());
    Report::from_cached(&[]).save(&layout.report_path()).unwrap();
    let report = runner(&harness, &layout, None)
        .run(&mut store, CachePolicy::Normal, &vec![submission("id1", "patchA")])
        .unwrap();

    assert_eq!(report.incomplete_ids, vec!["id1".to_string()]);
    assert!(report.completed_ids.is_empty());
    assert!(store.lookup("id1", "patchA").is_none());
}

#[test]
fn harness_failure_fails_the_whole_batch_but_not_the_run() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let layout = RunLayout::new(&results, "02-01-10-00-00");
    let mut store = CacheStore::open(&cache_path(&dir.path().join("cache"), "SWE-bench")).unwrap();

    let harness = FakeHarness::new(&results).failing();
    let work = vec![submission("id1", "patchA"), submission("id2", "patchB")];
    Report::from_cached(&[]).save(&layout.report_path()).unwrap();
    let report = runner(&harness, &layout, None)
        .run(&mut store, CachePolicy::Normal, &work)
        .unwrap();

    assert_eq!(report.error_ids, vec!["id1".to_string(), "id2".to_string()]);
    assert_eq!(report.incomplete_ids.len(), 2);
    assert!(report.completed_ids.is_empty());
    assert!(store.lookup("id1", "patchA").is_none());
}

#[test]
fn missing_result_document_isolates_that_instance() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let layout = RunLayout::new(&results, "02-01-10-00-00");
    let mut store = CacheStore::open(&cache_path(&dir.path().join("cache"), "SWE-bench")).unwrap();

    // id2 has no configured result: the harness writes no document.
    let harness = FakeHarness::new(&results).with_result("id1", resolved());
    let work = vec![submission("id1", "patchA"), submission("id2", "patchB")];
    Report::from_cached(&[]).save(&layout.report_path()).unwrap();
    let report = runner(&harness, &layout, None)
        .run(&mut store, CachePolicy::Normal, &work)
        .unwrap();

    assert_eq!(report.resolved_ids, vec!["id1".to_string()]);
    assert_eq!(report.error_ids, vec!["id2".to_string()]);
    assert!(store.lookup("id1", "patchA").is_some());
    assert!(store.lookup("id2", "patchB").is_none());
}

#[test]
fn work_is_chunked_in_request_order() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results");
    let layout = RunLayout::new(&results, "02-01-10-00-00");
    let mut store = CacheStore::open(&cache_path(&dir.path().join("cache"), "SWE-bench")).unwrap();

    let harness = FakeHarness::new(&results)
        .with_result("id1", resolved())
        .with_result("id2", resolved())
        .with_result("id3", unresolved());
    let work = vec![
        submission("id1", "patchA"),
        submission("id2", "patchB"),
        submission("id3", "patchC"),
    ];
    Report::from_cached(&[]).save(&layout.report_path()).unwrap();
    let report = runner(&harness, &layout, Some(2))
        .run(&mut store, CachePolicy::Normal, &work)
        .unwrap();

    let invocations = harness.invocations.borrow();
    assert_eq!(
        *invocations,
        vec![
            vec!["id1".to_string(), "id2".to_string()],
            vec!["id3".to_string()],
        ]
    );
    assert_eq!(report.submitted_instances, 3);
    assert_eq!(report.resolved_instances, 2);
}
