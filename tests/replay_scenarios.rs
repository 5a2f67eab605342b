//! End-to-end replays of saved trace stores through the profiler.

mod common;

use std::path::Path;

use critpath::{profile_store, EventKind, ReplayConfig, ReplayError, TraceStore};

fn profile(builder: &critpath::TraceBuilder) -> (critpath::ReplaySummary, critpath::ProfileReport) {
    let (_dir, path) = common::save(builder);
    let store = TraceStore::open(&path).expect("Failed to open saved trace");
    profile_store(&store, ReplayConfig::default()).expect("Failed to profile trace")
}

fn returns_in_profile(report: &critpath::ProfileReport) -> u64 {
    report.call_sites.iter().map(|s| s.profile.count).sum()
}

#[test]
fn test_sequential_trace_span_equals_work() {
    let (summary, report) = profile(&common::sequential());

    assert_eq!(report.totals.work, 15);
    assert_eq!(report.totals.span, 15);
    assert_eq!(report.parallelism, Some(1.0));
    assert_eq!(summary.events_of(EventKind::Call), 2);
    assert_eq!(summary.events_of(EventKind::NewThread), 0);

    let a = &report.call_sites[0];
    assert_eq!(a.signature, "void a()");
    assert_eq!(a.file, "seq.c");
    assert_eq!((a.profile.work, a.profile.span), (15, 15));
    assert_eq!(a.profile.local_work, 5);
    let b = &report.call_sites[1];
    assert_eq!((b.profile.work, b.profile.span), (10, 10));
}

#[test]
fn test_longest_child_sets_span() {
    let (summary, report) = profile(&common::fork_longest_child());

    assert_eq!(summary.events_of(EventKind::NewThread), 1);
    assert_eq!(summary.events_of(EventKind::ThreadEnd), 2);
    assert_eq!(report.totals.work, 25);
    assert_eq!(report.totals.span, 20);
    assert_eq!(report.parallelism, Some(1.25));
}

#[test]
fn test_fork_join_pool_bounds() {
    let (summary, report) = profile(&common::fork_join_pool());

    assert_eq!(summary.threads, 3);
    assert_eq!(summary.events_of(EventKind::Join), 2);
    assert_eq!(summary.events_of(EventKind::Access), 6);
    assert_eq!(summary.variables, 1);

    // main runs 40, the workers 18 and 26.
    assert_eq!(report.totals.work, 84);
    // main's own 40 units beat the longest child path, 4 + 26.
    assert_eq!(report.totals.span, 40);
    assert_eq!(report.parallelism, Some(2.1));

    let step = report
        .call_sites
        .iter()
        .find(|s| s.signature == "void step(int)")
        .unwrap();
    assert_eq!(step.profile.count, 4);
}

#[test]
fn test_grandchild_path_reaches_root() {
    let (summary, report) = profile(&common::grandchild());

    assert_eq!(summary.events_of(EventKind::NewThread), 2);
    // 50 + 40 + 70
    assert_eq!(report.totals.work, 160);
    // Fork at 10, the worker's own fork at 10 more, then the leaf's 70.
    assert_eq!(report.totals.span, 90);

    let leaf = report
        .call_sites
        .iter()
        .find(|s| s.signature == "void *leaf(void *)")
        .unwrap();
    assert_eq!((leaf.profile.work, leaf.profile.span), (70, 70));
}

#[test]
fn test_child_scheduled_after_parent_keeps_its_calls() {
    let (summary, report) = profile(&common::parent_runs_first());

    assert_eq!(summary.late_instructions, 0);
    assert_eq!(summary.deferred_instructions, 1);
    assert_eq!(summary.events_of(EventKind::Call), 3);

    let step = report
        .call_sites
        .iter()
        .find(|s| s.signature == "void step(void)")
        .unwrap();
    assert_eq!((step.profile.count, step.profile.work), (1, 4));
    let worker = report
        .call_sites
        .iter()
        .find(|s| s.signature == "void *worker(void *)")
        .unwrap();
    assert_eq!(worker.profile.work, 18);
    assert_eq!(report.totals.work, 48);
}

#[test]
fn test_every_return_is_counted_once() {
    for builder in [
        common::sequential(),
        common::fork_longest_child(),
        common::fork_join_pool(),
        common::grandchild(),
        common::parent_runs_first(),
        common::locks(),
    ] {
        let (summary, report) = profile(&builder);
        assert_eq!(summary.events_of(EventKind::Return), returns_in_profile(&report));
        assert!(report.totals.work >= report.totals.span);
    }
}

#[test]
fn test_dangling_records_are_skipped() {
    let (summary, report) = profile(&common::dangling());

    assert_eq!(summary.skipped_accesses, 1);
    assert_eq!(summary.skipped_instructions, 1);
    assert_eq!(summary.dangling_total, 2);
    assert_eq!(summary.events_of(EventKind::Access), 1);
    assert_eq!(report.totals.work, 10);
    assert_eq!(report.totals.span, 10);
}

#[test]
fn test_strict_mode_fails_on_dangling() {
    let (_dir, path) = common::save(&common::dangling());
    let store = TraceStore::open(&path).unwrap();
    let config = ReplayConfig {
        strict: true,
        ..Default::default()
    };

    let err = profile_store(&store, config).unwrap_err();
    assert!(matches!(err, ReplayError::DanglingReference { .. }));
}

#[test]
fn test_lock_span_adds_up_over_pairs() {
    let (summary, report) = profile(&common::locks());

    assert_eq!(summary.locks, 1);
    assert_eq!(summary.events_of(EventKind::Acquire), 2);
    assert_eq!(summary.events_of(EventKind::Release), 2);
    assert_eq!(report.totals.lock_span, 5);
    assert_eq!(report.totals.lock_work, 5);
}

#[test]
fn test_zero_span_has_no_parallelism() {
    let (_, report) = profile(&common::zero_span());

    assert_eq!(report.totals.span, 0);
    assert_eq!(report.parallelism, None);
    assert!(matches!(
        report.totals.parallelism(),
        Err(ReplayError::DegenerateSpan)
    ));
}

#[test]
fn test_missing_store_is_a_load_failure() {
    let err = TraceStore::open(Path::new("/nonexistent/trace.db")).unwrap_err();
    assert!(matches!(err, ReplayError::TraceLoadFailure { .. }));
}
