//! Trace fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use critpath::trace::{AccessKind, InstructionKind, ReferenceId, SegmentId, StorageClass};
use critpath::TraceBuilder;
use tempfile::TempDir;

/// Save `builder` as `trace.db` in a fresh temp dir. The dir must outlive the path.
pub fn save(builder: &TraceBuilder) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("trace.db");
    builder.save(&path).expect("Failed to save trace");
    (dir, path)
}

/// A calls B at 0, B returns at 10, A returns at 15. Single thread.
pub fn sequential() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/seq.c");
    let a_fn = b.function("void a()", file);
    let b_fn = b.function("void b()", file);
    let t = b.thread(0, 15, None);
    let a = b.entry_call(t, a_fn, 0, 15);
    let inner = b.call(a, b_fn, 0, 10);
    b.ret(inner);
    b.ret(a);
    b
}

/// Main forks a worker at 0. The worker runs 20 units, main only 5.
pub fn fork_longest_child() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/fork.c");
    let main_fn = b.function("int main()", file);
    let worker_fn = b.function("void *worker(void *)", file);
    let t1 = b.thread(0, 5, None);
    let t2 = b.thread(0, 20, Some(t1));
    let main = b.entry_call(t1, main_fn, 0, 5);
    b.fork(main, t2);
    let worker = b.entry_call(t2, worker_fn, 0, 20);
    b.ret(worker);
    b.ret(main);
    b
}

/// Two workers forked from main, each doing a loop of calls, then joined.
pub fn fork_join_pool() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/pool.c");
    let main_fn = b.function("int main()", file);
    let worker_fn = b.function("void *worker(void *)", file);
    let step_fn = b.function("void step(int)", file);
    let counter = b.reference("counter", StorageClass::Global);

    let t1 = b.thread(0, 40, None);
    let t2 = b.thread(2, 20, Some(t1));
    let t3 = b.thread(4, 30, Some(t1));
    let main = b.entry_call(t1, main_fn, 0, 40);

    b.fork(main, t2);
    let w1 = b.entry_call(t2, worker_fn, 2, 20);
    for i in 0..3 {
        let step = b.call(w1, step_fn, 3 + i * 5, 7 + i * 5);
        b.access(step, &[(counter, AccessKind::Read), (counter, AccessKind::Write)]);
        b.ret(step);
    }
    b.ret(w1);

    b.fork(main, t3);
    let w2 = b.entry_call(t3, worker_fn, 4, 30);
    let step = b.call(w2, step_fn, 5, 25);
    b.ret(step);
    b.ret(w2);

    b.join(main, t2);
    b.join(main, t3);
    b.ret(main);
    b
}

/// One access names a reference that does not exist, and one instruction
/// points at a segment that does not exist.
pub fn dangling() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/dangling.c");
    let f = b.function("void f()", file);
    let ok = b.reference("ok", StorageClass::Local);
    let t = b.thread(0, 10, None);
    let main = b.entry_call(t, f, 0, 10);
    b.access(
        main,
        &[(ReferenceId(404), AccessKind::Read), (ok, AccessKind::Write)],
    );
    b.raw_instruction(SegmentId(999), InstructionKind::Access);
    b.ret(main);
    b
}

/// The lock is held over [1, 4) and [6, 8).
pub fn locks() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/lock.c");
    let f = b.function("void f()", file);
    let mutex = b.reference("mutex", StorageClass::Global);
    let t = b.thread(0, 10, None);
    let main = b.entry_call(t, f, 0, 10);
    b.acquire(main, mutex, Some(1));
    b.release(main, mutex, Some(4));
    b.acquire(main, mutex, Some(6));
    b.release(main, mutex, Some(8));
    b.ret(main);
    b
}

/// A single call that starts and ends at the same instant.
pub fn zero_span() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/empty.c");
    let f = b.function("void f()", file);
    let t = b.thread(3, 3, None);
    let main = b.entry_call(t, f, 3, 3);
    b.ret(main);
    b
}

/// Main (0..50) forks a worker at 10; the worker (10..50) forks a leaf at 20
/// that runs until 90.
pub fn grandchild() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/nested.c");
    let main_fn = b.function("int main()", file);
    let worker_fn = b.function("void *worker(void *)", file);
    let leaf_fn = b.function("void *leaf(void *)", file);
    let t1 = b.thread(0, 50, None);
    let t2 = b.thread(10, 50, Some(t1));
    let t3 = b.thread(20, 90, Some(t2));
    let main = b.entry_call(t1, main_fn, 0, 50);
    b.fork(main, t2);
    let worker = b.entry_call(t2, worker_fn, 10, 50);
    b.fork(worker, t3);
    let leaf = b.entry_call(t3, leaf_fn, 20, 90);
    b.ret(leaf);
    b.ret(worker);
    b.ret(main);
    b
}

/// Main forks a worker, then touches memory before the worker is first
/// scheduled. The worker calls `step` once.
pub fn parent_runs_first() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/sched.c");
    let main_fn = b.function("int main()", file);
    let worker_fn = b.function("void *worker(void *)", file);
    let step_fn = b.function("void step(void)", file);
    let shared = b.reference("shared", StorageClass::Global);
    let t1 = b.thread(0, 30, None);
    let t2 = b.thread(2, 20, Some(t1));
    let main = b.entry_call(t1, main_fn, 0, 30);
    b.fork(main, t2);
    b.access(main, &[(shared, AccessKind::Write)]);
    let worker = b.entry_call(t2, worker_fn, 2, 20);
    let step = b.call(worker, step_fn, 4, 8);
    b.ret(step);
    b.ret(worker);
    b.join(main, t2);
    b.ret(main);
    b
}

/// The entry call never returns.
pub fn unterminated() -> TraceBuilder {
    let mut b = TraceBuilder::new();
    let file = b.file("/src/open.c");
    let f = b.function("void f()", file);
    let x = b.reference("x", StorageClass::Local);
    let t = b.thread(0, 10, None);
    let main = b.entry_call(t, f, 0, 10);
    b.access(main, &[(x, AccessKind::Read)]);
    b
}
