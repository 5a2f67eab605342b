//! critpath library - work/span profiling of recorded multithreaded traces.
//!
//! A trace store is replayed instruction by instruction; the interpreter turns
//! it into a stream of call, return, fork, join, thread-end, lock and access
//! events, and the critical-path profiler folds that stream into the trace's
//! work, span, parallelism and per-call-site profiles.
//!
//! # Modules
//!
//! - [`store`] - Loading (and writing) SQLite trace stores
//! - [`interpreter`] - Reconstructing the event stream from trace rows
//! - [`bus`] - Synchronous publish/subscribe of events
//! - [`profiler`] - Work/span accounting
//! - [`report`] - Table, CSV and JSON output
//!
//! # Example
//!
//! ```no_run
//! use critpath::{profile_store, ReplayConfig, TraceStore};
//! use std::path::Path;
//!
//! let store = TraceStore::open(Path::new("./trace.db")).expect("Failed to load trace");
//! let (_summary, report) =
//!     profile_store(&store, ReplayConfig::default()).expect("Failed to profile trace");
//! println!("work {} span {}", report.totals.work, report.totals.span);
//! ```

use std::cell::RefCell;
use std::rc::Rc;

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod interpreter;
pub mod profiler;
pub mod report;
pub mod shadow;
pub mod store;
pub mod trace;

// Re-export for convenience
pub use bus::{EventBus, Subscriber};
pub use config::ReplayConfig;
pub use error::{Entity, ReplayError};
pub use events::{Event, EventKind, EventMask};
pub use interpreter::{ReplaySummary, TraceInterpreter};
pub use profiler::{CriticalPathProfiler, ProfileReport, WorkSpanProfile};
pub use store::{TraceBuilder, TraceStore, TraceWriter};

/// Replay `store` through a fresh [`CriticalPathProfiler`] and finalize it.
pub fn profile_store(
    store: &TraceStore,
    config: ReplayConfig,
) -> Result<(ReplaySummary, ProfileReport), ReplayError> {
    let profiler = Rc::new(RefCell::new(CriticalPathProfiler::new()));

    let mut interpreter = TraceInterpreter::new(store, config);
    interpreter.subscribe(profiler.clone(), EventMask::ALL);
    let summary = interpreter.run()?;

    let report = profiler.borrow_mut().finish()?;
    Ok((summary, report))
}
