//! Work/span profiling of a replayed trace.
//!
//! # Module Organization
//!
//! - [`profile`]: Per-call-site statistics and their merge rules
//! - [`stacks`]: Function and thread accounting frames
//! - [`critical_path`]: The event-driven profiler itself

pub mod critical_path;
pub mod profile;
pub mod stacks;

pub use critical_path::{CallSiteSummary, CriticalPathProfiler, ProfileReport, WorkSpanProfile};
pub use profile::{CallSite, CallSiteProfile, CallSiteTable};
pub use stacks::{FrameStacks, FunctionFrame, ThreadFrame};
