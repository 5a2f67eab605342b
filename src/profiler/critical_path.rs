//! Online work/span profiler.
//!
//! `CriticalPathProfiler` consumes the replay event stream and keeps one
//! function frame per open call and one thread frame per live thread. Every
//! boundary event (call, return, fork, thread end) closes the current strand of
//! serial execution in its thread and credits it to the frame on top.
//!
//! A forked child competes for its parent's longest-child slot when it ends,
//! carrying the parent's continuation up to the fork point. When the parent
//! ends, the longer of that child path and the parent's own continuation joins
//! the parent's prefix, which at the root is the critical path.

use std::collections::HashMap;

use log::{debug, trace};
use serde::Serialize;

use crate::bus::Subscriber;
use crate::error::{elapsed, ReplayError};
use crate::events::{CallEvent, Event, LockEvent, NewThreadEvent, ReturnEvent, ThreadEndEvent};
use crate::shadow::{LockHandle, ThreadHandle};
use crate::trace::Time;

use super::profile::{CallSite, CallSiteProfile, CallSiteTable};
use super::stacks::{FrameStacks, FunctionFrame, ThreadFrame};

/// Whole-trace totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkSpanProfile {
    pub work: Time,
    pub span: Time,
    /// Lock hold time on the critical path.
    pub lock_span: Time,
    /// Lock hold time summed over all threads.
    pub lock_work: Time,
}

impl WorkSpanProfile {
    pub fn parallelism(&self) -> Result<f64, ReplayError> {
        if self.span == 0 {
            return Err(ReplayError::DegenerateSpan);
        }
        Ok(self.work as f64 / self.span as f64)
    }
}

/// End profile of one call site.
///
/// Work-side fields count every invocation; `span`, `local_span` and
/// `top_span` only count invocations on the critical path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CallSiteSummary {
    pub call_site: CallSite,
    pub signature: String,
    pub file: String,
    pub line: u32,
    #[serde(flatten)]
    pub profile: CallSiteProfile,
}

/// Final result of a profiling pass.
#[derive(Clone, Debug, Serialize)]
pub struct ProfileReport {
    #[serde(flatten)]
    pub totals: WorkSpanProfile,
    /// None when the span is zero.
    pub parallelism: Option<f64>,
    /// Sorted by work, descending.
    pub call_sites: Vec<CallSiteSummary>,
}

#[derive(Clone, Debug)]
struct SiteInfo {
    signature: String,
    file: String,
    line: u32,
}

#[derive(Clone, Copy, Debug)]
struct LockHolder {
    function_index: usize,
    acquired_at: Option<Time>,
}

/// The critical-path profiler.
#[derive(Debug, Default)]
pub struct CriticalPathProfiler {
    stacks: FrameStacks,
    /// Every completed call, on or off the critical path.
    work_table: CallSiteTable,
    /// Number of frames currently on the stack per call site.
    active_sites: HashMap<CallSite, u32>,
    lock_holders: HashMap<LockHandle, LockHolder>,
    sites: HashMap<CallSite, SiteInfo>,
    returns_recorded: u64,
}

impl CriticalPathProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stacks(&self) -> &FrameStacks {
        &self.stacks
    }

    pub fn work_table(&self) -> &CallSiteTable {
        &self.work_table
    }

    /// Number of returns folded into the work table.
    pub fn returns_recorded(&self) -> u64 {
        self.returns_recorded
    }

    /// Finalize the root thread and produce the profile.
    ///
    /// Fails with `UnbalancedStack` while calls or non-root threads are still
    /// open. A zero span is not an error here; it shows up as a missing
    /// parallelism.
    pub fn finish(&mut self) -> Result<ProfileReport, ReplayError> {
        if !self.stacks.at_root() {
            return Err(ReplayError::UnbalancedStack {
                context: format!(
                    "profile requested with {} open call frame(s) and {} live thread(s)",
                    self.stacks.functions.len() - 1,
                    self.stacks.threads.len()
                ),
            });
        }
        self.stacks.top_thread().sync();

        let totals = self.totals();
        let parallelism = totals.parallelism().ok();
        Ok(ProfileReport {
            totals,
            parallelism,
            call_sites: self.end_profile(),
        })
    }

    /// Totals as of the last sync of the root thread.
    pub fn totals(&self) -> WorkSpanProfile {
        let root = self.stacks.root_function();
        let root_thread = self.stacks.root_thread();
        WorkSpanProfile {
            work: root.total_work(),
            span: root_thread.prefix_span,
            lock_span: root_thread.lock_span,
            lock_work: root.total_lock_span(),
        }
    }

    /// Per-call-site end profiles: work from the global work table, span from
    /// the root thread's prefix table.
    pub fn end_profile(&self) -> Vec<CallSiteSummary> {
        let mut merged: HashMap<CallSite, CallSiteProfile> = HashMap::new();

        for (site, data) in &self.work_table {
            merged.insert(
                *site,
                CallSiteProfile {
                    span: 0,
                    local_span: 0,
                    top_span: 0,
                    ..*data
                },
            );
        }
        for (site, data) in &self.stacks.root_thread().prefix_table {
            let entry = merged.entry(*site).or_default();
            entry.span += data.span;
            entry.local_span += data.local_span;
            entry.top_span += data.top_span;
        }

        let mut summaries: Vec<CallSiteSummary> = merged
            .into_iter()
            .map(|(site, profile)| {
                let info = self.sites.get(&site);
                CallSiteSummary {
                    call_site: site,
                    signature: info.map_or_else(|| site.to_string(), |i| i.signature.clone()),
                    file: info.map(|i| i.file.clone()).unwrap_or_default(),
                    line: info.map_or(0, |i| i.line),
                    profile,
                }
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.profile
                .work
                .cmp(&a.profile.work)
                .then_with(|| a.call_site.cmp(&b.call_site))
        });
        summaries
    }

    /// Check that `thread` is the innermost live thread, binding the root
    /// thread frame on first use.
    fn enter_thread(&mut self, thread: ThreadHandle) -> Result<(), ReplayError> {
        let depth = self.stacks.threads.len();
        let top = self.stacks.top_thread();
        let bound = top.thread;
        match bound {
            Some(current) if current == thread && !top.ended => Ok(()),
            // A new top-level thread after the previous one ended continues
            // the root serially.
            _ if depth == 1 && (top.thread.is_none() || top.ended) => {
                debug!("Binding root thread frame to {thread}");
                top.thread = Some(thread);
                top.ended = false;
                top.strand_start = None;
                Ok(())
            }
            current => Err(ReplayError::UnbalancedStack {
                context: format!(
                    "event for {thread} while innermost live thread is {}",
                    current.map_or_else(|| "none".to_string(), |t| t.to_string())
                ),
            }),
        }
    }

    fn on_call(&mut self, event: &CallEvent) -> Result<(), ReplayError> {
        self.enter_thread(event.thread)?;
        self.stacks.close_strand(event.start_time, "call")?;

        let site = event.function;
        self.sites.entry(site).or_insert_with(|| SiteInfo {
            signature: event.signature.clone(),
            file: event.file_name.clone(),
            line: event.line,
        });

        let active = self.active_sites.entry(site).or_insert(0);
        let is_top = *active == 0;
        *active += 1;

        self.stacks
            .functions
            .push(FunctionFrame::call(site, event.call, is_top));
        Ok(())
    }

    fn on_return(&mut self, event: &ReturnEvent) -> Result<(), ReplayError> {
        self.enter_thread(event.thread)?;
        if !self.stacks.top_thread_has_open_call() {
            return Err(ReplayError::UnbalancedStack {
                context: format!("return of {} with no open call", event.call),
            });
        }
        if self.stacks.top_function().call != Some(event.call) {
            return Err(ReplayError::UnbalancedStack {
                context: format!(
                    "return of {} while {:?} is on top",
                    event.call,
                    self.stacks.top_function().call
                ),
            });
        }
        self.stacks.close_strand(event.end_time, "return")?;

        let Some(frame) = self.stacks.functions.pop() else {
            return Err(ReplayError::UnbalancedStack {
                context: "function stack empty".to_string(),
            });
        };
        let Some(site) = frame.call_site else {
            return Err(ReplayError::UnbalancedStack {
                context: format!("return of {} hit a thread head frame", event.call),
            });
        };

        let work = frame.total_work();
        let span = frame.total_span();
        let parent = self.stacks.top_function();
        parent.running_work += work;
        parent.running_span += span;
        parent.running_lock_span += frame.total_lock_span();

        let data = CallSiteProfile::single(work, span, frame.local_work, frame.is_top);
        self.work_table.add_data(site, &data);
        self.stacks.top_thread().continuation_table.add_data(site, &data);
        self.returns_recorded += 1;

        if let Some(active) = self.active_sites.get_mut(&site) {
            *active = active.saturating_sub(1);
        }
        Ok(())
    }

    fn on_new_thread(&mut self, event: &NewThreadEvent) -> Result<(), ReplayError> {
        self.enter_thread(event.thread)?;
        self.stacks.close_strand(event.start_time, "fork")?;

        let spawner = self.stacks.top_function_index();
        let parent = self.stacks.top_thread();
        let child = ThreadFrame {
            thread: Some(event.child),
            head_function_index: spawner + 1,
            parent_function_index: Some(spawner),
            strand_start: Some(event.start_time),
            spawn_offset: parent.local_continuation,
            spawn_lock_offset: parent.local_continuation_lock,
            spawn_table: parent.continuation_table.clone(),
            ..Default::default()
        };
        trace!(
            "fork {} -> {} at {} (offset {})",
            event.thread,
            event.child,
            event.start_time,
            child.spawn_offset
        );

        self.stacks.functions.push(FunctionFrame::default());
        self.stacks.threads.push(child);
        Ok(())
    }

    fn on_thread_end(&mut self, event: &ThreadEndEvent) -> Result<(), ReplayError> {
        self.enter_thread(event.thread)?;
        if self.stacks.top_thread_has_open_call() {
            return Err(ReplayError::UnbalancedStack {
                context: format!("{} ended with open calls", event.thread_id),
            });
        }
        self.stacks.close_strand(event.end_time, "thread end")?;
        self.stacks.top_thread().sync();

        if self.stacks.threads.len() == 1 {
            self.stacks.top_thread().ended = true;
            return Ok(());
        }

        let (Some(head), Some(mut child)) =
            (self.stacks.functions.pop(), self.stacks.threads.pop())
        else {
            return Err(ReplayError::UnbalancedStack {
                context: format!("{} ended without frames", event.thread_id),
            });
        };
        let Some(spawner) = child
            .parent_function_index
            .and_then(|idx| self.stacks.functions.get_mut(idx))
        else {
            return Err(ReplayError::UnbalancedStack {
                context: format!("{} has no spawning frame", event.thread_id),
            });
        };
        spawner.running_work += head.total_work();
        spawner.running_lock_span += head.total_lock_span();

        let candidate = child.spawn_offset + child.prefix_span;
        let parent = self.stacks.top_thread();
        if candidate > parent.longest_child_span {
            trace!(
                "{} is the new longest child: {} > {}",
                event.thread,
                candidate,
                parent.longest_child_span
            );
            let mut table = child.spawn_table.take();
            table.merge_owned(child.prefix_table.take());
            parent.longest_child_span = candidate;
            parent.longest_child_lock_span = child.spawn_lock_offset + child.lock_span;
            parent.longest_child_table = table;
        }
        Ok(())
    }

    fn on_acquire(&mut self, event: &LockEvent) -> Result<(), ReplayError> {
        self.enter_thread(event.thread)?;
        let holder = LockHolder {
            function_index: self.stacks.top_function_index(),
            acquired_at: event.time,
        };
        if self.lock_holders.insert(event.lock, holder).is_some() {
            debug!("{} acquired again before release", event.lock);
        }
        Ok(())
    }

    fn on_release(&mut self, event: &LockEvent) -> Result<(), ReplayError> {
        self.enter_thread(event.thread)?;
        let Some(holder) = self.lock_holders.remove(&event.lock) else {
            debug!("Release of {} which is not held, ignoring", event.lock);
            return Ok(());
        };

        let held = match (holder.acquired_at, event.time) {
            (Some(from), Some(to)) => elapsed(from, to, "lock release")?,
            _ => 0,
        };

        // The acquiring frame may already have returned.
        let idx = if holder.function_index < self.stacks.functions.len() {
            holder.function_index
        } else {
            self.stacks.top_function_index()
        };
        self.stacks.functions[idx].local_lock_span += held;
        self.stacks.top_thread().local_continuation_lock += held;
        Ok(())
    }
}

impl Subscriber for CriticalPathProfiler {
    fn on_event(&mut self, event: &Event) -> Result<(), ReplayError> {
        match event {
            Event::Call(e) => self.on_call(e),
            Event::Return(e) => self.on_return(e),
            Event::NewThread(e) => self.on_new_thread(e),
            Event::ThreadEnd(e) => self.on_thread_end(e),
            Event::Acquire(e) => self.on_acquire(e),
            Event::Release(e) => self.on_release(e),
            Event::Join(_) | Event::Access(_) => Ok(()),
        }
    }
}
