//! Accounting frames of the critical-path profiler.
//!
//! Frames live in two arenas that grow and shrink like stacks. Frames refer to
//! each other by index only: a thread frame knows the index of its head
//! function frame and of the function frame that spawned it.
//!
//! Layout while a child thread is live:
//!
//! ```text
//! function_stack: [root] [main()] [spawn()] [head of child] [work()]
//! thread_stack:   [root thread, head=0] [child, head=3, parent=2]
//! ```

use crate::error::{elapsed, ReplayError};
use crate::shadow::ThreadHandle;
use crate::trace::{CallId, Time};

use super::profile::{CallSite, CallSiteTable};

/// One open call, or the sentinel at the bottom of a thread.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionFrame {
    /// None for the root sentinel and for thread head frames.
    pub call_site: Option<CallSite>,
    pub call: Option<CallId>,
    /// First activation of `call_site` on the current stack.
    pub is_top: bool,

    /// Work of completed callees.
    pub running_work: Time,
    /// Time spent in this frame's own body.
    pub local_work: Time,
    /// Span of completed callees.
    pub running_span: Time,
    pub running_lock_span: Time,
    pub local_lock_span: Time,
}

impl FunctionFrame {
    pub fn call(site: CallSite, call: CallId, is_top: bool) -> Self {
        Self {
            call_site: Some(site),
            call: Some(call),
            is_top,
            ..Default::default()
        }
    }

    pub fn total_work(&self) -> Time {
        self.running_work + self.local_work
    }

    pub fn total_span(&self) -> Time {
        self.running_span + self.local_work
    }

    pub fn total_lock_span(&self) -> Time {
        self.running_lock_span + self.local_lock_span
    }
}

/// Accounting state of one live thread.
#[derive(Clone, Debug, Default)]
pub struct ThreadFrame {
    /// None until the first event of the root thread binds it.
    pub thread: Option<ThreadHandle>,
    pub head_function_index: usize,
    /// Function frame that forked this thread. None for the root.
    pub parent_function_index: Option<usize>,
    /// Start of the current strand: the last boundary event in this thread.
    pub strand_start: Option<Time>,
    pub ended: bool,

    /// Continuation time folded into the critical path.
    pub local_span: Time,
    /// Serial time since the last sync.
    pub local_continuation: Time,
    pub local_continuation_lock: Time,
    pub prefix_span: Time,
    pub lock_span: Time,
    pub longest_child_span: Time,
    pub longest_child_lock_span: Time,

    /// Parent's continuation at the moment this thread was forked.
    pub spawn_offset: Time,
    pub spawn_lock_offset: Time,
    pub spawn_table: CallSiteTable,

    pub prefix_table: CallSiteTable,
    pub continuation_table: CallSiteTable,
    pub longest_child_table: CallSiteTable,
}

impl ThreadFrame {
    /// Close the current strand at `now`, returning its length.
    pub fn close_strand(&mut self, now: Time, context: &'static str) -> Result<Time, ReplayError> {
        let length = match self.strand_start {
            Some(start) => elapsed(start, now, context)?,
            None => 0,
        };
        self.strand_start = Some(now);
        self.local_continuation += length;
        Ok(length)
    }

    /// Decide whether the critical path since the last sync ran through the
    /// longest child or through this thread's own continuation, and fold the
    /// winner into the prefix. Ties go to the continuation.
    pub fn sync(&mut self) {
        if self.longest_child_span > self.local_continuation {
            log::trace!(
                "sync {:?}: child path {} beats continuation {}",
                self.thread,
                self.longest_child_span,
                self.local_continuation
            );
            self.prefix_span += self.longest_child_span;
            self.lock_span += self.longest_child_lock_span;
            let table = self.longest_child_table.take();
            self.prefix_table.merge_owned(table);
        } else {
            log::trace!(
                "sync {:?}: continuation {} covers child path {}",
                self.thread,
                self.local_continuation,
                self.longest_child_span
            );
            self.prefix_span += self.local_continuation;
            self.local_span += self.local_continuation;
            self.lock_span += self.local_continuation_lock;
            let table = self.continuation_table.take();
            self.prefix_table.merge_owned(table);
        }

        self.local_continuation = 0;
        self.local_continuation_lock = 0;
        self.longest_child_span = 0;
        self.longest_child_lock_span = 0;
        self.continuation_table.clear();
        self.longest_child_table.clear();
    }
}

/// The two frame arenas.
#[derive(Debug)]
pub struct FrameStacks {
    pub functions: Vec<FunctionFrame>,
    pub threads: Vec<ThreadFrame>,
}

impl Default for FrameStacks {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStacks {
    /// Stacks holding only the root sentinel and the root thread frame.
    pub fn new() -> Self {
        Self {
            functions: vec![FunctionFrame::default()],
            threads: vec![ThreadFrame::default()],
        }
    }

    /// True when only the root frames remain.
    pub fn at_root(&self) -> bool {
        self.functions.len() == 1 && self.threads.len() == 1
    }

    pub fn top_function_index(&self) -> usize {
        self.functions.len() - 1
    }

    pub fn top_function(&mut self) -> &mut FunctionFrame {
        let idx = self.top_function_index();
        &mut self.functions[idx]
    }

    pub fn top_thread(&mut self) -> &mut ThreadFrame {
        let idx = self.threads.len() - 1;
        &mut self.threads[idx]
    }

    pub fn root_thread(&self) -> &ThreadFrame {
        &self.threads[0]
    }

    pub fn root_function(&self) -> &FunctionFrame {
        &self.functions[0]
    }

    /// Close the top thread's strand and credit it to the top function frame.
    pub fn close_strand(&mut self, now: Time, context: &'static str) -> Result<Time, ReplayError> {
        let length = self.top_thread().close_strand(now, context)?;
        self.top_function().local_work += length;
        Ok(length)
    }

    /// True if the top function frame is a call of the top thread, as opposed
    /// to the thread's head frame.
    pub fn top_thread_has_open_call(&self) -> bool {
        self.threads
            .last()
            .is_some_and(|t| self.top_function_index() > t.head_function_index)
    }
}
