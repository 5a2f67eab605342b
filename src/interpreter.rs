//! Trace interpreter.
//!
//! Walks the instructions of a [`TraceStore`] in trace order and publishes one
//! event per meaningful instruction on its [`EventBus`]. Call nesting and
//! thread liveness are not recorded in the trace directly; they are rebuilt
//! here from the segment → call → thread chain of every instruction:
//!
//! - each live thread keeps a stack of open calls
//! - live threads form a stack in fork order; an instruction of a thread ends
//!   every thread forked after it that is still live
//! - an instruction whose owning call is below the top of its thread's stack
//!   returns the calls above it, and one whose call is not on the stack at
//!   all enters that call (thread entry routines have no CALL instruction)
//!
//! The event stream is serialized depth first: a forked thread runs to its
//! last instruction before its parent continues. Instructions of a thread
//! that cannot run yet (a thread below a live child that still has work, or a
//! child whose FORK has not been replayed) are held back and replayed, in
//! trace order, as soon as they can run.
//!
//! Broken foreign keys are tolerated per instruction (or per access) unless
//! [`ReplayConfig::strict`] is set.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use log::{debug, info, trace, warn};
use serde::Serialize;

use crate::bus::{EventBus, SharedSubscriber};
use crate::config::ReplayConfig;
use crate::error::{Entity, ReplayError};
use crate::events::{
    AccessEvent, CallEvent, Event, EventKind, EventMask, JoinEvent, LockEvent, NewThreadEvent,
    ReturnEvent, ThreadEndEvent,
};
use crate::shadow::{ShadowRegistry, ThreadHandle};
use crate::store::TraceStore;
use crate::trace::{
    CallId, CallRecord, FunctionId, InstructionKind, InstructionRecord, ThreadId, ThreadRecord,
    Time,
};

/// Outcome of a replay run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplaySummary {
    /// Instructions read from the store.
    pub instructions: u64,
    /// Events published, by kind.
    pub events: BTreeMap<&'static str, u64>,
    /// Instructions dropped because of a broken reference.
    pub skipped_instructions: u64,
    /// Accesses dropped because their reference does not exist.
    pub skipped_accesses: u64,
    /// Calls tracked for nesting whose function or file could not be resolved.
    pub unpublished_calls: u64,
    /// Instructions of threads that had already ended.
    pub late_instructions: u64,
    /// Instructions replayed after later ones to keep the stream depth first.
    pub deferred_instructions: u64,
    /// Every dangling reference met.
    pub dangling_total: u64,
    /// The first dangling references, up to the configured cap.
    pub dangling: Vec<String>,
    pub threads: usize,
    pub locks: usize,
    pub lock_acquires: u64,
    pub variables: usize,
}

impl ReplaySummary {
    /// Number of published events of one kind.
    #[must_use]
    pub fn events_of(&self, kind: EventKind) -> u64 {
        self.events.get(kind.as_str()).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn has_dangling(&self) -> bool {
        self.dangling_total > 0
    }

    fn add_dangling(&mut self, error: &ReplayError, cap: usize) {
        self.dangling_total += 1;
        if self.dangling.len() < cap {
            warn!("Skipping record: {error}");
            self.dangling.push(error.to_string());
        } else {
            debug!("Skipping record: {error}");
        }
    }
}

#[derive(Debug, Clone)]
struct OpenCall {
    id: CallId,
    function: FunctionId,
    end_time: Time,
    /// False when the Call event was withheld.
    published: bool,
}

#[derive(Debug)]
struct LiveThread {
    id: ThreadId,
    handle: ThreadHandle,
    calls: Vec<OpenCall>,
    /// Recorded end time, if the thread has a Thread row.
    end_time: Option<Time>,
    /// Latest call boundary seen in this thread.
    last_time: Time,
}

impl LiveThread {
    fn new(id: ThreadId, handle: ThreadHandle, row: Option<&ThreadRecord>, start: Time) -> Self {
        Self {
            id,
            handle,
            calls: Vec::new(),
            end_time: row.map(|r| r.end_time),
            last_time: start,
        }
    }
}

/// An instruction held back until its thread can run.
#[derive(Debug, Clone, Copy)]
struct Pending<'a> {
    instruction: &'a InstructionRecord,
    call: &'a CallRecord,
}

/// Replays one trace store onto an event bus.
pub struct TraceInterpreter<'a> {
    store: &'a TraceStore,
    config: ReplayConfig,
    bus: EventBus,
    registry: ShadowRegistry,
    live: Vec<LiveThread>,
    ended: HashSet<ThreadId>,
    /// Instructions not yet replayed, per owning thread.
    remaining: HashMap<ThreadId, usize>,
    /// Threads whose FORK instruction is still to be replayed.
    awaiting_fork: HashSet<ThreadId>,
    deferred: VecDeque<Pending<'a>>,
    deferred_by_thread: HashMap<ThreadId, usize>,
    summary: ReplaySummary,
}

impl<'a> TraceInterpreter<'a> {
    pub fn new(store: &'a TraceStore, config: ReplayConfig) -> Self {
        Self {
            store,
            config,
            bus: EventBus::new(),
            registry: ShadowRegistry::new(),
            live: Vec::new(),
            ended: HashSet::new(),
            remaining: HashMap::new(),
            awaiting_fork: HashSet::new(),
            deferred: VecDeque::new(),
            deferred_by_thread: HashMap::new(),
            summary: ReplaySummary::default(),
        }
    }

    /// Subscribe to events of the kinds in `mask`.
    pub fn subscribe(&mut self, subscriber: SharedSubscriber, mask: EventMask) -> bool {
        self.bus.subscribe(subscriber, mask, None)
    }

    /// The bus, for subscriptions with a predicate.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn registry(&self) -> &ShadowRegistry {
        &self.registry
    }

    /// Interpret every instruction, then unwind whatever is still open.
    pub fn run(mut self) -> Result<ReplaySummary, ReplayError> {
        let store = self.store;
        info!("Replaying {} instructions", store.instruction_count());
        self.plan();

        for instruction in store.instructions() {
            self.summary.instructions += 1;
            self.step(instruction)?;
        }

        if !self.deferred.is_empty() {
            warn!(
                "{} instruction(s) still wait for a FORK at end of trace, replaying them unforked",
                self.deferred.len()
            );
            self.awaiting_fork.clear();
            self.drain()?;
        }

        if self.config.unwind_at_end {
            if !self.live.is_empty() {
                debug!("Unwinding {} live thread(s) at end of trace", self.live.len());
            }
            while !self.live.is_empty() {
                self.end_top_thread()?;
            }
        }

        for kind in EventKind::ALL {
            self.summary
                .events
                .insert(kind.as_str(), self.bus.published(kind));
        }
        self.summary.threads = self.registry.thread_count();
        self.summary.locks = self.registry.lock_count();
        self.summary.lock_acquires = self.registry.acquire_total();
        self.summary.variables = self.registry.var_count();
        Ok(self.summary)
    }

    /// Count the instructions of every thread and note which threads are
    /// created by a FORK of the trace.
    fn plan(&mut self) {
        let store = self.store;
        for instruction in store.instructions() {
            let Ok(call) = self.owner_of(instruction) else {
                continue;
            };
            *self.remaining.entry(call.thread_id).or_default() += 1;
            if instruction.kind == InstructionKind::Fork {
                if let Some(child) = store.thread_created_by(instruction.id) {
                    self.awaiting_fork.insert(child);
                }
            }
        }
    }

    fn step(&mut self, instruction: &'a InstructionRecord) -> Result<(), ReplayError> {
        let call = match self.owner_of(instruction) {
            Ok(call) => call,
            Err(e) => {
                self.summary.skipped_instructions += 1;
                return self.tolerate(e);
            }
        };

        let thread = call.thread_id;
        let queued = self.deferred_by_thread.get(&thread).copied().unwrap_or(0);
        if queued > 0 || !self.can_run(thread) {
            trace!("Deferring {} of {}", instruction.id, thread);
            self.summary.deferred_instructions += 1;
            *self.deferred_by_thread.entry(thread).or_default() += 1;
            self.deferred.push_back(Pending { instruction, call });
            return Ok(());
        }

        self.execute(instruction, call)?;
        self.drain()
    }

    /// Whether an instruction of `thread` can be replayed now.
    fn can_run(&self, thread: ThreadId) -> bool {
        match self.live.iter().position(|t| t.id == thread) {
            Some(pos) => self.live[pos + 1..]
                .iter()
                .all(|above| self.remaining.get(&above.id).copied().unwrap_or(0) == 0),
            None => !self.awaiting_fork.contains(&thread),
        }
    }

    /// Replay held-back instructions until none of them can run.
    fn drain(&mut self) -> Result<(), ReplayError> {
        loop {
            let next = self
                .deferred
                .iter()
                .position(|p| self.can_run(p.call.thread_id));
            let Some(pending) = next.and_then(|pos| self.deferred.remove(pos)) else {
                break;
            };
            if let Some(queued) = self.deferred_by_thread.get_mut(&pending.call.thread_id) {
                *queued = queued.saturating_sub(1);
            }
            self.execute(pending.instruction, pending.call)?;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        instruction: &'a InstructionRecord,
        call: &'a CallRecord,
    ) -> Result<(), ReplayError> {
        if let Some(left) = self.remaining.get_mut(&call.thread_id) {
            *left = left.saturating_sub(1);
        }
        let result = self.interpret(instruction, call);
        if instruction.kind == InstructionKind::Fork {
            if let Some(child) = self.store.thread_created_by(instruction.id) {
                self.awaiting_fork.remove(&child);
            }
        }

        match result {
            Err(e) if e.is_recoverable() => {
                self.summary.skipped_instructions += 1;
                self.tolerate(e)
            }
            other => other,
        }
    }

    fn interpret(
        &mut self,
        instruction: &'a InstructionRecord,
        call: &'a CallRecord,
    ) -> Result<(), ReplayError> {
        if self.ended.contains(&call.thread_id) {
            warn!(
                "{} belongs to {} which already ended, ignoring",
                instruction.id, call.thread_id
            );
            self.summary.late_instructions += 1;
            return Ok(());
        }
        self.focus(call)?;

        match instruction.kind {
            InstructionKind::Call => self.on_call(instruction),
            InstructionKind::Return => self.on_return(),
            InstructionKind::Access => self.on_access(instruction),
            InstructionKind::Acquire => self.on_lock(instruction, true),
            InstructionKind::Release => self.on_lock(instruction, false),
            InstructionKind::Fork => self.on_fork(instruction),
            InstructionKind::Join => self.on_join(instruction),
            InstructionKind::Other => Ok(()),
        }
    }

    /// Skip a recoverable error, or abort with it in strict mode.
    fn tolerate(&mut self, error: ReplayError) -> Result<(), ReplayError> {
        if !error.is_recoverable() || self.config.strict {
            return Err(error);
        }
        self.summary
            .add_dangling(&error, self.config.max_reported_warnings);
        Ok(())
    }

    fn publish(&mut self, event: Event) -> Result<(), ReplayError> {
        self.bus.publish(&event)
    }

    /// Resolve instruction → segment → call.
    fn owner_of(&self, instruction: &InstructionRecord) -> Result<&'a CallRecord, ReplayError> {
        let store = self.store;
        let segment = store.segment(instruction.segment_id).ok_or_else(|| {
            ReplayError::dangling(
                Entity::Segment,
                instruction.segment_id.get(),
                instruction.id.to_string(),
            )
        })?;
        store.call(segment.call_id).ok_or_else(|| {
            ReplayError::dangling(Entity::Call, segment.call_id.get(), segment.id.to_string())
        })
    }

    fn top(&mut self) -> Result<&mut LiveThread, ReplayError> {
        self.live
            .last_mut()
            .ok_or_else(|| ReplayError::UnbalancedStack {
                context: "no live thread".to_string(),
            })
    }

    /// Make `call` the innermost open call of the innermost live thread.
    fn focus(&mut self, call: &'a CallRecord) -> Result<(), ReplayError> {
        match self.live.iter().position(|t| t.id == call.thread_id) {
            Some(pos) => {
                while self.live.len() > pos + 1 {
                    self.end_top_thread()?;
                }
            }
            None => self.start_thread(call)?,
        }

        let depth = self.top()?.calls.iter().position(|c| c.id == call.id);
        match depth {
            Some(depth) => {
                while self.top()?.calls.len() > depth + 1 {
                    self.return_top_call()?;
                }
                Ok(())
            }
            None => self.enter_call(call),
        }
    }

    /// A thread seen for the first time without a FORK instruction.
    fn start_thread(&mut self, call: &CallRecord) -> Result<(), ReplayError> {
        let store = self.store;
        let row = store.thread(call.thread_id);
        if row.is_none() {
            debug!("{} has no Thread row", call.thread_id);
        }

        if self.live.is_empty() {
            debug!("{} is the root thread", call.thread_id);
            let handle = self.registry.get_or_create_thread(call.thread_id, None);
            self.live
                .push(LiveThread::new(call.thread_id, handle, row, call.start_time));
            return Ok(());
        }

        warn!(
            "{} starts without a fork, treating it as forked by {}",
            call.thread_id,
            self.top()?.id
        );
        self.spawn(call.thread_id, row, call.start_time)
    }

    fn spawn(
        &mut self,
        id: ThreadId,
        row: Option<&ThreadRecord>,
        start: Time,
    ) -> Result<(), ReplayError> {
        let parent = self.top()?.handle;
        let child = self.registry.get_or_create_thread(id, Some(parent));
        self.publish(Event::NewThread(NewThreadEvent {
            thread: parent,
            child,
            child_id: id,
            start_time: start,
            num_cycles: row.map_or(0, |r| r.num_cycles),
        }))?;
        self.live.push(LiveThread::new(id, child, row, start));
        Ok(())
    }

    /// Return every open call of the innermost thread, then end it.
    fn end_top_thread(&mut self) -> Result<(), ReplayError> {
        while !self.top()?.calls.is_empty() {
            self.return_top_call()?;
        }
        let Some(thread) = self.live.pop() else {
            return Err(ReplayError::UnbalancedStack {
                context: "ending a thread with none live".to_string(),
            });
        };
        self.ended.insert(thread.id);
        self.publish(Event::ThreadEnd(ThreadEndEvent {
            thread: thread.handle,
            thread_id: thread.id,
            end_time: thread.end_time.unwrap_or(thread.last_time),
        }))
    }

    fn enter_call(&mut self, call: &'a CallRecord) -> Result<(), ReplayError> {
        let store = self.store;
        let resolved = store
            .function(call.function_id)
            .ok_or_else(|| {
                ReplayError::dangling(Entity::Function, call.function_id.get(), call.id.to_string())
            })
            .and_then(|function| {
                store
                    .file(function.file_id)
                    .map(|file| (function, file))
                    .ok_or_else(|| {
                        ReplayError::dangling(
                            Entity::File,
                            function.file_id.get(),
                            function.id.to_string(),
                        )
                    })
            });

        let thread = self.top()?.handle;
        let published = match resolved {
            Ok((function, file)) => {
                self.publish(Event::Call(CallEvent {
                    thread,
                    call: call.id,
                    function: function.id,
                    signature: function.signature.clone(),
                    function_kind: function.kind,
                    file_name: file.name.clone(),
                    file_path: file.path.clone(),
                    line: function.line,
                    start_time: call.start_time,
                }))?;
                true
            }
            Err(e) => {
                self.summary.unpublished_calls += 1;
                self.tolerate(e)?;
                false
            }
        };

        let top = self.top()?;
        top.calls.push(OpenCall {
            id: call.id,
            function: call.function_id,
            end_time: call.end_time,
            published,
        });
        top.last_time = call.start_time;
        Ok(())
    }

    fn return_top_call(&mut self) -> Result<(), ReplayError> {
        let top = self.top()?;
        let thread = top.handle;
        let Some(open) = top.calls.pop() else {
            return Err(ReplayError::UnbalancedStack {
                context: format!("return in {} with no open call", top.id),
            });
        };
        top.last_time = open.end_time;

        if open.published {
            self.publish(Event::Return(ReturnEvent {
                thread,
                call: open.id,
                function: open.function,
                end_time: open.end_time,
            }))?;
        }
        Ok(())
    }

    fn on_call(&mut self, instruction: &InstructionRecord) -> Result<(), ReplayError> {
        let store = self.store;
        let callee = store
            .callee_of(instruction.id)
            .and_then(|id| store.call(id))
            .ok_or_else(|| {
                ReplayError::dangling(
                    Entity::Call,
                    instruction.id.get(),
                    format!("callee of {}", instruction.id),
                )
            })?;
        self.focus(callee)
    }

    fn on_return(&mut self) -> Result<(), ReplayError> {
        self.return_top_call()?;
        if self.top()?.calls.is_empty() {
            self.end_top_thread()?;
        }
        Ok(())
    }

    fn on_access(&mut self, instruction: &InstructionRecord) -> Result<(), ReplayError> {
        let store = self.store;
        let accesses = store.accesses_of(instruction.id);
        if accesses.is_empty() {
            debug!("{} has no access rows", instruction.id);
            return Ok(());
        }

        let thread = self.top()?.handle;
        for &id in accesses {
            let Some(access) = store.access(id) else {
                continue;
            };
            let Some(reference) = store.reference(access.reference_id) else {
                self.summary.skipped_accesses += 1;
                self.tolerate(ReplayError::dangling(
                    Entity::Reference,
                    access.reference_id.get(),
                    id.to_string(),
                ))?;
                continue;
            };

            let var = self.registry.get_or_create_var(reference);
            self.publish(Event::Access(AccessEvent {
                thread,
                instruction: instruction.id,
                access: id,
                position: access.position,
                kind: access.kind.clone(),
                var,
            }))?;
        }
        Ok(())
    }

    /// The lock object is the reference of the instruction's first access.
    fn on_lock(
        &mut self,
        instruction: &InstructionRecord,
        acquire: bool,
    ) -> Result<(), ReplayError> {
        let store = self.store;
        let reference = store
            .accesses_of(instruction.id)
            .first()
            .and_then(|id| store.access(*id))
            .map(|access| access.reference_id)
            .ok_or_else(|| {
                ReplayError::dangling(
                    Entity::Access,
                    instruction.id.get(),
                    format!("lock operand of {}", instruction.id),
                )
            })?;
        if store.reference(reference).is_none() {
            return Err(ReplayError::dangling(
                Entity::Reference,
                reference.get(),
                format!("lock operand of {}", instruction.id),
            ));
        }

        let thread = self.top()?.handle;
        let lock = self.registry.get_or_create_lock(reference);
        let payload = LockEvent {
            thread,
            lock,
            reference,
            instruction: instruction.id,
            time: instruction.timestamp,
        };
        if acquire {
            self.registry.record_acquire(lock);
            self.publish(Event::Acquire(payload))
        } else {
            self.publish(Event::Release(payload))
        }
    }

    fn on_fork(&mut self, instruction: &InstructionRecord) -> Result<(), ReplayError> {
        let store = self.store;
        let row = store
            .thread_created_by(instruction.id)
            .and_then(|id| store.thread(id))
            .ok_or_else(|| {
                ReplayError::dangling(
                    Entity::Thread,
                    instruction.id.get(),
                    format!("thread created by {}", instruction.id),
                )
            })?;

        if self.ended.contains(&row.id) || self.live.iter().any(|t| t.id == row.id) {
            warn!("{} forked twice, ignoring {}", row.id, instruction.id);
            return Ok(());
        }
        self.spawn(row.id, Some(row), row.start_time)
    }

    /// A joined child that was still live has already been ended by `focus`.
    fn on_join(&mut self, instruction: &InstructionRecord) -> Result<(), ReplayError> {
        let child_id = self.store.thread_joined_by(instruction.id).ok_or_else(|| {
            ReplayError::dangling(
                Entity::Thread,
                instruction.id.get(),
                format!("thread joined by {}", instruction.id),
            )
        })?;

        let thread = self.top()?.handle;
        let child = self.registry.get_or_create_thread(child_id, Some(thread));
        self.publish(Event::Join(JoinEvent {
            thread,
            child,
            instruction: instruction.id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::bus::Subscriber;
    use crate::store::TraceBuilder;
    use crate::trace::{AccessKind, ReferenceId, SegmentId, StorageClass};

    #[derive(Default)]
    struct EventLog {
        events: Vec<Event>,
    }

    impl Subscriber for EventLog {
        fn on_event(&mut self, event: &Event) -> Result<(), ReplayError> {
            self.events.push(event.clone());
            Ok(())
        }
    }

    impl EventLog {
        fn kinds(&self) -> Vec<&'static str> {
            self.events.iter().map(|e| e.kind().as_str()).collect()
        }
    }

    fn replay(
        builder: TraceBuilder,
        config: ReplayConfig,
    ) -> (Result<ReplaySummary, ReplayError>, Rc<RefCell<EventLog>>) {
        let store = builder.into_store().unwrap();
        let log = Rc::new(RefCell::new(EventLog::default()));
        let mut interpreter = TraceInterpreter::new(&store, config);
        interpreter.subscribe(log.clone(), EventMask::ALL);
        (interpreter.run(), log)
    }

    #[test]
    fn test_nested_calls() {
        let mut b = TraceBuilder::new();
        let file = b.file("/src/main.c");
        let main_fn = b.function("int main()", file);
        let work_fn = b.function("void work()", file);
        let t = b.thread(0, 15, None);
        let main = b.entry_call(t, main_fn, 0, 15);
        let work = b.call(main, work_fn, 0, 10);
        b.ret(work);
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(
            log.borrow().kinds(),
            vec!["call", "call", "return", "return", "thread_end"]
        );
        assert_eq!(summary.events_of(EventKind::Call), 2);
        assert_eq!(summary.events_of(EventKind::ThreadEnd), 1);
        assert!(!summary.has_dangling());

        let log = log.borrow();
        let Event::Call(outer) = &log.events[0] else {
            panic!("expected call");
        };
        assert_eq!(outer.signature, "int main()");
        assert_eq!(outer.file_name, "main.c");
        let Event::ThreadEnd(end) = &log.events[4] else {
            panic!("expected thread end");
        };
        assert_eq!(end.end_time, 15);
    }

    #[test]
    fn test_missing_return_unwound_implicitly() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let g = b.function("g", file);
        let r = b.reference("x", StorageClass::Global);
        let t = b.thread(0, 20, None);
        let main = b.entry_call(t, f, 0, 20);
        b.call(main, g, 1, 5);
        // No RETURN for the callee; the next access belongs to main.
        b.access(main, &[(r, AccessKind::Read)]);
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        summary.unwrap();
        assert_eq!(
            log.borrow().kinds(),
            vec!["call", "call", "return", "access", "return", "thread_end"]
        );
    }

    #[test]
    fn test_fork_and_join() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let main_fn = b.function("main", file);
        let worker_fn = b.function("worker", file);
        let t1 = b.thread(0, 30, None);
        let t2 = b.thread(2, 20, Some(t1));
        let main = b.entry_call(t1, main_fn, 0, 30);
        b.fork(main, t2);
        let worker = b.entry_call(t2, worker_fn, 2, 20);
        b.ret(worker);
        b.join(main, t2);
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(
            log.borrow().kinds(),
            vec![
                "call",
                "new_thread",
                "call",
                "return",
                "thread_end",
                "join",
                "return",
                "thread_end"
            ]
        );
        assert_eq!(summary.threads, 2);

        let log = log.borrow();
        let Event::NewThread(fork) = &log.events[1] else {
            panic!("expected fork");
        };
        assert_eq!(fork.start_time, 2);
        assert_eq!(fork.child_id, t2);
    }

    #[test]
    fn test_parent_instruction_ends_live_child() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let main_fn = b.function("main", file);
        let worker_fn = b.function("worker", file);
        let r = b.reference("x", StorageClass::Heap);
        let t1 = b.thread(0, 30, None);
        let t2 = b.thread(2, 20, Some(t1));
        let main = b.entry_call(t1, main_fn, 0, 30);
        b.fork(main, t2);
        let worker = b.entry_call(t2, worker_fn, 2, 20);
        b.access(worker, &[(r, AccessKind::Write)]);
        // The worker never returns explicitly.
        b.access(main, &[(r, AccessKind::Read)]);

        let (summary, log) = replay(b, ReplayConfig::default());
        summary.unwrap();
        assert_eq!(
            log.borrow().kinds(),
            vec![
                "call",
                "new_thread",
                "call",
                "access",
                "return",
                "thread_end",
                "access",
                "return",
                "thread_end"
            ]
        );
    }

    #[test]
    fn test_dangling_reference_skips_only_that_access() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let good = b.reference("ok", StorageClass::Local);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        b.access(
            main,
            &[
                (ReferenceId(404), AccessKind::Read),
                (good, AccessKind::Write),
            ],
        );
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.skipped_accesses, 1);
        assert_eq!(summary.dangling_total, 1);
        assert!(summary.dangling[0].contains("reference 404"));
        assert_eq!(
            log.borrow().kinds(),
            vec!["call", "access", "return", "thread_end"]
        );
    }

    #[test]
    fn test_strict_mode_aborts_on_dangling() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        b.access(main, &[(ReferenceId(404), AccessKind::Read)]);

        let config = ReplayConfig {
            strict: true,
            ..Default::default()
        };
        let (summary, _) = replay(b, config);
        assert!(matches!(
            summary,
            Err(ReplayError::DanglingReference {
                entity: Entity::Reference,
                id: 404,
                ..
            })
        ));
    }

    #[test]
    fn test_broken_segment_chain_skips_instruction() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        b.raw_instruction(SegmentId(999), InstructionKind::Access);
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.skipped_instructions, 1);
        assert_eq!(summary.instructions, 2);
        assert_eq!(log.borrow().kinds(), vec!["call", "return", "thread_end"]);
    }

    #[test]
    fn test_unknown_function_is_tracked_but_silent() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        let ghost = b.call(main, FunctionId(77), 1, 3);
        b.ret(ghost);
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.unpublished_calls, 1);
        assert_eq!(log.borrow().kinds(), vec!["call", "return", "thread_end"]);
    }

    #[test]
    fn test_lock_events_carry_timestamps() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let m = b.reference("mutex", StorageClass::Global);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        b.acquire(main, m, Some(2));
        b.release(main, m, Some(5));
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.locks, 1);
        assert_eq!(summary.lock_acquires, 1);

        let log = log.borrow();
        let Event::Acquire(acquire) = &log.events[1] else {
            panic!("expected acquire");
        };
        let Event::Release(release) = &log.events[2] else {
            panic!("expected release");
        };
        assert_eq!(acquire.lock, release.lock);
        assert_eq!(acquire.time, Some(2));
        assert_eq!(release.time, Some(5));
    }

    #[test]
    fn test_no_unwind_leaves_threads_open() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let r = b.reference("x", StorageClass::Static);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        b.access(main, &[(r, AccessKind::Read)]);

        let config = ReplayConfig {
            unwind_at_end: false,
            ..Default::default()
        };
        let (summary, log) = replay(b, config);
        summary.unwrap();
        assert_eq!(log.borrow().kinds(), vec!["call", "access"]);
    }

    #[test]
    fn test_parent_instruction_before_child_runs_is_deferred() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let main_fn = b.function("main", file);
        let worker_fn = b.function("worker", file);
        let step_fn = b.function("step", file);
        let r = b.reference("x", StorageClass::Global);
        let t1 = b.thread(0, 30, None);
        let t2 = b.thread(2, 20, Some(t1));
        let main = b.entry_call(t1, main_fn, 0, 30);
        b.fork(main, t2);
        // The parent runs before the child is first scheduled.
        b.access(main, &[(r, AccessKind::Read)]);
        let worker = b.entry_call(t2, worker_fn, 2, 20);
        let step = b.call(worker, step_fn, 4, 8);
        b.ret(step);
        b.ret(worker);
        b.join(main, t2);
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.late_instructions, 0);
        assert_eq!(summary.deferred_instructions, 1);
        assert_eq!(summary.events_of(EventKind::Call), 3);
        assert_eq!(summary.events_of(EventKind::Return), 3);
        assert_eq!(
            log.borrow().kinds(),
            vec![
                "call",
                "new_thread",
                "call",
                "call",
                "return",
                "return",
                "thread_end",
                "access",
                "join",
                "return",
                "thread_end"
            ]
        );
    }

    #[test]
    fn test_interleaved_siblings_are_serialized() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let main_fn = b.function("main", file);
        let worker_fn = b.function("worker", file);
        let step_fn = b.function("step", file);
        let t1 = b.thread(0, 40, None);
        let t2 = b.thread(1, 20, Some(t1));
        let t3 = b.thread(2, 30, Some(t1));
        let main = b.entry_call(t1, main_fn, 0, 40);
        b.fork(main, t2);
        b.fork(main, t3);
        let w1 = b.entry_call(t2, worker_fn, 1, 20);
        let s1 = b.call(w1, step_fn, 3, 6);
        let w2 = b.entry_call(t3, worker_fn, 2, 30);
        let s2 = b.call(w2, step_fn, 4, 9);
        b.ret(s1);
        b.ret(w1);
        b.ret(s2);
        b.ret(w2);
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.deferred_instructions, 2);
        assert_eq!(summary.late_instructions, 0);

        let log = log.borrow();
        let threads: Vec<(&str, ThreadId)> = log
            .events
            .iter()
            .filter_map(|e| match e {
                Event::NewThread(n) => Some(("new_thread", n.child_id)),
                Event::ThreadEnd(end) => Some(("thread_end", end.thread_id)),
                _ => None,
            })
            .collect();
        assert_eq!(
            threads,
            vec![
                ("new_thread", t2),
                ("thread_end", t2),
                ("new_thread", t3),
                ("thread_end", t3),
                ("thread_end", t1)
            ]
        );
        assert_eq!(summary.events_of(EventKind::Return), 5);
    }

    #[test]
    fn test_child_seen_before_its_fork_waits_for_it() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let main_fn = b.function("main", file);
        let worker_fn = b.function("worker", file);
        let t1 = b.thread(0, 10, None);
        let t2 = b.thread(2, 6, Some(t1));
        let main = b.entry_call(t1, main_fn, 0, 10);
        let worker = b.entry_call(t2, worker_fn, 2, 6);
        // The worker's return is recorded ahead of the FORK that creates it.
        b.ret(worker);
        b.fork(main, t2);
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.deferred_instructions, 1);
        assert_eq!(
            log.borrow().kinds(),
            vec![
                "call",
                "new_thread",
                "call",
                "return",
                "thread_end",
                "return",
                "thread_end"
            ]
        );
    }

    #[test]
    fn test_lock_on_missing_reference_is_skipped() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        b.acquire(main, ReferenceId(404), Some(2));
        b.release(main, ReferenceId(404), Some(5));
        b.ret(main);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.skipped_instructions, 2);
        assert_eq!(summary.dangling_total, 2);
        assert!(summary.dangling[0].contains("reference 404"));
        assert_eq!(summary.locks, 0);
        assert_eq!(log.borrow().kinds(), vec!["call", "return", "thread_end"]);

        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        b.acquire(main, ReferenceId(404), Some(2));
        let config = ReplayConfig {
            strict: true,
            ..Default::default()
        };
        let (summary, _) = replay(b, config);
        assert!(matches!(
            summary,
            Err(ReplayError::DanglingReference {
                entity: Entity::Reference,
                id: 404,
                ..
            })
        ));
    }

    #[test]
    fn test_instruction_after_thread_end_ignored() {
        let mut b = TraceBuilder::new();
        let file = b.file("a.c");
        let f = b.function("f", file);
        let r = b.reference("x", StorageClass::Global);
        let t = b.thread(0, 10, None);
        let main = b.entry_call(t, f, 0, 10);
        b.ret(main);
        b.access(main, &[(r, AccessKind::Read)]);

        let (summary, log) = replay(b, ReplayConfig::default());
        let summary = summary.unwrap();
        assert_eq!(summary.late_instructions, 1);
        assert_eq!(log.borrow().kinds(), vec!["call", "return", "thread_end"]);
    }
}
