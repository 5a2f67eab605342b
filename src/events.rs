//! Replay events.
//!
//! The interpreter publishes exactly one [`Event`] per semantically meaningful
//! instruction. Each variant carries its own payload; every payload names the
//! shadow thread the event happened in.

use std::fmt;

use bitflags::bitflags;

use crate::shadow::{LockHandle, ThreadHandle, VarHandle};
use crate::trace::{
    AccessId, AccessKind, CallId, FunctionId, FunctionKind, InstructionId, ReferenceId, ThreadId,
    Time,
};

bitflags! {
    /// Set of event kinds a subscriber wants to receive.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const NEW_THREAD = 0x01;
        const THREAD_END = 0x02;
        const JOIN = 0x04;
        const ACQUIRE = 0x08;
        const RELEASE = 0x10;
        const ACCESS = 0x20;
        const CALL = 0x40;
        const RETURN = 0x80;
        const ALL = 0xFF;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewThread,
    ThreadEnd,
    Join,
    Acquire,
    Release,
    Access,
    Call,
    Return,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::NewThread,
        EventKind::ThreadEnd,
        EventKind::Join,
        EventKind::Acquire,
        EventKind::Release,
        EventKind::Access,
        EventKind::Call,
        EventKind::Return,
    ];

    pub fn mask(self) -> EventMask {
        match self {
            EventKind::NewThread => EventMask::NEW_THREAD,
            EventKind::ThreadEnd => EventMask::THREAD_END,
            EventKind::Join => EventMask::JOIN,
            EventKind::Acquire => EventMask::ACQUIRE,
            EventKind::Release => EventMask::RELEASE,
            EventKind::Access => EventMask::ACCESS,
            EventKind::Call => EventMask::CALL,
            EventKind::Return => EventMask::RETURN,
        }
    }

    /// Position of this kind in [`EventKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewThread => "new_thread",
            EventKind::ThreadEnd => "thread_end",
            EventKind::Join => "join",
            EventKind::Acquire => "acquire",
            EventKind::Release => "release",
            EventKind::Access => "access",
            EventKind::Call => "call",
            EventKind::Return => "return",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A thread was forked. `thread` is the parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewThreadEvent {
    pub thread: ThreadHandle,
    pub child: ThreadHandle,
    pub child_id: ThreadId,
    pub start_time: Time,
    pub num_cycles: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadEndEvent {
    pub thread: ThreadHandle,
    pub thread_id: ThreadId,
    pub end_time: Time,
}

/// `thread` joined `child`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinEvent {
    pub thread: ThreadHandle,
    pub child: ThreadHandle,
    pub instruction: InstructionId,
}

/// Payload shared by lock acquire and release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockEvent {
    pub thread: ThreadHandle,
    pub lock: LockHandle,
    pub reference: ReferenceId,
    pub instruction: InstructionId,
    /// Instruction timestamp, when the trace records one.
    pub time: Option<Time>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessEvent {
    pub thread: ThreadHandle,
    pub instruction: InstructionId,
    pub access: AccessId,
    pub position: u32,
    pub kind: AccessKind,
    pub var: VarHandle,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallEvent {
    pub thread: ThreadHandle,
    pub call: CallId,
    pub function: FunctionId,
    pub signature: String,
    pub function_kind: FunctionKind,
    pub file_name: String,
    pub file_path: String,
    pub line: u32,
    pub start_time: Time,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReturnEvent {
    pub thread: ThreadHandle,
    pub call: CallId,
    pub function: FunctionId,
    pub end_time: Time,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    NewThread(NewThreadEvent),
    ThreadEnd(ThreadEndEvent),
    Join(JoinEvent),
    Acquire(LockEvent),
    Release(LockEvent),
    Access(AccessEvent),
    Call(CallEvent),
    Return(ReturnEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewThread(_) => EventKind::NewThread,
            Event::ThreadEnd(_) => EventKind::ThreadEnd,
            Event::Join(_) => EventKind::Join,
            Event::Acquire(_) => EventKind::Acquire,
            Event::Release(_) => EventKind::Release,
            Event::Access(_) => EventKind::Access,
            Event::Call(_) => EventKind::Call,
            Event::Return(_) => EventKind::Return,
        }
    }

    /// The shadow thread the event happened in.
    pub fn thread(&self) -> ThreadHandle {
        match self {
            Event::NewThread(e) => e.thread,
            Event::ThreadEnd(e) => e.thread,
            Event::Join(e) => e.thread,
            Event::Acquire(e) | Event::Release(e) => e.thread,
            Event::Access(e) => e.thread,
            Event::Call(e) => e.thread,
            Event::Return(e) => e.thread,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::NewThread(e) => write!(
                f,
                "new_thread {} -> {} ({}) at {}",
                e.thread, e.child, e.child_id, e.start_time
            ),
            Event::ThreadEnd(e) => write!(
                f,
                "thread_end {} ({}) at {}",
                e.thread, e.thread_id, e.end_time
            ),
            Event::Join(e) => write!(f, "join {} <- {}", e.thread, e.child),
            Event::Acquire(e) => write!(f, "acquire {} in {}", e.lock, e.thread),
            Event::Release(e) => write!(f, "release {} in {}", e.lock, e.thread),
            Event::Access(e) => write!(f, "access {} {} in {}", e.kind, e.var, e.thread),
            Event::Call(e) => write!(
                f,
                "call {} {} [{}:{}] at {}",
                e.call, e.signature, e.file_name, e.line, e.start_time
            ),
            Event::Return(e) => write!(f, "return {} at {}", e.call, e.end_time),
        }
    }
}
