//! Trace data model records.
//!
//! One struct per table of the trace store. Records are immutable once loaded;
//! cross-table references are expressed with the typed ids from [`super::ids`]
//! and resolved through [`crate::store::TraceStore`].

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use bitflags::bitflags;
use serde::Serialize;

use super::constants::{
    TAG_ACCESS, TAG_ACQUIRE, TAG_CALL, TAG_FORK, TAG_JOIN, TAG_RELEASE, TAG_RETURN,
};
use super::ids::{
    AccessId, CallId, FileId, FunctionId, InstructionId, LoopId, ProcessId, ReferenceId, SegmentId,
    ThreadId, Time,
};

/// Source file.
///
/// # Fields
/// - `path`: Full path as recorded by the capture tool
/// - `name`: Basename derived from `path`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub path: String,
    pub name: String,
}

impl FileRecord {
    pub fn new(id: FileId, path: impl Into<String>) -> Self {
        let path = path.into();
        let name = match path.rfind('/') {
            Some(pos) => path[pos + 1..].to_string(),
            None => path.clone(),
        };
        Self { id, path, name }
    }
}

bitflags! {
    /// Kinds a function record can carry. A function may be several things at
    /// once, e.g. an external fork routine.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FunctionKind: u32 {
        const ENTRY_ROUTINE = 1 << 0;
        const EXIT_ROUTINE = 1 << 1;
        const FUNCTION = 1 << 2;
        const METHOD = 1 << 3;
        const FREE = 1 << 4;
        const FORK = 1 << 5;
        const JOIN = 1 << 6;
        const ACQUIRE = 1 << 7;
        const RELEASE = 1 << 8;
        const EXTERNAL = 1 << 9;
        const ALLOC = 1 << 10;
        const BARRIER = 1 << 11;
        const WAIT = 1 << 12;
        const SIGNAL_SINGLE = 1 << 13;
        const SIGNAL_BROADCAST = 1 << 14;
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        f.write_str(&names.join("|"))
    }
}

impl Serialize for FunctionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Function (or method) declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionRecord {
    pub id: FunctionId,
    pub signature: String,
    pub kind: FunctionKind,
    pub file_id: FileId,
    pub line: u32,
}

/// One dynamic invocation of a function.
///
/// # Fields
/// - `instruction_id`: The CALL instruction that created this call. Thread
///   entry routines have none.
/// - `start_time`/`end_time`: Trace clock ticks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    pub id: CallId,
    pub thread_id: ThreadId,
    pub function_id: FunctionId,
    pub instruction_id: Option<InstructionId>,
    pub start_time: Time,
    pub end_time: Time,
}

/// Segment kinds. Loop segments carry a back-reference to their loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SegmentKind {
    #[default]
    Standard,
    Loop,
}

impl SegmentKind {
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            Self::Standard
        } else {
            Self::Loop
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Standard => 0,
            Self::Loop => 1,
        }
    }
}

/// Straight-line piece of a call's body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub call_id: CallId,
    pub kind: SegmentKind,
    pub loop_id: Option<LoopId>,
}

/// Instruction kinds that drive the interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum InstructionKind {
    Call,
    Return,
    Access,
    Acquire,
    Release,
    Fork,
    Join,
    Other,
}

impl InstructionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => TAG_CALL,
            Self::Return => TAG_RETURN,
            Self::Access => TAG_ACCESS,
            Self::Acquire => TAG_ACQUIRE[0],
            Self::Release => TAG_RELEASE[0],
            Self::Fork => TAG_FORK[0],
            Self::Join => TAG_JOIN[0],
            Self::Other => "OTHER",
        }
    }

    /// Decode a capture-tool tag. Unknown tags map to [`InstructionKind::Other`].
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim();
        let is = |names: &[&str]| names.iter().any(|n| n.eq_ignore_ascii_case(tag));
        if is(&[TAG_CALL]) {
            Self::Call
        } else if is(&[TAG_RETURN]) {
            Self::Return
        } else if is(&[TAG_ACCESS]) {
            Self::Access
        } else if is(&TAG_ACQUIRE) {
            Self::Acquire
        } else if is(&TAG_RELEASE) {
            Self::Release
        } else if is(&TAG_FORK) {
            Self::Fork
        } else if is(&TAG_JOIN) {
            Self::Join
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed instruction. Ascending ids are the global trace order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstructionRecord {
    pub id: InstructionId,
    pub segment_id: SegmentId,
    pub kind: InstructionKind,
    pub line: u32,
    pub timestamp: Option<Time>,
}

/// Where a referenced object lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum StorageClass {
    Local,
    Heap,
    Global,
    Static,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Heap => "HEAP",
            Self::Global => "GLOBAL",
            Self::Static => "STATIC",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Local),
            1 => Some(Self::Heap),
            2 => Some(Self::Global),
            3 => Some(Self::Static),
            _ => None,
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        // TEXT affinity stores integer codes as their decimal text.
        if let Ok(code) = s.trim().parse::<i64>() {
            return Self::from_code(code)
                .ok_or_else(|| anyhow::anyhow!("Invalid storage class code: {code}"));
        }
        match s.trim().to_ascii_uppercase().as_str() {
            "LOCAL" | "STACK" => Ok(Self::Local),
            "HEAP" => Ok(Self::Heap),
            "GLOBAL" => Ok(Self::Global),
            "STATIC" => Ok(Self::Static),
            _ => bail!("Invalid storage class: {s}. Must be one of: LOCAL, HEAP, GLOBAL, STATIC"),
        }
    }
}

/// A named memory object (variable, heap block, lock object, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceRecord {
    pub id: ReferenceId,
    pub name: String,
    pub size: u64,
    pub storage: StorageClass,
    pub alloc_instruction: Option<InstructionId>,
}

/// Kind of a memory access.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AccessKind {
    Read,
    Write,
    Other(String),
}

impl AccessKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "READ" | "R" | "1" => Self::Read,
            "WRITE" | "W" | "2" => Self::Write,
            _ => Self::Other(tag.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One memory access performed by an instruction. An instruction may own
/// several accesses, ordered by `position`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRecord {
    pub id: AccessId,
    pub instruction_id: InstructionId,
    pub position: u32,
    pub reference_id: ReferenceId,
    pub kind: AccessKind,
    pub memory_state: u32,
}

/// A traced thread.
///
/// # Fields
/// - `num_cycles`: Cycle count of the thread's whole lifetime
/// - `create_instruction`/`join_instruction`: FORK and JOIN instructions in the parent
/// - `parent_thread`: None for the root thread
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub start_time: Time,
    pub end_time: Time,
    pub num_cycles: u64,
    pub create_instruction: Option<InstructionId>,
    pub join_instruction: Option<InstructionId>,
    pub parent_thread: Option<ThreadId>,
    pub process_id: ProcessId,
}

/// A source loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopRecord {
    pub id: LoopId,
    pub line: u32,
}
