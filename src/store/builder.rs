//! Programmatic construction of trace stores.
//!
//! `TraceBuilder` allocates ids and keeps the cross-table references of a
//! trace consistent: every call gets one segment, every instruction lands in
//! the segment of the call it is emitted from, and instructions are numbered
//! in the order they are added, which is the trace order.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use super::{TraceStore, TraceWriter};
use crate::trace::{
    AccessId, AccessKind, AccessRecord, CallId, CallRecord, FileId, FileRecord, FunctionId,
    FunctionKind, FunctionRecord, InstructionId, InstructionKind, InstructionRecord, ProcessId,
    ReferenceId, ReferenceRecord, SegmentId, SegmentKind, SegmentRecord, StorageClass, ThreadId,
    ThreadRecord, Time,
};

#[derive(Debug, Default)]
pub struct TraceBuilder {
    files: Vec<FileRecord>,
    functions: Vec<FunctionRecord>,
    calls: Vec<CallRecord>,
    segments: Vec<SegmentRecord>,
    instructions: Vec<InstructionRecord>,
    references: Vec<ReferenceRecord>,
    accesses: Vec<AccessRecord>,
    threads: Vec<ThreadRecord>,

    call_segments: HashMap<CallId, SegmentId>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&mut self, path: &str) -> FileId {
        let id = FileId(self.files.len() as i64 + 1);
        self.files.push(FileRecord::new(id, path));
        id
    }

    pub fn function(&mut self, signature: &str, file: FileId) -> FunctionId {
        self.function_with_kind(signature, file, FunctionKind::FUNCTION)
    }

    pub fn function_with_kind(
        &mut self,
        signature: &str,
        file: FileId,
        kind: FunctionKind,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as i64 + 1);
        self.functions.push(FunctionRecord {
            id,
            signature: signature.to_string(),
            kind,
            file_id: file,
            line: self.functions.len() as u32 * 10 + 1,
        });
        id
    }

    /// Add a Thread row. Fork and join instructions are attached later by
    /// [`TraceBuilder::fork`] and [`TraceBuilder::join`].
    pub fn thread(&mut self, start: Time, end: Time, parent: Option<ThreadId>) -> ThreadId {
        let id = ThreadId(self.threads.len() as i64 + 1);
        self.threads.push(ThreadRecord {
            id,
            start_time: start,
            end_time: end,
            num_cycles: end.saturating_sub(start),
            create_instruction: None,
            join_instruction: None,
            parent_thread: parent,
            process_id: ProcessId(1),
        });
        id
    }

    /// Add the entry routine call of a thread. It has no CALL instruction.
    pub fn entry_call(
        &mut self,
        thread: ThreadId,
        function: FunctionId,
        start: Time,
        end: Time,
    ) -> CallId {
        self.add_call(thread, function, None, start, end)
    }

    /// Emit a CALL instruction from `caller` and add the callee's call row.
    pub fn call(&mut self, caller: CallId, function: FunctionId, start: Time, end: Time) -> CallId {
        let thread = self
            .calls
            .iter()
            .find(|c| c.id == caller)
            .map_or(ThreadId(0), |c| c.thread_id);
        let instruction = self.instruction(caller, InstructionKind::Call, None);
        self.add_call(thread, function, Some(instruction), start, end)
    }

    /// Emit the end-of-routine instruction of `call`.
    pub fn ret(&mut self, call: CallId) -> InstructionId {
        self.instruction(call, InstructionKind::Return, None)
    }

    /// Emit a FORK instruction in `parent_call` that creates `child`.
    pub fn fork(&mut self, parent_call: CallId, child: ThreadId) -> InstructionId {
        let instruction = self.instruction(parent_call, InstructionKind::Fork, None);
        if let Some(row) = self.threads.iter_mut().find(|t| t.id == child) {
            row.create_instruction = Some(instruction);
        }
        instruction
    }

    /// Emit a JOIN instruction in `parent_call` that joins `child`.
    pub fn join(&mut self, parent_call: CallId, child: ThreadId) -> InstructionId {
        let instruction = self.instruction(parent_call, InstructionKind::Join, None);
        if let Some(row) = self.threads.iter_mut().find(|t| t.id == child) {
            row.join_instruction = Some(instruction);
        }
        instruction
    }

    pub fn reference(&mut self, name: &str, storage: StorageClass) -> ReferenceId {
        let id = ReferenceId(self.references.len() as i64 + 1);
        self.references.push(ReferenceRecord {
            id,
            name: name.to_string(),
            size: 8,
            storage,
            alloc_instruction: None,
        });
        id
    }

    /// Emit one ACCESS instruction touching each of `targets`, in order.
    pub fn access(&mut self, call: CallId, targets: &[(ReferenceId, AccessKind)]) -> InstructionId {
        let instruction = self.instruction(call, InstructionKind::Access, None);
        for (position, (reference, kind)) in targets.iter().enumerate() {
            self.add_access(instruction, position as u32, *reference, kind.clone());
        }
        instruction
    }

    pub fn acquire(
        &mut self,
        call: CallId,
        lock: ReferenceId,
        time: Option<Time>,
    ) -> InstructionId {
        self.lock_op(call, InstructionKind::Acquire, lock, time)
    }

    pub fn release(
        &mut self,
        call: CallId,
        lock: ReferenceId,
        time: Option<Time>,
    ) -> InstructionId {
        self.lock_op(call, InstructionKind::Release, lock, time)
    }

    /// Emit an instruction into an arbitrary segment, existing or not.
    pub fn raw_instruction(&mut self, segment: SegmentId, kind: InstructionKind) -> InstructionId {
        let id = InstructionId(self.instructions.len() as i64 + 1);
        self.instructions.push(InstructionRecord {
            id,
            segment_id: segment,
            kind,
            line: 0,
            timestamp: None,
        });
        id
    }

    pub fn segment_of(&self, call: CallId) -> Option<SegmentId> {
        self.call_segments.get(&call).copied()
    }

    /// Write every row through `writer`.
    pub fn write_to(&self, writer: &mut TraceWriter) -> Result<()> {
        for file in &self.files {
            writer.insert_file(file)?;
        }
        for function in &self.functions {
            writer.insert_function(function)?;
        }
        for thread in &self.threads {
            writer.insert_thread(thread)?;
        }
        for call in &self.calls {
            writer.insert_call(call)?;
        }
        for segment in &self.segments {
            writer.insert_segment(segment)?;
        }
        for instruction in &self.instructions {
            writer.insert_instruction(instruction)?;
        }
        for reference in &self.references {
            writer.insert_reference(reference)?;
        }
        for access in &self.accesses {
            writer.insert_access(access)?;
        }
        Ok(())
    }

    /// Write the trace to a new database file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = TraceWriter::create(path)?;
        self.write_to(&mut writer)?;
        writer
            .finish()
            .with_context(|| format!("Failed to save trace to {}", path.display()))?;
        Ok(())
    }

    /// Build an in-memory store holding the trace.
    pub fn into_store(self) -> Result<TraceStore> {
        let mut writer = TraceWriter::in_memory()?;
        self.write_to(&mut writer)?;
        let conn = writer.finish()?;
        TraceStore::from_connection(&conn)
    }

    fn add_call(
        &mut self,
        thread: ThreadId,
        function: FunctionId,
        instruction: Option<InstructionId>,
        start: Time,
        end: Time,
    ) -> CallId {
        let id = CallId(self.calls.len() as i64 + 1);
        self.calls.push(CallRecord {
            id,
            thread_id: thread,
            function_id: function,
            instruction_id: instruction,
            start_time: start,
            end_time: end,
        });

        let segment = SegmentId(self.segments.len() as i64 + 1);
        self.segments.push(SegmentRecord {
            id: segment,
            call_id: id,
            kind: SegmentKind::Standard,
            loop_id: None,
        });
        self.call_segments.insert(id, segment);
        id
    }

    fn instruction(
        &mut self,
        call: CallId,
        kind: InstructionKind,
        timestamp: Option<Time>,
    ) -> InstructionId {
        let segment = self.segment_of(call).unwrap_or(SegmentId(0));
        let id = self.raw_instruction(segment, kind);
        if let Some(last) = self.instructions.last_mut() {
            last.timestamp = timestamp;
        }
        id
    }

    fn lock_op(
        &mut self,
        call: CallId,
        kind: InstructionKind,
        lock: ReferenceId,
        time: Option<Time>,
    ) -> InstructionId {
        let instruction = self.instruction(call, kind, time);
        self.add_access(instruction, 0, lock, AccessKind::Write);
        instruction
    }

    fn add_access(
        &mut self,
        instruction: InstructionId,
        position: u32,
        reference: ReferenceId,
        kind: AccessKind,
    ) {
        let id = AccessId(self.accesses.len() as i64 + 1);
        self.accesses.push(AccessRecord {
            id,
            instruction_id: instruction,
            position,
            reference_id: reference,
            kind,
            memory_state: 0,
        });
    }
}
