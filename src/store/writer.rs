//! Trace store writer
//!
//! `TraceWriter` writes trace records into a fresh database using the schema in
//! [`crate::trace::schema`]. The capture tool is the real producer of trace
//! stores; this writer exists so that fixtures and converted traces can be built
//! from Rust without hand-written SQL.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;

use crate::trace::{
    create_schema, AccessRecord, CallRecord, FileRecord, FunctionRecord, InstructionRecord,
    LoopRecord, ReferenceRecord, SegmentRecord, ThreadRecord,
};

/// Trace store writer
///
/// All rows are written inside a single transaction which is committed by
/// [`TraceWriter::finish`]. Dropping the writer without finishing discards
/// everything written so far.
pub struct TraceWriter {
    conn: Connection,
    row_count: u64,
}

impl TraceWriter {
    /// Create a new trace database at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// Create a trace database that only lives in memory.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        create_schema(&conn).context("Failed to create trace schema")?;

        conn.execute_batch("BEGIN TRANSACTION")
            .context("Failed to begin transaction")?;

        Ok(Self { conn, row_count: 0 })
    }

    /// Rows written so far, across all tables.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn insert_file(&mut self, file: &FileRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO File (id, file_path) VALUES (?1, ?2)",
                params![file.id, file.path],
            )
            .context("Failed to insert file")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn insert_function(&mut self, function: &FunctionRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO Function (id, signature, type, file_id, line_number)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    function.id,
                    function.signature,
                    function.kind.bits(),
                    function.file_id,
                    function.line
                ],
            )
            .context("Failed to insert function")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn insert_loop(&mut self, record: &LoopRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO Loop (id, line_number) VALUES (?1, ?2)",
                params![record.id, record.line],
            )
            .context("Failed to insert loop")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn insert_reference(&mut self, reference: &ReferenceRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO Reference (id, name, size, memory_type, alloc_instruction_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reference.id,
                    reference.name,
                    reference.size as i64,
                    reference.storage.as_str(),
                    reference.alloc_instruction
                ],
            )
            .context("Failed to insert reference")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn insert_thread(&mut self, thread: &ThreadRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO Thread (id, start_time, end_time, num_cycles, create_instruction_id,
                                     join_instruction_id, parent_thread_id, process_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    thread.id,
                    thread.start_time as i64,
                    thread.end_time as i64,
                    thread.num_cycles as i64,
                    thread.create_instruction,
                    thread.join_instruction,
                    thread.parent_thread,
                    thread.process_id
                ],
            )
            .context("Failed to insert thread")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn insert_call(&mut self, call: &CallRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO Call (id, thread_id, function_id, instruction_id, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    call.id,
                    call.thread_id,
                    call.function_id,
                    call.instruction_id,
                    call.start_time as i64,
                    call.end_time as i64
                ],
            )
            .context("Failed to insert call")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn insert_segment(&mut self, segment: &SegmentRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO Segment (id, call_id, segment_type, loop_pointer)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    segment.id,
                    segment.call_id,
                    segment.kind.code(),
                    segment.loop_id
                ],
            )
            .context("Failed to insert segment")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn insert_instruction(&mut self, instruction: &InstructionRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO Instruction (id, segment_id, instruction_type, line_number, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    instruction.id,
                    instruction.segment_id,
                    instruction.kind.as_str(),
                    instruction.line,
                    instruction.timestamp.map(|t| t as i64)
                ],
            )
            .context("Failed to insert instruction")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn insert_access(&mut self, access: &AccessRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO Access (id, instruction_id, position, reference_id, access_type,
                                     memory_state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    access.id,
                    access.instruction_id,
                    access.position,
                    access.reference_id,
                    access.kind.as_str(),
                    access.memory_state
                ],
            )
            .context("Failed to insert access")?;
        self.row_count += 1;
        Ok(())
    }

    /// Commit the transaction and hand back the connection.
    pub fn finish(self) -> Result<Connection> {
        self.conn
            .execute_batch("COMMIT")
            .context("Failed to commit transaction")?;
        Ok(self.conn)
    }
}
