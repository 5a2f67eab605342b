//! Trace store: the flat relational tables of a recorded trace.
//!
//! The whole store is loaded into memory up front. Rows only reference each
//! other through typed foreign keys; this module builds the secondary indexes
//! the interpreter needs (accesses per instruction, callee per CALL
//! instruction, thread per FORK/JOIN instruction) but never validates the
//! references themselves. Lookups of missing rows return `None` and it is up to
//! the caller to decide whether that is fatal.

pub mod builder;
pub mod writer;

pub use builder::TraceBuilder;
pub use writer::TraceWriter;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, OpenFlags, Row};
use serde::Serialize;

use crate::error::ReplayError;
use crate::trace::constants::{
    parse_time_string, ACCESS_TABLE, CALL_TABLE, FILE_TABLE, FUNCTION_TABLE, INSTRUCTION_TABLE,
    LOOP_TABLE, REFERENCE_TABLE, SEGMENT_TABLE, THREAD_TABLE,
};
use crate::trace::{
    AccessId, AccessKind, AccessRecord, CallId, CallRecord, FileId, FileRecord, FunctionId,
    FunctionKind, FunctionRecord, InstructionId, InstructionKind, InstructionRecord, LoopId,
    LoopRecord, ProcessId, ReferenceId, ReferenceRecord, SegmentId, SegmentKind, SegmentRecord,
    StorageClass, ThreadId, ThreadRecord, Time,
};

/// Table information.
#[derive(Debug, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub row_count: u64,
}

/// All tables of one trace, plus lookup indexes.
#[derive(Debug, Default)]
pub struct TraceStore {
    path: Option<PathBuf>,

    accesses: HashMap<AccessId, AccessRecord>,
    calls: HashMap<CallId, CallRecord>,
    files: HashMap<FileId, FileRecord>,
    functions: HashMap<FunctionId, FunctionRecord>,
    instructions: BTreeMap<InstructionId, InstructionRecord>,
    loops: HashMap<LoopId, LoopRecord>,
    references: HashMap<ReferenceId, ReferenceRecord>,
    segments: HashMap<SegmentId, SegmentRecord>,
    threads: HashMap<ThreadId, ThreadRecord>,

    // Secondary indexes
    accesses_by_instruction: HashMap<InstructionId, Vec<AccessId>>,
    call_by_instruction: HashMap<InstructionId, CallId>,
    thread_by_create: HashMap<InstructionId, ThreadId>,
    thread_by_join: HashMap<InstructionId, ThreadId>,
}

impl TraceStore {
    /// Open a trace database read-only and load every table.
    pub fn open(path: &Path) -> Result<Self, ReplayError> {
        let load = || -> Result<Self> {
            if !path.exists() {
                bail!("Database not found: {}", path.display());
            }
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
            let mut store = Self::from_connection(&conn)?;
            store.path = Some(path.to_path_buf());
            Ok(store)
        };

        load().map_err(|e| ReplayError::TraceLoadFailure {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        })
    }

    /// Load every table from an already open connection.
    pub fn from_connection(conn: &Connection) -> Result<Self> {
        let mut store = Self::default();

        store.load_files(conn)?;
        store.load_functions(conn)?;
        store.load_calls(conn)?;
        store.load_segments(conn)?;
        store.load_instructions(conn)?;
        store.load_references(conn)?;
        store.load_accesses(conn)?;
        store.load_threads(conn)?;
        if table_exists(conn, LOOP_TABLE)? {
            store.load_loops(conn)?;
        }

        for info in store.table_counts() {
            debug!("Rows in {:<12} {}", info.name, info.row_count);
        }

        Ok(store)
    }

    /// Path the store was loaded from, if it came from a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Instructions in trace order (ascending id).
    pub fn instructions(&self) -> impl Iterator<Item = &InstructionRecord> {
        self.instructions.values()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn access(&self, id: AccessId) -> Option<&AccessRecord> {
        self.accesses.get(&id)
    }

    pub fn call(&self, id: CallId) -> Option<&CallRecord> {
        self.calls.get(&id)
    }

    pub fn file(&self, id: FileId) -> Option<&FileRecord> {
        self.files.get(&id)
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionRecord> {
        self.functions.get(&id)
    }

    pub fn reference(&self, id: ReferenceId) -> Option<&ReferenceRecord> {
        self.references.get(&id)
    }

    pub fn segment(&self, id: SegmentId) -> Option<&SegmentRecord> {
        self.segments.get(&id)
    }

    pub fn thread(&self, id: ThreadId) -> Option<&ThreadRecord> {
        self.threads.get(&id)
    }

    /// Access rows owned by an instruction, ordered by position.
    pub fn accesses_of(&self, instruction: InstructionId) -> &[AccessId] {
        self.accesses_by_instruction
            .get(&instruction)
            .map_or(&[], Vec::as_slice)
    }

    /// The call created by a CALL instruction.
    pub fn callee_of(&self, instruction: InstructionId) -> Option<CallId> {
        self.call_by_instruction.get(&instruction).copied()
    }

    /// The thread created by a FORK instruction.
    pub fn thread_created_by(&self, instruction: InstructionId) -> Option<ThreadId> {
        self.thread_by_create.get(&instruction).copied()
    }

    /// The thread joined by a JOIN instruction.
    pub fn thread_joined_by(&self, instruction: InstructionId) -> Option<ThreadId> {
        self.thread_by_join.get(&instruction).copied()
    }

    /// Row counts of every table.
    pub fn table_counts(&self) -> Vec<TableInfo> {
        [
            (ACCESS_TABLE, self.accesses.len()),
            (CALL_TABLE, self.calls.len()),
            (FILE_TABLE, self.files.len()),
            (FUNCTION_TABLE, self.functions.len()),
            (INSTRUCTION_TABLE, self.instructions.len()),
            (LOOP_TABLE, self.loops.len()),
            (REFERENCE_TABLE, self.references.len()),
            (SEGMENT_TABLE, self.segments.len()),
            (THREAD_TABLE, self.threads.len()),
        ]
        .into_iter()
        .map(|(name, count)| TableInfo {
            name: name.to_string(),
            row_count: count as u64,
        })
        .collect()
    }

    fn load_files(&mut self, conn: &Connection) -> Result<()> {
        for_each_row(conn, FILE_TABLE, "id, file_path", |row| {
            let file = FileRecord::new(row.get(0)?, row.get::<_, String>(1)?);
            self.files.insert(file.id, file);
            Ok(())
        })
    }

    fn load_functions(&mut self, conn: &Connection) -> Result<()> {
        for_each_row(
            conn,
            FUNCTION_TABLE,
            "id, signature, type, file_id, line_number",
            |row| {
                let function = FunctionRecord {
                    id: row.get(0)?,
                    signature: row.get(1)?,
                    kind: FunctionKind::from_bits_retain(row.get::<_, u32>(2)?),
                    file_id: row.get(3)?,
                    line: row.get(4)?,
                };
                self.functions.insert(function.id, function);
                Ok(())
            },
        )
    }

    fn load_calls(&mut self, conn: &Connection) -> Result<()> {
        for_each_row(
            conn,
            CALL_TABLE,
            "id, thread_id, function_id, instruction_id, start_time, end_time",
            |row| {
                let call = CallRecord {
                    id: row.get(0)?,
                    thread_id: row.get(1)?,
                    function_id: row.get(2)?,
                    instruction_id: row.get(3)?,
                    start_time: time_at(row, 4)?,
                    end_time: time_at(row, 5)?,
                };
                if let Some(instruction) = call.instruction_id {
                    self.call_by_instruction.insert(instruction, call.id);
                }
                self.calls.insert(call.id, call);
                Ok(())
            },
        )
    }

    fn load_segments(&mut self, conn: &Connection) -> Result<()> {
        for_each_row(
            conn,
            SEGMENT_TABLE,
            "id, call_id, segment_type, loop_pointer",
            |row| {
                let segment = SegmentRecord {
                    id: row.get(0)?,
                    call_id: row.get(1)?,
                    kind: SegmentKind::from_code(row.get(2)?),
                    loop_id: row.get(3)?,
                };
                self.segments.insert(segment.id, segment);
                Ok(())
            },
        )
    }

    fn load_instructions(&mut self, conn: &Connection) -> Result<()> {
        let columns = if column_exists(conn, INSTRUCTION_TABLE, "timestamp")? {
            "id, segment_id, instruction_type, line_number, timestamp"
        } else {
            "id, segment_id, instruction_type, line_number, NULL"
        };
        for_each_row(conn, INSTRUCTION_TABLE, columns, |row| {
            let timestamp = match row.get_ref(4)? {
                ValueRef::Null => None,
                _ => Some(time_at(row, 4)?),
            };
            let instruction = InstructionRecord {
                id: row.get(0)?,
                segment_id: row.get(1)?,
                kind: InstructionKind::from_tag(&tag_at(row, 2)?),
                line: row.get(3)?,
                timestamp,
            };
            self.instructions.insert(instruction.id, instruction);
            Ok(())
        })
    }

    fn load_references(&mut self, conn: &Connection) -> Result<()> {
        for_each_row(
            conn,
            REFERENCE_TABLE,
            "id, name, size, memory_type, alloc_instruction_id",
            |row| {
                let storage = match row.get_ref(3)? {
                    ValueRef::Integer(code) => StorageClass::from_code(code),
                    ValueRef::Text(text) => std::str::from_utf8(text)
                        .ok()
                        .and_then(|s| s.parse().ok()),
                    _ => None,
                }
                .ok_or_else(|| invalid_column(3, "memory_type", Type::Text))?;

                let reference = ReferenceRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    size: row.get(2)?,
                    storage,
                    alloc_instruction: row.get(4)?,
                };
                self.references.insert(reference.id, reference);
                Ok(())
            },
        )
    }

    fn load_accesses(&mut self, conn: &Connection) -> Result<()> {
        for_each_row(
            conn,
            ACCESS_TABLE,
            "id, instruction_id, position, reference_id, access_type, memory_state",
            |row| {
                let access = AccessRecord {
                    id: row.get(0)?,
                    instruction_id: row.get(1)?,
                    position: row.get(2)?,
                    reference_id: row.get(3)?,
                    kind: AccessKind::from_tag(&tag_at(row, 4)?),
                    memory_state: row.get(5)?,
                };
                self.accesses_by_instruction
                    .entry(access.instruction_id)
                    .or_default()
                    .push(access.id);
                self.accesses.insert(access.id, access);
                Ok(())
            },
        )?;

        let accesses = &self.accesses;
        for ids in self.accesses_by_instruction.values_mut() {
            ids.sort_by_key(|id| (accesses[id].position, *id));
        }
        Ok(())
    }

    fn load_threads(&mut self, conn: &Connection) -> Result<()> {
        for_each_row(
            conn,
            THREAD_TABLE,
            "id, start_time, end_time, num_cycles, create_instruction_id, \
             join_instruction_id, parent_thread_id, process_id",
            |row| {
                let thread = ThreadRecord {
                    id: row.get(0)?,
                    start_time: time_at(row, 1)?,
                    end_time: time_at(row, 2)?,
                    num_cycles: row.get(3)?,
                    create_instruction: row.get(4)?,
                    join_instruction: row.get(5)?,
                    parent_thread: row.get(6)?,
                    process_id: row.get::<_, Option<ProcessId>>(7)?.unwrap_or_default(),
                };
                if let Some(instruction) = thread.create_instruction {
                    self.thread_by_create.insert(instruction, thread.id);
                }
                if let Some(instruction) = thread.join_instruction {
                    self.thread_by_join.insert(instruction, thread.id);
                }
                self.threads.insert(thread.id, thread);
                Ok(())
            },
        )
    }

    fn load_loops(&mut self, conn: &Connection) -> Result<()> {
        for_each_row(conn, LOOP_TABLE, "id, line_number", |row| {
            let record = LoopRecord {
                id: row.get(0)?,
                line: row.get(1)?,
            };
            self.loops.insert(record.id, record);
            Ok(())
        })
    }
}

/// Run `f` on every row of `SELECT {columns} FROM {table}`, in id order.
fn for_each_row<F>(conn: &Connection, table: &str, columns: &str, mut f: F) -> Result<()>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<()>,
{
    let sql = format!("SELECT {columns} FROM \"{table}\" ORDER BY id");
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("Failed to prepare query on {table}"))?;
    let mut rows = stmt
        .query([])
        .with_context(|| format!("Failed to query {table}"))?;

    while let Some(row) = rows
        .next()
        .with_context(|| format!("Iterating {table} failed"))?
    {
        f(row).with_context(|| format!("Failed to decode row of {table}"))?;
    }
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_exists(conn: &Connection, table_name: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table_name}\")"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn invalid_column(idx: usize, name: &str, ty: Type) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.to_string(), ty)
}

/// Decode a time column stored either as integer ticks or as a time string.
fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Time> {
    match row.get_ref(idx)? {
        ValueRef::Integer(ticks) if ticks >= 0 => Ok(ticks as Time),
        ValueRef::Text(text) => std::str::from_utf8(text)
            .ok()
            .and_then(parse_time_string)
            .ok_or_else(|| invalid_column(idx, "time", Type::Text)),
        other => Err(invalid_column(idx, "time", other.data_type())),
    }
}

/// Decode a tag column stored either as text or as an integer code.
fn tag_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    match row.get_ref(idx)? {
        ValueRef::Integer(code) => Ok(code.to_string()),
        ValueRef::Text(text) => Ok(String::from_utf8_lossy(text).into_owned()),
        other => Err(invalid_column(idx, "tag", other.data_type())),
    }
}
