/// SQL schema for the trace store
///
/// This schema mirrors the relational layout produced by the capture tool: one
/// table per entity, rows referencing each other only through integer foreign
/// keys. Foreign keys are intentionally not enforced; a broken reference is a
/// property of the recorded trace that the interpreter must tolerate.

pub const SCHEMA_VERSION: i32 = 1;

/// SQL schema for trace store files
pub const SCHEMA_SQL: &str = r#"
-- ============================================================================
-- Schema Version Tracking
-- ============================================================================

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    description TEXT
);

INSERT INTO schema_version (version, description)
VALUES (1, 'Initial schema');

-- ============================================================================
-- Static Program Structure
-- ============================================================================

CREATE TABLE IF NOT EXISTS File (
    id INTEGER PRIMARY KEY,
    file_path TEXT NOT NULL
);

-- type is a bitmask over the function kinds (entry routine, fork, ...)
CREATE TABLE IF NOT EXISTS Function (
    id INTEGER PRIMARY KEY,
    signature TEXT NOT NULL,
    type INTEGER NOT NULL DEFAULT 4,
    file_id INTEGER NOT NULL,
    line_number INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS Loop (
    id INTEGER PRIMARY KEY,
    line_number INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS Reference (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    memory_type TEXT NOT NULL,
    alloc_instruction_id INTEGER
);

-- ============================================================================
-- Dynamic Execution
-- ============================================================================

-- Times are clock ticks, or text of the form YYYY-MM-DDThh:mm:ss.<ticks>Z
CREATE TABLE IF NOT EXISTS Thread (
    id INTEGER PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    num_cycles INTEGER NOT NULL DEFAULT 0,
    create_instruction_id INTEGER,
    join_instruction_id INTEGER,
    parent_thread_id INTEGER,
    process_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS Call (
    id INTEGER PRIMARY KEY,
    thread_id INTEGER NOT NULL,
    function_id INTEGER NOT NULL,
    instruction_id INTEGER,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS Segment (
    id INTEGER PRIMARY KEY,
    call_id INTEGER NOT NULL,
    segment_type INTEGER NOT NULL DEFAULT 0,
    loop_pointer INTEGER
);

CREATE TABLE IF NOT EXISTS Instruction (
    id INTEGER PRIMARY KEY,
    segment_id INTEGER NOT NULL,
    instruction_type TEXT NOT NULL,
    line_number INTEGER NOT NULL DEFAULT 0,
    timestamp INTEGER
);

CREATE TABLE IF NOT EXISTS Access (
    id INTEGER PRIMARY KEY,
    instruction_id INTEGER NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    reference_id INTEGER NOT NULL,
    access_type TEXT NOT NULL,
    memory_state INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_access_instruction ON Access(instruction_id);
CREATE INDEX IF NOT EXISTS idx_call_instruction ON Call(instruction_id);
CREATE INDEX IF NOT EXISTS idx_segment_call ON Segment(call_id);
"#;

/// Creates the complete schema in the provided SQLite connection
///
/// # Arguments
/// * `conn` - SQLite connection to create the schema in
///
/// # Returns
/// * `Ok(())` on success
/// * `Err` if schema creation fails
pub fn create_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
