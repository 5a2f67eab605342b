//! Strongly-typed identifiers for trace entities.
//!
//! Every table in the trace store is keyed by its own integer id type. They all
//! share the same representation, but they are deliberately distinct types so
//! that an instruction id can never be used to look up a call, a segment id can
//! never be used as a thread id, and so on.

use std::fmt;

use serde::Serialize;

macro_rules! trace_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw integer value as stored in the trace database.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.0))
            }
        }
    };
}

trace_id!(
    /// Row id of the `Access` table.
    AccessId,
    "access"
);
trace_id!(
    /// Row id of the `Call` table.
    CallId,
    "call"
);
trace_id!(
    /// Row id of the `File` table.
    FileId,
    "file"
);
trace_id!(
    /// Row id of the `Function` table.
    FunctionId,
    "function"
);
trace_id!(
    /// Row id of the `Instruction` table. Ascending ids are trace order.
    InstructionId,
    "instruction"
);
trace_id!(
    /// Row id of the `Loop` table.
    LoopId,
    "loop"
);
trace_id!(
    /// Row id of the `Reference` table.
    ReferenceId,
    "reference"
);
trace_id!(
    /// Row id of the `Segment` table.
    SegmentId,
    "segment"
);
trace_id!(
    /// Row id of the `Thread` table.
    ThreadId,
    "thread"
);
trace_id!(
    /// Operating-system process id that owned a traced thread.
    ProcessId,
    "process"
);

/// Timestamp or duration in the trace's native clock.
pub type Time = u64;
