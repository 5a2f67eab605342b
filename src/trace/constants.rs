//! Shared constants for trace processing.
//!
//! Table names, instruction-kind tags and the timestamp pattern used when a
//! time column is stored as text rather than as an integer tick count.

use std::sync::LazyLock;

use regex::Regex;

use super::ids::Time;

/// Names of the trace store tables, in load order.
pub const ACCESS_TABLE: &str = "Access";
pub const CALL_TABLE: &str = "Call";
pub const FILE_TABLE: &str = "File";
pub const FUNCTION_TABLE: &str = "Function";
pub const INSTRUCTION_TABLE: &str = "Instruction";
pub const LOOP_TABLE: &str = "Loop";
pub const REFERENCE_TABLE: &str = "Reference";
pub const SEGMENT_TABLE: &str = "Segment";
pub const THREAD_TABLE: &str = "Thread";

pub const ALL_TABLES: [&str; 9] = [
    ACCESS_TABLE,
    CALL_TABLE,
    FILE_TABLE,
    FUNCTION_TABLE,
    INSTRUCTION_TABLE,
    LOOP_TABLE,
    REFERENCE_TABLE,
    SEGMENT_TABLE,
    THREAD_TABLE,
];

/// Instruction kind tags as written by the capture tool. The second name of
/// each pair is an accepted alias.
pub const TAG_CALL: &str = "CALL";
pub const TAG_RETURN: &str = "RETURN";
pub const TAG_ACCESS: &str = "ACCESS";
pub const TAG_ACQUIRE: [&str; 2] = ["CSENTER", "ACQUIRE"];
pub const TAG_RELEASE: [&str; 2] = ["CSLEAVE", "RELEASE"];
pub const TAG_FORK: [&str; 2] = ["THRCREATE", "FORK"];
pub const TAG_JOIN: [&str; 2] = ["THRJOIN", "JOIN"];

/// Textual timestamps look like `2016-06-17T10:21:33.123456Z`; the fractional
/// component is the tick count in the trace clock.
pub static TIME_STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.)?(\d+)Z?$")
        .expect("Invalid time string regex pattern")
});

/// Decode a textual timestamp into clock ticks.
pub fn parse_time_string(s: &str) -> Option<Time> {
    TIME_STRING_RE
        .captures(s.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
