//! Replay configuration.

/// Configuration for a replay run.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Abort on the first dangling foreign key instead of skipping the record.
    pub strict: bool,

    /// Number of dangling references logged at warn level before the rest are
    /// demoted to debug. All of them are still counted.
    pub max_reported_warnings: usize,

    /// At the end of the trace, return still-open calls and end still-live
    /// threads, innermost first, using their recorded end times. When false,
    /// a trace that leaves anything open fails to finalize.
    pub unwind_at_end: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            strict: false,
            max_reported_warnings: 20,
            unwind_at_end: true,
        }
    }
}
