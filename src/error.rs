use std::fmt;
use std::path::PathBuf;

use crate::trace::Time;

/// Kind of trace entity named by a dangling foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Access,
    Call,
    File,
    Function,
    Instruction,
    Reference,
    Segment,
    Thread,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Access => "access",
            Entity::Call => "call",
            Entity::File => "file",
            Entity::Function => "function",
            Entity::Instruction => "instruction",
            Entity::Reference => "reference",
            Entity::Segment => "segment",
            Entity::Thread => "thread",
        })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to load trace {}: {reason}", path.display())]
    TraceLoadFailure { path: PathBuf, reason: String },

    #[error("{entity} {id} not found (referenced by {context})")]
    DanglingReference {
        entity: Entity,
        id: i64,
        context: String,
    },

    #[error("causality violation in {context}: time went backwards from {from} to {to}")]
    CausalityViolation {
        context: &'static str,
        from: Time,
        to: Time,
    },

    #[error("span is zero, parallelism is undefined")]
    DegenerateSpan,

    #[error("unbalanced frame stack: {context}")]
    UnbalancedStack { context: String },
}

impl ReplayError {
    pub fn dangling(entity: Entity, id: i64, context: impl Into<String>) -> Self {
        ReplayError::DanglingReference {
            entity,
            id,
            context: context.into(),
        }
    }

    /// Recoverable errors skip the offending record; everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ReplayError::DanglingReference { .. })
    }
}

/// Time elapsed from `from` to `to`, refusing to go backwards.
pub fn elapsed(from: Time, to: Time, context: &'static str) -> Result<Time, ReplayError> {
    to.checked_sub(from)
        .ok_or(ReplayError::CausalityViolation { context, from, to })
}
