//! Error type shared by every store operation.

use locus_types::{MemId, NodeKind};
use thiserror::Error;

/// Errors that can arise from memory store operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A lookup whose caller requires a result found nothing.
    #[error("Memory not found: {0}")]
    NotFound(MemId),
    /// Snapshot requested for an entity that does not exist.
    #[error("No such memory: {0}")]
    NoSuchMemory(MemId),
    /// Ambiguous, empty or dangling subject/object reference.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
    #[error("Memory {id} is a {actual}, expected {expected}")]
    KindMismatch {
        id: MemId,
        expected: NodeKind,
        actual: NodeKind,
    },
    /// `pop` on a ledger with no active task.
    #[error("Task stack is empty")]
    EmptyStack,
    #[error("Task {task} has multiple parents: {parents:?}")]
    MultipleParents { task: MemId, parents: Vec<MemId> },
    /// Finished tasks are immutable.
    #[error("Task {0} is already finished")]
    TaskFinished(MemId),
    #[error("Memory {0} is reserved and cannot be removed")]
    ReservedEntity(MemId),
    #[error("Memory lock poisoned")]
    Poisoned,
}

impl MemoryError {
    /// Whether the error can be reported to a speaker as a sentence instead
    /// of being escalated to the hosting process.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            MemoryError::NotFound(_) | MemoryError::InvalidReference(_)
        )
    }

    /// Natural-language rendering for user-facing errors.
    pub fn user_message(&self) -> Option<String> {
        match self {
            MemoryError::NotFound(_) => Some("I can't find that in my memory.".to_string()),
            MemoryError::InvalidReference(what) => {
                Some(format!("I don't understand what you are referring to: {what}"))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lookup_errors_are_user_facing() {
        assert!(MemoryError::NotFound(MemId::self_id()).is_user_facing());
        assert!(MemoryError::InvalidReference("x".into()).is_user_facing());
        assert!(!MemoryError::EmptyStack.is_user_facing());
        assert!(!MemoryError::Poisoned.is_user_facing());
        assert!(MemoryError::EmptyStack.user_message().is_none());
    }
}
