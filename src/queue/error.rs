//! Task queue error taxonomy.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("task {0} is already in a terminal state and cannot be mutated")]
    TerminalState(Uuid),

    #[error("backing store unavailable, falling back to in-memory: {0}")]
    StoreDegraded(String),

    #[error("backing store error: {0}")]
    Store(String),
}
