use sextant_checkpoint::CheckpointError;
use sextant_knowledge::KnowledgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An external command could not run or exited non-zero.
    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("Unexpected output from `{command}`: {message}")]
    Parse { command: String, message: String },
}

pub type Result<T> = std::result::Result<T, HookError>;
