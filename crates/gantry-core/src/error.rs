//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Admission errors: rejected before any run state is created.
    #[error("Definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("Definition locked for editing: {0}")]
    DefinitionLocked(String),

    #[error("Pipeline has no stages: {0}")]
    EmptyPipeline(String),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Repository already exists: {0}")]
    RepositoryExists(String),

    #[error("Branch already exists: {repository}/{name}")]
    BranchExists { repository: String, name: String },

    // Execution errors: retried per policy, then terminal.
    #[error("Executor failed with exit code {exit_code}: {message}")]
    ExecutorFailure { exit_code: i32, message: String },

    #[error("Agent lost: {0}")]
    AgentLost(String),

    #[error("Job timeout after {seconds}s")]
    JobTimeout { seconds: u64 },

    // Integrity errors: contract violations, never retried.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Job already terminal: {0}")]
    JobTerminal(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Run is still active: {0}")]
    RunActive(String),

    // Infrastructure errors
    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors rejected at admission time; the caller may retry
    /// with corrected input.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Error::DefinitionNotFound(_)
                | Error::DefinitionLocked(_)
                | Error::EmptyPipeline(_)
                | Error::RepositoryNotFound(_)
                | Error::RepositoryExists(_)
                | Error::BranchExists { .. }
        )
    }

    /// True for failures during job execution, eligible for retry policy.
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Error::ExecutorFailure { .. } | Error::AgentLost(_) | Error::JobTimeout { .. }
        )
    }

    /// True for contract violations; never retried, never silently ignored.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::RunNotFound(_)
                | Error::JobNotFound(_)
                | Error::AgentNotFound(_)
                | Error::JobTerminal(_)
                | Error::InvalidTransition { .. }
                | Error::RunActive(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
