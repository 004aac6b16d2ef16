//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the engine and its external
//! collaborators. The engine owns orchestration; everything behind a port
//! (persistence, transport, actual execution, blob storage) is an adapter.

use crate::error::Result;
use crate::events::Event;
use crate::ids::{JobId, PipelineId, RepositoryId, RunId};
use crate::logs::{Artifact, ArtifactDescriptor, LogChunk};
use crate::pipeline::{CommandSpec, DefinitionSnapshot, Pipeline, PipelineDefinition};
use crate::repo::{Branch, Repository};
use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

/// Stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Stream of log chunks; finite once the job's log is sealed.
pub type LogStream = Pin<Box<dyn Stream<Item = LogChunk> + Send>>;

/// Event bus for publishing and subscribing to events.
///
/// Pattern syntax follows NATS subjects: `*` matches one token,
/// `>` matches the rest (`run.*.started`, `agent.>`).
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;

    async fn subscribe(&self, pattern: &str) -> Result<EventStream>;
}

/// Versioned pipeline definition persistence.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Create a new pipeline at version 1.
    async fn create(
        &self,
        repository_id: RepositoryId,
        definition: PipelineDefinition,
        created_by: Option<String>,
    ) -> Result<Pipeline>;

    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>>;

    /// Saved pipelines for a repository, newest first.
    async fn list(&self, repository_id: RepositoryId) -> Result<Vec<Pipeline>>;

    /// Replace the definition, bumping the version. In-flight runs keep
    /// the version they bound at trigger time.
    async fn update(
        &self,
        id: PipelineId,
        definition: PipelineDefinition,
        updated_by: Option<String>,
    ) -> Result<Pipeline>;

    /// Atomically pin the current version for a new run. Fails with
    /// `DefinitionLocked` while an edit lock is held.
    async fn resolve(&self, id: PipelineId) -> Result<DefinitionSnapshot>;

    /// Take the edit lock; `resolve` is rejected until `unlock`.
    async fn lock(&self, id: PipelineId) -> Result<()>;

    async fn unlock(&self, id: PipelineId) -> Result<()>;
}

/// Repository/branch directory (source-control integration stays external).
#[async_trait]
pub trait RepositoryDirectory: Send + Sync {
    async fn create_repository(&self, name: &str) -> Result<Repository>;

    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    async fn create_branch(&self, repository_id: RepositoryId, name: &str) -> Result<Branch>;

    async fn list_branches(&self, repository_id: RepositoryId) -> Result<Vec<Branch>>;
}

/// Per-job append-only log channel and artifact registry.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Append a chunk, returning its sequence number. Fails with
    /// `JobTerminal` once the job's log is sealed.
    async fn append(&self, job_id: JobId, content: &str) -> Result<u64>;

    /// Replay stored chunks from `from_seq`, then follow live appends.
    /// The stream ends once the log is sealed and drained; reconnecting
    /// observers resume by offset.
    async fn tail(&self, job_id: JobId, from_seq: u64) -> Result<LogStream>;

    /// Seal the log; called by the scheduler when the job goes terminal.
    async fn seal(&self, job_id: JobId) -> Result<()>;

    /// Re-open a sealed log when a terminally failed job is manually
    /// retried; new attempts append after the existing chunks.
    async fn reopen(&self, job_id: JobId) -> Result<()>;

    /// Attach artifact metadata; binary storage is an external collaborator.
    async fn register_artifact(
        &self,
        job_id: JobId,
        descriptor: ArtifactDescriptor,
    ) -> Result<Artifact>;

    async fn artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>>;

    /// Regex search over stored chunks.
    async fn search(&self, job_id: JobId, pattern: &str) -> Result<Vec<LogChunk>>;
}

/// What the engine hands an executor for one job attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub run_id: RunId,
    pub job_id: JobId,
    pub job_name: String,
    pub command: CommandSpec,
    pub attempt: u32,
    pub variables: HashMap<String, String>,
}

/// Executor-reported result of one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub message: Option<String>,
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            message: None,
        }
    }

    pub fn failure(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// External execution capability. The engine dispatches, awaits, and
/// interprets outcomes; it never runs build steps itself.
///
/// `cancel` flips to `true` when the run is cancelled; a well-behaved
/// executor winds down promptly. Logs are streamed through the sink under
/// the request's job id.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest,
        logs: Arc<dyn LogSink>,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionOutcome>;
}
