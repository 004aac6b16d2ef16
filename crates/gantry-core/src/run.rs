//! Run and execution types.
//!
//! A `PipelineRun` is the live instantiation of one definition version: an
//! ownership tree of stage instances, each owning job instances. Job status
//! is the only mutable execution state; stage and run statuses are derived
//! by the rollup reducer and appear only on snapshots.

use crate::ids::{AgentId, ArtifactId, JobId, PipelineId, RunId, StageId};
use crate::pipeline::{CommandSpec, DefinitionSnapshot, TriggerMeta};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineRun {
    pub id: RunId,
    pub pipeline_id: PipelineId,
    pub pipeline_name: String,
    pub definition_version: u32,
    pub run_number: u32,
    pub trigger: TriggerMeta,
    pub variables: HashMap<String, String>,
    pub stages: Vec<StageInstance>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Materialize the instance tree from a pinned definition version.
    pub fn materialize(snapshot: &DefinitionSnapshot, run_number: u32, trigger: TriggerMeta) -> Self {
        let now = Utc::now();
        let stages = snapshot
            .definition
            .stages
            .iter()
            .map(|stage| StageInstance {
                id: StageId::new(&stage.name),
                name: stage.name.clone(),
                jobs: stage
                    .jobs
                    .iter()
                    .map(|job| {
                        // Definition-level variables, overridden per job.
                        let mut variables = snapshot.definition.variables.clone();
                        variables.extend(job.variables.clone());
                        JobInstance {
                            id: JobId::new(),
                            name: job.name.clone(),
                            stage: StageId::new(&stage.name),
                            status: JobStatus::Queued,
                            command: job.command.clone(),
                            labels: job.labels.clone(),
                            variables,
                            estimated_duration_secs: job.estimated_duration_secs,
                            timeout_secs: Some(
                                job.timeout_secs
                                    .unwrap_or(snapshot.definition.default_job_timeout_secs),
                            ),
                            attempts: 0,
                            max_attempts: job.retry.as_ref().map(|r| r.max_attempts).unwrap_or(1),
                            retry_delay_secs: job.retry.as_ref().map(|r| r.delay_seconds).unwrap_or(0),
                            agent_id: None,
                            failure: None,
                            artifacts: vec![],
                            queued_at: now,
                            started_at: None,
                            completed_at: None,
                        }
                    })
                    .collect(),
                started_at: None,
                completed_at: None,
            })
            .collect();

        Self {
            id: RunId::new(),
            pipeline_id: snapshot.pipeline_id,
            pipeline_name: snapshot.definition.name.clone(),
            definition_version: snapshot.version,
            run_number,
            trigger,
            variables: snapshot.definition.variables.clone(),
            stages,
            queued_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn job(&self, job_id: JobId) -> Option<&JobInstance> {
        self.stages.iter().flat_map(|s| s.jobs.iter()).find(|j| j.id == job_id)
    }

    pub fn job_mut(&mut self, job_id: JobId) -> Option<&mut JobInstance> {
        self.stages
            .iter_mut()
            .flat_map(|s| s.jobs.iter_mut())
            .find(|j| j.id == job_id)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// One stage of a run. Status is derived from the jobs, never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageInstance {
    pub id: StageId,
    pub name: String,
    pub jobs: Vec<JobInstance>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageInstance {
    pub fn all_terminal(&self) -> bool {
        self.jobs.iter().all(|j| j.status.is_terminal())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobInstance {
    pub id: JobId,
    pub name: String,
    pub stage: StageId,
    pub status: JobStatus,
    pub command: CommandSpec,
    pub labels: Vec<String>,
    pub variables: HashMap<String, String>,
    pub estimated_duration_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub retry_delay_secs: u32,
    pub agent_id: Option<AgentId>,
    /// Human-readable failure reason; raw executor output lives in the log.
    pub failure: Option<String>,
    pub artifacts: Vec<ArtifactId>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobInstance {
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    pub fn retries_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Dispatched,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }

    /// Dispatched or Running: the job occupies an agent.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Dispatched | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded
                | StageStatus::Failed
                | StageStatus::Cancelled
                | StageStatus::Skipped
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

// === Observer snapshots ===

/// Point-in-time view of a run, with derived stage and run statuses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunStatusSnapshot {
    pub run_id: RunId,
    pub pipeline_id: PipelineId,
    pub pipeline_name: String,
    pub run_number: u32,
    pub status: RunStatus,
    pub trigger: TriggerMeta,
    pub stages: Vec<StageSnapshot>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageSnapshot {
    pub id: StageId,
    pub name: String,
    pub status: StageStatus,
    pub jobs: Vec<JobSummary>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub agent_id: Option<AgentId>,
    pub attempts: u32,
    pub failure: Option<String>,
    pub estimated_duration_secs: Option<u64>,
    pub duration_ms: Option<u64>,
}

/// Footer counters consumed by dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LiveCounters {
    pub active_agents: usize,
    pub queue_length: usize,
    pub last_updated: DateTime<Utc>,
}
