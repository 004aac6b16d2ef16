//! Status-change events published on the engine bus.
//!
//! Every observable transition in the engine is an event; the status
//! aggregator, dashboards, and webhook bridges all consume the same
//! contract. Subjects follow NATS conventions so subscribers can filter
//! with wildcard patterns (`run.>`, `agent.*.offline`).

use crate::ids::{AgentId, JobId, PipelineId, RunId, StageId};
use crate::logs::Artifact;
use crate::pipeline::TriggerType;
use crate::run::{JobStatus, LiveCounters, RunStatus, RunStatusSnapshot, StageStatus};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// All events in the Gantry engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Run lifecycle
    RunQueued(RunQueuedPayload),
    RunStarted(RunStartedPayload),
    RunCompleted(RunCompletedPayload),
    RunCancelled(RunCancelledPayload),

    // Stage lifecycle
    StageStarted(StageStartedPayload),
    StageCompleted(StageCompletedPayload),

    // Job lifecycle
    JobDispatched(JobDispatchedPayload),
    JobStarted(JobStartedPayload),
    JobCompleted(JobCompletedPayload),
    JobRetried(JobRetriedPayload),

    // Agents
    AgentRegistered(AgentRegisteredPayload),
    AgentOffline(AgentOfflinePayload),

    // Artifacts
    ArtifactRegistered(ArtifactRegisteredPayload),

    // Counters
    CountersUpdated(LiveCounters),
}

impl Event {
    /// Returns the bus subject for this event.
    pub fn subject(&self) -> String {
        match self {
            Event::RunQueued(p) => format!("run.queued.{}", p.pipeline_id),
            Event::RunStarted(p) => format!("run.started.{}", p.run_id),
            Event::RunCompleted(p) => format!("run.completed.{}", p.run_id),
            Event::RunCancelled(p) => format!("run.cancelled.{}", p.run_id),
            Event::StageStarted(p) => format!("run.{}.stage.{}.started", p.run_id, p.stage),
            Event::StageCompleted(p) => format!("run.{}.stage.{}.completed", p.run_id, p.stage),
            Event::JobDispatched(p) => format!("run.{}.job.{}.dispatched", p.run_id, p.job_id),
            Event::JobStarted(p) => format!("run.{}.job.{}.started", p.run_id, p.job_id),
            Event::JobCompleted(p) => format!("run.{}.job.{}.completed", p.run_id, p.job_id),
            Event::JobRetried(p) => format!("run.{}.job.{}.retried", p.run_id, p.job_id),
            Event::AgentRegistered(_) => "agent.registered".to_string(),
            Event::AgentOffline(p) => format!("agent.{}.offline", p.agent_id),
            Event::ArtifactRegistered(p) => format!("job.{}.artifact", p.job_id),
            Event::CountersUpdated(_) => "counters.updated".to_string(),
        }
    }

    /// The run this event belongs to, if any.
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            Event::RunQueued(p) => Some(p.run_id),
            Event::RunStarted(p) => Some(p.run_id),
            Event::RunCompleted(p) => Some(p.run_id),
            Event::RunCancelled(p) => Some(p.run_id),
            Event::StageStarted(p) => Some(p.run_id),
            Event::StageCompleted(p) => Some(p.run_id),
            Event::JobDispatched(p) => Some(p.run_id),
            Event::JobStarted(p) => Some(p.run_id),
            Event::JobCompleted(p) => Some(p.run_id),
            Event::JobRetried(p) => Some(p.run_id),
            _ => None,
        }
    }
}

// === Run Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunQueuedPayload {
    pub run_id: RunId,
    pub pipeline_id: PipelineId,
    pub pipeline_name: String,
    pub run_number: u32,
    pub trigger: TriggerType,
    /// Initial materialized tree, so observers never read engine state
    /// directly.
    pub snapshot: RunStatusSnapshot,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub status: RunStatus,
    pub duration_ms: Option<u64>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCancelledPayload {
    pub run_id: RunId,
    pub cancelled_by: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

// === Stage Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageStartedPayload {
    pub run_id: RunId,
    pub stage: StageId,
    pub stage_index: u32,
    pub job_count: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageCompletedPayload {
    pub run_id: RunId,
    pub stage: StageId,
    pub stage_index: u32,
    pub status: StageStatus,
    pub duration_ms: Option<u64>,
    pub completed_at: DateTime<Utc>,
}

// === Job Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDispatchedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub job_name: String,
    pub agent_id: AgentId,
    pub attempt: u32,
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStartedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobCompletedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub job_name: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub failure: Option<String>,
    pub duration_ms: Option<u64>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRetriedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub attempt: u32,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

// === Agent Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentRegisteredPayload {
    pub agent_id: AgentId,
    pub name: String,
    pub labels: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentOfflinePayload {
    pub agent_id: AgentId,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

// === Artifact Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRegisteredPayload {
    pub run_id: Option<RunId>,
    pub job_id: JobId,
    pub artifact: Artifact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_subject_contains_run_and_job() {
        let run_id = RunId::new();
        let job_id = JobId::new();
        let event = Event::JobStarted(JobStartedPayload {
            run_id,
            job_id,
            started_at: Utc::now(),
        });
        let subject = event.subject();
        assert!(subject.starts_with(&format!("run.{run_id}.job.{job_id}")));
        assert!(subject.ends_with(".started"));
    }

    #[test]
    fn test_counters_have_no_run() {
        let event = Event::CountersUpdated(LiveCounters {
            active_agents: 5,
            queue_length: 4,
            last_updated: Utc::now(),
        });
        assert_eq!(event.subject(), "counters.updated");
        assert!(event.run_id().is_none());
    }
}
