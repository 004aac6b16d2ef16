//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline configuration. A
//! definition is inert and versioned; a run binds to exactly one version at
//! trigger time, so in-flight runs are unaffected by later edits.

use crate::ids::{PipelineId, RepositoryId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub stages: Vec<StageTemplate>,
    #[serde(default = "default_timeout_secs")]
    pub default_job_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    1800
}

impl PipelineDefinition {
    pub fn job_count(&self) -> usize {
        self.stages.iter().map(|s| s.jobs.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageTemplate {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub jobs: Vec<JobTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobTemplate {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub command: CommandSpec,
    /// Capability labels an agent must carry to run this job.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Advisory duration shown by dashboards; not used for scheduling.
    #[serde(default)]
    pub estimated_duration_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// Opaque command descriptor handed to the executor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay")]
    pub delay_seconds: u32,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_delay() -> u32 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Push,
    Manual,
    SavedPipeline,
    Api,
}

/// Metadata describing what requested a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerMeta {
    pub trigger_type: TriggerType,
    pub branch: Option<String>,
    /// Pre-validated caller identity; the engine does no authentication.
    pub actor: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

impl TriggerMeta {
    pub fn manual(actor: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            branch: None,
            actor: Some(actor.into()),
            triggered_at: Utc::now(),
        }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Push,
            branch: Some(branch.into()),
            actor: None,
            triggered_at: Utc::now(),
        }
    }
}

/// A stored, versioned pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Pipeline {
    pub id: PipelineId,
    pub repository_id: RepositoryId,
    pub version: u32,
    pub definition: PipelineDefinition,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable definition version pinned at trigger time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DefinitionSnapshot {
    pub pipeline_id: PipelineId,
    pub version: u32,
    pub definition: PipelineDefinition,
    pub resolved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_defaults_from_yaml() {
        let yaml = r#"
name: web-app
stages:
  - name: build
    jobs:
      - name: compile
        command:
          program: make
          args: ["all"]
"#;
        let def: PipelineDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.default_job_timeout_secs, 1800);
        assert_eq!(def.job_count(), 1);
        assert!(def.stages[0].jobs[0].retry.is_none());
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_seconds, 10);
    }
}
