//! Agent types.

use crate::ids::{AgentId, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    /// Capability labels; a job's labels must all be present to match.
    pub labels: Vec<String>,
    pub status: AgentStatus,
    pub current_job: Option<JobId>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn matches_labels(&self, required: &[String]) -> bool {
        required.iter().all(|label| self.labels.contains(label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

impl AgentStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, AgentStatus::Idle)
    }

    /// Idle or Busy: counted as a live agent by the dashboard footer.
    pub fn is_live(&self) -> bool {
        !matches!(self, AgentStatus::Offline)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(labels: Vec<&str>) -> Agent {
        Agent {
            id: AgentId::new(),
            name: "agent-1".into(),
            labels: labels.into_iter().map(String::from).collect(),
            status: AgentStatus::Idle,
            current_job: None,
            registered_at: Utc::now(),
            last_heartbeat_at: None,
        }
    }

    #[test]
    fn test_label_matching() {
        let a = agent(vec!["linux", "docker"]);
        assert!(a.matches_labels(&["linux".into()]));
        assert!(a.matches_labels(&[]));
        assert!(!a.matches_labels(&["macos".into()]));
    }

    #[test]
    fn test_live_statuses() {
        assert!(AgentStatus::Idle.is_live());
        assert!(AgentStatus::Busy.is_live());
        assert!(!AgentStatus::Offline.is_live());
        assert!(!AgentStatus::Busy.is_available());
    }
}
