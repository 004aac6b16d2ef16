//! Agent pool.
//!
//! Owned exclusively by the scheduler task, so no internal locking: every
//! acquire/release/heartbeat is already serialized through the command
//! channel.

use chrono::Utc;
use gantry_core::agent::{Agent, AgentRegistration, AgentStatus};
use gantry_core::ids::{AgentId, JobId};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Default)]
pub struct AgentPool {
    agents: HashMap<AgentId, Agent>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: AgentRegistration) -> Agent {
        let agent = Agent {
            id: AgentId::new(),
            name: registration.name,
            labels: registration.labels,
            status: AgentStatus::Idle,
            current_job: None,
            registered_at: Utc::now(),
            last_heartbeat_at: Some(Utc::now()),
        };
        info!(agent_id = %agent.id, name = %agent.name, "Agent registered");
        self.agents.insert(agent.id, agent.clone());
        agent
    }

    /// Non-blocking: claim an idle agent matching every required label, or
    /// None. Callers queue on None; exhaustion is not an error.
    pub fn acquire(&mut self, labels: &[String], job_id: JobId) -> Option<AgentId> {
        let id = self
            .agents
            .values()
            .find(|a| a.status.is_available() && a.matches_labels(labels))
            .map(|a| a.id)?;

        if let Some(agent) = self.agents.get_mut(&id) {
            agent.status = AgentStatus::Busy;
            agent.current_job = Some(job_id);
        }
        Some(id)
    }

    /// Return a busy agent to the pool. Offline agents stay offline.
    pub fn release(&mut self, id: AgentId) {
        if let Some(agent) = self.agents.get_mut(&id)
            && agent.status == AgentStatus::Busy
        {
            agent.status = AgentStatus::Idle;
            agent.current_job = None;
        }
    }

    /// Record liveness. An offline agent that heartbeats again is revived.
    pub fn heartbeat(&mut self, id: AgentId) -> Result<()> {
        let agent = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;

        agent.last_heartbeat_at = Some(Utc::now());
        if agent.status == AgentStatus::Offline {
            info!(agent_id = %id, "Agent back online");
            agent.status = AgentStatus::Idle;
        }
        Ok(())
    }

    /// Transition agents silent past the timeout to Offline, surfacing the
    /// job each busy one was holding.
    pub fn reap_stale(&mut self, timeout: chrono::Duration) -> Vec<(AgentId, Option<JobId>)> {
        let now = Utc::now();
        let mut reaped = Vec::new();

        for agent in self.agents.values_mut() {
            if agent.status == AgentStatus::Offline {
                continue;
            }
            let last_seen = agent.last_heartbeat_at.unwrap_or(agent.registered_at);
            if now - last_seen > timeout {
                warn!(agent_id = %agent.id, name = %agent.name, "Agent missed heartbeats, marking offline");
                agent.status = AgentStatus::Offline;
                reaped.push((agent.id, agent.current_job.take()));
            }
        }
        reaped
    }

    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn all(&self) -> Vec<Agent> {
        self.agents.values().cloned().collect()
    }

    /// Agents that are not Offline; the dashboard's "Live Agents" counter.
    pub fn live_count(&self) -> usize {
        self.agents.values().filter(|a| a.status.is_live()).count()
    }

    pub fn busy_count(&self) -> usize {
        self.agents
            .values()
            .filter(|a| a.status == AgentStatus::Busy)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(name: &str, labels: Vec<&str>) -> AgentRegistration {
        AgentRegistration {
            name: name.into(),
            labels: labels.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn test_acquire_respects_labels() {
        let mut pool = AgentPool::new();
        pool.register(registration("linux-box", vec!["linux"]));

        assert!(pool.acquire(&["macos".into()], JobId::new()).is_none());

        let acquired = pool.acquire(&["linux".into()], JobId::new());
        assert!(acquired.is_some());

        // Now busy; a second acquire finds nothing.
        assert!(pool.acquire(&[], JobId::new()).is_none());
    }

    #[test]
    fn test_release_returns_agent() {
        let mut pool = AgentPool::new();
        let agent = pool.register(registration("a", vec![]));
        let job = JobId::new();

        let id = pool.acquire(&[], job).unwrap();
        assert_eq!(id, agent.id);
        assert_eq!(pool.get(id).unwrap().current_job, Some(job));

        pool.release(id);
        assert_eq!(pool.get(id).unwrap().status, AgentStatus::Idle);
        assert!(pool.get(id).unwrap().current_job.is_none());
    }

    #[test]
    fn test_reap_stale_surfaces_held_job() {
        let mut pool = AgentPool::new();
        let agent = pool.register(registration("a", vec![]));
        let job = JobId::new();
        pool.acquire(&[], job).unwrap();

        // Fresh heartbeat: nothing reaped.
        assert!(pool.reap_stale(chrono::Duration::seconds(30)).is_empty());

        // Backdate the heartbeat past the timeout.
        pool.agents.get_mut(&agent.id).unwrap().last_heartbeat_at =
            Some(Utc::now() - chrono::Duration::seconds(60));

        let reaped = pool.reap_stale(chrono::Duration::seconds(30));
        assert_eq!(reaped, vec![(agent.id, Some(job))]);
        assert_eq!(pool.get(agent.id).unwrap().status, AgentStatus::Offline);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_heartbeat_revives_offline_agent() {
        let mut pool = AgentPool::new();
        let agent = pool.register(registration("a", vec![]));

        pool.agents.get_mut(&agent.id).unwrap().last_heartbeat_at =
            Some(Utc::now() - chrono::Duration::seconds(60));
        pool.reap_stale(chrono::Duration::seconds(30));
        assert_eq!(pool.get(agent.id).unwrap().status, AgentStatus::Offline);

        pool.heartbeat(agent.id).unwrap();
        assert_eq!(pool.get(agent.id).unwrap().status, AgentStatus::Idle);
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn test_heartbeat_unknown_agent() {
        let mut pool = AgentPool::new();
        let err = pool.heartbeat(AgentId::new()).unwrap_err();
        assert!(matches!(err, Error::AgentNotFound(_)));
    }
}
