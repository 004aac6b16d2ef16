//! Status aggregator.
//!
//! The single source of truth observers read. It never polls: a bus
//! subscription folds every status event into run snapshots and live
//! counters, re-deriving stage/run statuses with the rollup reducers on
//! each job event. Dashboards, CLIs, and webhook bridges query here
//! instead of touching engine state.

use crate::rollup;
use chrono::Utc;
use futures::StreamExt;
use gantry_core::events::Event;
use gantry_core::ids::{JobId, RunId};
use gantry_core::ports::EventBus;
use gantry_core::run::{
    JobStatus, JobSummary, LiveCounters, RunStatus, RunStatusSnapshot,
};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

/// Pushed to subscribers whenever a run's derived status changes.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub run_id: RunId,
    pub status: RunStatus,
}

pub struct StatusAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    runs: RwLock<HashMap<RunId, RunStatusSnapshot>>,
    counters: RwLock<LiveCounters>,
    changes: broadcast::Sender<StatusChange>,
}

impl StatusAggregator {
    /// Subscribe to the bus and start folding. Must be started before runs
    /// are submitted so no lifecycle events are missed.
    pub async fn start(bus: Arc<dyn EventBus>) -> Result<Self> {
        let mut stream = bus.subscribe(">").await?;
        let inner = Arc::new(Inner::new());

        let fold = inner.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => fold.apply(event).await,
                    Err(e) => warn!(error = %e, "Event stream error"),
                }
            }
            debug!("Aggregator event stream ended");
        });

        Ok(Self { inner })
    }

    /// Snapshot of one run, statuses derived.
    pub async fn current_status(&self, run_id: RunId) -> Option<RunStatusSnapshot> {
        self.inner.runs.read().await.get(&run_id).cloned()
    }

    /// The dashboard footer counters.
    pub async fn live_counters(&self) -> LiveCounters {
        *self.inner.counters.read().await
    }

    /// All known runs, newest first.
    pub async fn list_runs(&self) -> Vec<RunStatusSnapshot> {
        let runs = self.inner.runs.read().await;
        let mut all: Vec<_> = runs.values().cloned().collect();
        all.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        all
    }

    /// The dashboard status filter chips, run-level.
    pub async fn runs_by_status(&self, status: RunStatus) -> Vec<RunStatusSnapshot> {
        self.list_runs()
            .await
            .into_iter()
            .filter(|r| r.status == status)
            .collect()
    }

    /// Job-level projection by status within one run.
    pub async fn jobs_by_status(&self, run_id: RunId, status: JobStatus) -> Vec<JobSummary> {
        let runs = self.inner.runs.read().await;
        let Some(run) = runs.get(&run_id) else {
            return vec![];
        };
        run.stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .filter(|j| j.status == status)
            .cloned()
            .collect()
    }

    /// Run status-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.changes.subscribe()
    }

    /// Retention hook: drop a terminal run's snapshot.
    pub async fn archive(&self, run_id: RunId) -> Result<()> {
        let mut runs = self.inner.runs.write().await;
        let snapshot = runs
            .get(&run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        if !snapshot.status.is_terminal() {
            return Err(Error::RunActive(run_id.to_string()));
        }
        runs.remove(&run_id);
        Ok(())
    }

    #[cfg(test)]
    fn detached() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }
}

impl Inner {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            runs: RwLock::new(HashMap::new()),
            counters: RwLock::new(LiveCounters {
                active_agents: 0,
                queue_length: 0,
                last_updated: Utc::now(),
            }),
            changes,
        }
    }

    async fn apply(&self, event: Event) {
        match event {
            Event::RunQueued(p) => {
                let status = p.snapshot.status;
                self.runs.write().await.insert(p.run_id, p.snapshot);
                let _ = self.changes.send(StatusChange {
                    run_id: p.run_id,
                    status,
                });
                self.touch().await;
            }
            Event::RunStarted(p) => {
                self.update_run(p.run_id, |run| run.started_at = Some(p.started_at))
                    .await;
            }
            Event::RunCompleted(p) => {
                self.update_run(p.run_id, |run| {
                    run.completed_at = Some(p.completed_at);
                    run.duration_ms = p.duration_ms;
                })
                .await;
            }
            Event::RunCancelled(_) => {}
            Event::StageStarted(p) => {
                self.update_run(p.run_id, |run| {
                    if let Some(stage) = run.stages.get_mut(p.stage_index as usize) {
                        stage.started_at = Some(p.started_at);
                    }
                })
                .await;
            }
            Event::StageCompleted(p) => {
                self.update_run(p.run_id, |run| {
                    if let Some(stage) = run.stages.get_mut(p.stage_index as usize) {
                        stage.completed_at = Some(p.completed_at);
                        stage.duration_ms = p.duration_ms;
                    }
                })
                .await;
            }
            Event::JobDispatched(p) => {
                self.update_job(p.run_id, p.job_id, |job| {
                    job.status = JobStatus::Dispatched;
                    job.agent_id = Some(p.agent_id);
                    job.attempts = p.attempt;
                })
                .await;
            }
            Event::JobStarted(p) => {
                self.update_job(p.run_id, p.job_id, |job| job.status = JobStatus::Running)
                    .await;
            }
            Event::JobCompleted(p) => {
                self.update_job(p.run_id, p.job_id, |job| {
                    job.status = p.status;
                    job.attempts = p.attempts.max(job.attempts);
                    job.failure = p.failure.clone();
                    job.duration_ms = p.duration_ms;
                    job.agent_id = None;
                })
                .await;
            }
            Event::JobRetried(p) => {
                self.update_run(p.run_id, |run| {
                    run.completed_at = None;
                    run.duration_ms = None;
                    for stage in &mut run.stages {
                        if let Some(job) = stage.jobs.iter_mut().find(|j| j.id == p.job_id) {
                            job.status = JobStatus::Queued;
                            job.agent_id = None;
                        }
                    }
                })
                .await;
            }
            Event::CountersUpdated(c) => {
                *self.counters.write().await = c;
            }
            Event::AgentRegistered(_) | Event::AgentOffline(_) | Event::ArtifactRegistered(_) => {}
        }
    }

    async fn update_run(&self, run_id: RunId, apply: impl FnOnce(&mut RunStatusSnapshot)) {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(&run_id) else {
            return;
        };
        apply(run);
        self.recompute(run);
        drop(runs);
        self.touch().await;
    }

    async fn update_job(&self, run_id: RunId, job_id: JobId, apply: impl FnOnce(&mut JobSummary)) {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(&run_id) else {
            return;
        };
        for stage in &mut run.stages {
            if let Some(job) = stage.jobs.iter_mut().find(|j| j.id == job_id) {
                apply(job);
                break;
            }
        }
        self.recompute(run);
        drop(runs);
        self.touch().await;
    }

    /// Re-derive stage and run statuses from job statuses, notifying on a
    /// run-status change.
    fn recompute(&self, run: &mut RunStatusSnapshot) {
        for stage in &mut run.stages {
            let statuses: Vec<JobStatus> = stage.jobs.iter().map(|j| j.status).collect();
            stage.status = rollup::stage_status(&statuses);
        }
        let stage_statuses: Vec<_> = run.stages.iter().map(|s| s.status).collect();
        let status = rollup::run_status(&stage_statuses);
        if status != run.status {
            run.status = status;
            let _ = self.changes.send(StatusChange {
                run_id: run.run_id,
                status,
            });
        }
    }

    async fn touch(&self) {
        self.counters.write().await.last_updated = Utc::now();
    }
}
