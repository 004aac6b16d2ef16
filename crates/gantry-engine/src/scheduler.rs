//! Scheduler/dispatcher.
//!
//! The single scheduling authority: one tokio task owns the agent pool,
//! the ready queue, and every run's state machine. Commands and job
//! reports arrive over an mpsc channel, so no two events for the same run
//! are ever applied concurrently; executor attempts run as their own
//! tasks and report back through the same channel.

use crate::config::EngineConfig;
use crate::pool::AgentPool;
use crate::queue::{Priority, QueuedJob, ReadyQueue};
use crate::state::{CompletionResult, JobOutcome, RunState};
use chrono::Utc;
use gantry_core::agent::{Agent, AgentRegistration};
use gantry_core::events::{
    AgentOfflinePayload, AgentRegisteredPayload, Event, JobCompletedPayload, JobDispatchedPayload,
    JobRetriedPayload, JobStartedPayload, RunCancelledPayload, RunCompletedPayload,
    RunQueuedPayload, RunStartedPayload, StageCompletedPayload, StageStartedPayload,
};
use gantry_core::ids::{AgentId, JobId, PipelineId, RunId};
use gantry_core::pipeline::TriggerMeta;
use gantry_core::ports::{DefinitionStore, EventBus, ExecutionRequest, Executor, LogSink};
use gantry_core::run::{JobInstance, JobStatus, LiveCounters, StageStatus};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

enum Command {
    SubmitTrigger {
        pipeline_id: PipelineId,
        trigger: TriggerMeta,
        reply: oneshot::Sender<Result<RunId>>,
    },
    CancelRun {
        run_id: RunId,
        cancelled_by: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    RetryJob {
        run_id: RunId,
        job_id: JobId,
        reply: oneshot::Sender<Result<()>>,
    },
    RegisterAgent {
        registration: AgentRegistration,
        reply: oneshot::Sender<Agent>,
    },
    Heartbeat {
        agent_id: AgentId,
        reply: oneshot::Sender<Result<()>>,
    },
    SetPipelineLimit {
        pipeline_id: PipelineId,
        max_concurrent: usize,
    },
    ListAgents {
        reply: oneshot::Sender<Vec<Agent>>,
    },
    JobStarted {
        run_id: RunId,
        job_id: JobId,
        attempt: u32,
    },
    JobFinished {
        run_id: RunId,
        job_id: JobId,
        attempt: u32,
        outcome: JobOutcome,
    },
    EnqueueJob {
        run_id: RunId,
        job_id: JobId,
    },
    Shutdown,
}

/// Cheaply cloneable front for the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Admit a run for the pipeline's current definition version.
    pub async fn submit_trigger(
        &self,
        pipeline_id: PipelineId,
        trigger: TriggerMeta,
    ) -> Result<RunId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitTrigger {
            pipeline_id,
            trigger,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::Internal("scheduler unavailable".into()))?
    }

    /// Request cooperative cancellation of a run.
    pub async fn cancel_run(&self, run_id: RunId, cancelled_by: Option<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CancelRun {
            run_id,
            cancelled_by,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::Internal("scheduler unavailable".into()))?
    }

    /// Re-open a terminally failed run at one failed job.
    pub async fn retry_job(&self, run_id: RunId, job_id: JobId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RetryJob {
            run_id,
            job_id,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::Internal("scheduler unavailable".into()))?
    }

    pub async fn register_agent(&self, registration: AgentRegistration) -> Result<Agent> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RegisterAgent {
            registration,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::Internal("scheduler unavailable".into()))
    }

    pub async fn heartbeat(&self, agent_id: AgentId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Heartbeat { agent_id, reply }).await?;
        rx.await
            .map_err(|_| Error::Internal("scheduler unavailable".into()))?
    }

    pub async fn set_pipeline_limit(
        &self,
        pipeline_id: PipelineId,
        max_concurrent: usize,
    ) -> Result<()> {
        self.send(Command::SetPipelineLimit {
            pipeline_id,
            max_concurrent,
        })
        .await
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ListAgents { reply }).await?;
        rx.await
            .map_err(|_| Error::Internal("scheduler unavailable".into()))
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| Error::Internal("scheduler unavailable".into()))
    }
}

pub struct Scheduler {
    config: EngineConfig,
    definitions: Arc<dyn DefinitionStore>,
    executor: Arc<dyn Executor>,
    logs: Arc<dyn LogSink>,
    bus: Arc<dyn EventBus>,
    pool: AgentPool,
    queue: ReadyQueue,
    /// Registry of runs keyed by RunId; the one place run state lives.
    runs: HashMap<RunId, RunState>,
    run_numbers: HashMap<PipelineId, u32>,
    tx: mpsc::Sender<Command>,
    last_counters: Option<(usize, usize)>,
}

impl Scheduler {
    /// Spawn the scheduler task and return its handle.
    pub fn spawn(
        config: EngineConfig,
        definitions: Arc<dyn DefinitionStore>,
        executor: Arc<dyn Executor>,
        logs: Arc<dyn LogSink>,
        bus: Arc<dyn EventBus>,
    ) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(config.command_buffer);
        let scheduler = Scheduler {
            config,
            definitions,
            executor,
            logs,
            bus,
            pool: AgentPool::new(),
            queue: ReadyQueue::new(),
            runs: HashMap::new(),
            run_numbers: HashMap::new(),
            tx: tx.clone(),
            last_counters: None,
        };
        tokio::spawn(scheduler.run(rx));
        SchedulerHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut reap = tokio::time::interval(self.config.reap_interval());
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Scheduler started");

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = reap.tick() => self.reap().await,
            }
            self.pump().await;
            self.publish_counters().await;
        }
        info!("Scheduler stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SubmitTrigger {
                pipeline_id,
                trigger,
                reply,
            } => {
                let result = self.submit_trigger(pipeline_id, trigger).await;
                let _ = reply.send(result);
            }
            Command::CancelRun {
                run_id,
                cancelled_by,
                reply,
            } => {
                let result = self.cancel_run(run_id, cancelled_by).await;
                let _ = reply.send(result);
            }
            Command::RetryJob {
                run_id,
                job_id,
                reply,
            } => {
                let result = self.retry_job(run_id, job_id).await;
                let _ = reply.send(result);
            }
            Command::RegisterAgent {
                registration,
                reply,
            } => {
                let agent = self.pool.register(registration);
                let event = Event::AgentRegistered(AgentRegisteredPayload {
                    agent_id: agent.id,
                    name: agent.name.clone(),
                    labels: agent.labels.clone(),
                    registered_at: agent.registered_at,
                });
                let _ = reply.send(agent);
                self.publish_all(vec![event]).await;
            }
            Command::Heartbeat { agent_id, reply } => {
                let _ = reply.send(self.pool.heartbeat(agent_id));
            }
            Command::SetPipelineLimit {
                pipeline_id,
                max_concurrent,
            } => {
                self.queue.set_pipeline_limit(pipeline_id, max_concurrent);
            }
            Command::ListAgents { reply } => {
                let _ = reply.send(self.pool.all());
            }
            Command::JobStarted {
                run_id,
                job_id,
                attempt,
            } => self.job_started(run_id, job_id, attempt).await,
            Command::JobFinished {
                run_id,
                job_id,
                attempt,
                outcome,
            } => self.job_finished(run_id, job_id, attempt, outcome).await,
            Command::EnqueueJob { run_id, job_id } => self.enqueue_ready(run_id, job_id),
            Command::Shutdown => {}
        }
    }

    async fn submit_trigger(
        &mut self,
        pipeline_id: PipelineId,
        trigger: TriggerMeta,
    ) -> Result<RunId> {
        let snapshot = self.definitions.resolve(pipeline_id).await?;
        let run_number = {
            let counter = self.run_numbers.entry(pipeline_id).or_insert(0);
            *counter += 1;
            *counter
        };

        let trigger_type = trigger.trigger_type;
        let (state, ready, completed) = RunState::new(&snapshot, run_number, trigger);
        let run_id = state.run_id();

        info!(
            run_id = %run_id,
            pipeline_id = %pipeline_id,
            version = snapshot.version,
            run_number,
            "Run admitted"
        );

        let mut events = vec![Event::RunQueued(RunQueuedPayload {
            run_id,
            pipeline_id,
            pipeline_name: snapshot.definition.name.clone(),
            run_number,
            trigger: trigger_type,
            snapshot: state.snapshot(),
            queued_at: state.run.queued_at,
        })];
        if let Some(status) = completed {
            events.push(Event::RunCompleted(RunCompletedPayload {
                run_id,
                status,
                duration_ms: Some(0),
                completed_at: Utc::now(),
            }));
        }

        for job_id in ready {
            if let Some(job) = state.run.job(job_id) {
                self.queue.enqueue(queued_job(&state, job));
            }
        }
        self.runs.insert(run_id, state);
        self.publish_all(events).await;
        Ok(run_id)
    }

    async fn cancel_run(&mut self, run_id: RunId, cancelled_by: Option<String>) -> Result<()> {
        let (events, seal) = {
            let state = self
                .runs
                .get_mut(&run_id)
                .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
            let result = state.cancel();
            let Some(status) = result.run_completed else {
                // Already terminal: completed jobs are untouched.
                return Ok(());
            };

            self.queue.remove_run(run_id);
            info!(run_id = %run_id, cancelled = result.cancelled_jobs.len(), "Run cancelled");

            let now = Utc::now();
            let mut events = Vec::new();
            let mut seal = Vec::new();
            for job_id in &result.cancelled_jobs {
                if let Some(job) = state.run.job(*job_id) {
                    seal.push(job.id);
                    events.push(Event::JobCompleted(JobCompletedPayload {
                        run_id,
                        job_id: job.id,
                        job_name: job.name.clone(),
                        status: JobStatus::Cancelled,
                        attempts: job.attempts,
                        failure: None,
                        duration_ms: job.duration_ms(),
                        completed_at: now,
                    }));
                }
            }
            events.push(Event::RunCancelled(RunCancelledPayload {
                run_id,
                cancelled_by,
                cancelled_at: now,
            }));
            events.push(Event::RunCompleted(RunCompletedPayload {
                run_id,
                status,
                duration_ms: state.run.duration_ms(),
                completed_at: now,
            }));
            (events, seal)
        };

        self.seal_all(seal).await;
        self.publish_all(events).await;
        Ok(())
    }

    async fn retry_job(&mut self, run_id: RunId, job_id: JobId) -> Result<()> {
        let (events, reopen) = {
            let state = self
                .runs
                .get_mut(&run_id)
                .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
            let info = state.retry_job(job_id)?;

            info!(run_id = %run_id, job_id = %job_id, "Manual retry, run re-opened");

            let now = Utc::now();
            let mut events = Vec::new();
            for id in &info.reset {
                let reason = if *id == job_id {
                    "manual retry"
                } else {
                    "requeued after upstream retry"
                };
                events.push(Event::JobRetried(JobRetriedPayload {
                    run_id,
                    job_id: *id,
                    attempt: 0,
                    reason: reason.to_string(),
                    queued_at: now,
                }));
            }
            for id in &info.ready {
                if let Some(job) = state.run.job(*id) {
                    self.queue.enqueue(queued_job(state, job));
                }
            }
            (events, info.reset)
        };

        for id in reopen {
            if let Err(e) = self.logs.reopen(id).await {
                warn!(job_id = %id, error = %e, "Log reopen failed");
            }
        }
        self.publish_all(events).await;
        Ok(())
    }

    async fn job_started(&mut self, run_id: RunId, job_id: JobId, attempt: u32) {
        let Some(state) = self.runs.get_mut(&run_id) else {
            return;
        };
        match state.mark_running(job_id, attempt) {
            Ok(true) => {
                let started_at = state
                    .run
                    .job(job_id)
                    .and_then(|j| j.started_at)
                    .unwrap_or_else(Utc::now);
                self.publish_all(vec![Event::JobStarted(JobStartedPayload {
                    run_id,
                    job_id,
                    started_at,
                })])
                .await;
            }
            Ok(false) => {}
            Err(e) => warn!(run_id = %run_id, job_id = %job_id, error = %e, "Job start ignored"),
        }
    }

    async fn job_finished(
        &mut self,
        run_id: RunId,
        job_id: JobId,
        attempt: u32,
        outcome: JobOutcome,
    ) {
        let result = {
            let Some(state) = self.runs.get_mut(&run_id) else {
                return;
            };
            match state.complete_job(job_id, attempt, outcome) {
                Ok(result) => result,
                Err(e) => {
                    error!(run_id = %run_id, job_id = %job_id, error = %e, "Completion rejected");
                    return;
                }
            }
        };
        self.finish_completion(run_id, job_id, result).await;
    }

    /// Apply everything a completion implies: agent release, retry or
    /// seal, stage/run events, next-stage enqueue.
    async fn finish_completion(&mut self, run_id: RunId, job_id: JobId, result: CompletionResult) {
        let mut events = Vec::new();
        let mut seal = Vec::new();
        {
            let Some(state) = self.runs.get_mut(&run_id) else {
                return;
            };
            let pipeline_id = state.run.pipeline_id;

            if let Some(agent_id) = result.released_agent {
                self.pool.release(agent_id);
                self.queue.note_completed(pipeline_id);
            }
            if !result.applied {
                return;
            }

            let now = Utc::now();

            if let Some(failed_attempt) = result.retried {
                if let Some(job) = state.run.job(job_id) {
                    let reason = job
                        .failure
                        .clone()
                        .unwrap_or_else(|| "execution failed".to_string());
                    debug!(run_id = %run_id, job_id = %job_id, attempt = failed_attempt, "Retrying job");
                    events.push(Event::JobRetried(JobRetriedPayload {
                        run_id,
                        job_id,
                        attempt: failed_attempt,
                        reason,
                        queued_at: now,
                    }));

                    if job.retry_delay_secs == 0 {
                        self.queue.enqueue(queued_job(state, job));
                    } else {
                        let delay = Duration::from_secs(job.retry_delay_secs as u64);
                        let tx = self.tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(Command::EnqueueJob { run_id, job_id }).await;
                        });
                    }
                }
            }

            if let Some(status) = result.terminal_status {
                seal.push(job_id);
                if let Some(job) = state.run.job(job_id) {
                    events.push(Event::JobCompleted(JobCompletedPayload {
                        run_id,
                        job_id,
                        job_name: job.name.clone(),
                        status,
                        attempts: job.attempts,
                        failure: job.failure.clone(),
                        duration_ms: job.duration_ms(),
                        completed_at: now,
                    }));
                }
            }

            for skipped_id in &result.skipped_jobs {
                seal.push(*skipped_id);
                if let Some(job) = state.run.job(*skipped_id) {
                    events.push(Event::JobCompleted(JobCompletedPayload {
                        run_id,
                        job_id: job.id,
                        job_name: job.name.clone(),
                        status: JobStatus::Skipped,
                        attempts: job.attempts,
                        failure: None,
                        duration_ms: None,
                        completed_at: now,
                    }));
                }
            }

            if let Some((index, status)) = result.stage_completed {
                let stage = &state.run.stages[index];
                events.push(Event::StageCompleted(StageCompletedPayload {
                    run_id,
                    stage: stage.id.clone(),
                    stage_index: index as u32,
                    status,
                    duration_ms: stage.duration_ms(),
                    completed_at: now,
                }));
            }
            for index in &result.auto_completed_stages {
                let stage = &state.run.stages[*index];
                events.push(Event::StageCompleted(StageCompletedPayload {
                    run_id,
                    stage: stage.id.clone(),
                    stage_index: *index as u32,
                    status: StageStatus::Succeeded,
                    duration_ms: Some(0),
                    completed_at: now,
                }));
            }

            for ready_id in &result.newly_ready {
                if let Some(job) = state.run.job(*ready_id) {
                    self.queue.enqueue(queued_job(state, job));
                }
            }

            if let Some(status) = result.run_completed {
                info!(run_id = %run_id, ?status, "Run completed");
                events.push(Event::RunCompleted(RunCompletedPayload {
                    run_id,
                    status,
                    duration_ms: state.run.duration_ms(),
                    completed_at: now,
                }));
            }
        }

        self.seal_all(seal).await;
        self.publish_all(events).await;
    }

    fn enqueue_ready(&mut self, run_id: RunId, job_id: JobId) {
        let Some(state) = self.runs.get(&run_id) else {
            return;
        };
        // Cancellation may have landed while the retry delay elapsed.
        if state.run.completed_at.is_some() || state.job_status(job_id) != Some(JobStatus::Queued)
        {
            return;
        }
        if let Some(job) = state.run.job(job_id) {
            self.queue.enqueue(queued_job(state, job));
        }
    }

    /// Assign ready jobs to free agents; jobs with no matching free agent
    /// stay queued. The queue's length is the observable backlog.
    async fn pump(&mut self) {
        let mut events = Vec::new();

        loop {
            let Some(entry) = self.queue.dequeue() else {
                break;
            };
            let Some(state) = self.runs.get_mut(&entry.run_id) else {
                continue;
            };
            // The run may have been cancelled while this job waited.
            if state.job_status(entry.job_id) != Some(JobStatus::Queued) {
                continue;
            }

            let Some(agent_id) = self.pool.acquire(&entry.labels, entry.job_id) else {
                self.queue.requeue(entry);
                break;
            };

            match state.mark_dispatched(entry.job_id, agent_id) {
                Ok(info) => {
                    self.queue.note_dispatched(entry.pipeline_id);
                    let Some(job) = state.run.job(entry.job_id).cloned() else {
                        continue;
                    };
                    let now = Utc::now();

                    if info.run_started {
                        events.push(Event::RunStarted(RunStartedPayload {
                            run_id: entry.run_id,
                            started_at: now,
                        }));
                    }
                    if let Some(index) = info.stage_started {
                        let stage = &state.run.stages[index];
                        events.push(Event::StageStarted(StageStartedPayload {
                            run_id: entry.run_id,
                            stage: stage.id.clone(),
                            stage_index: index as u32,
                            job_count: stage.jobs.len() as u32,
                            started_at: now,
                        }));
                    }
                    debug!(
                        run_id = %entry.run_id,
                        job_id = %entry.job_id,
                        agent_id = %agent_id,
                        attempt = job.attempts,
                        "Job dispatched"
                    );
                    events.push(Event::JobDispatched(JobDispatchedPayload {
                        run_id: entry.run_id,
                        job_id: entry.job_id,
                        job_name: job.name.clone(),
                        agent_id,
                        attempt: job.attempts,
                        dispatched_at: now,
                    }));

                    let cancel = state.cancel_receiver();
                    self.spawn_attempt(entry.run_id, job, cancel);
                }
                Err(e) => {
                    warn!(job_id = %entry.job_id, error = %e, "Dispatch rejected");
                    self.pool.release(agent_id);
                }
            }
        }

        self.publish_all(events).await;
    }

    /// Run one attempt as its own task. The executor races the per-job
    /// timeout and the run's cancel signal; after cancellation it gets the
    /// grace period to wind down, then is dropped.
    fn spawn_attempt(&self, run_id: RunId, job: JobInstance, cancel: watch::Receiver<bool>) {
        let executor = self.executor.clone();
        let logs = self.logs.clone();
        let tx = self.tx.clone();
        let grace = self.config.cancel_grace();
        let timeout = Duration::from_secs(
            job.timeout_secs
                .unwrap_or(self.config.default_job_timeout_secs),
        );
        let request = ExecutionRequest {
            run_id,
            job_id: job.id,
            job_name: job.name.clone(),
            command: job.command.clone(),
            attempt: job.attempts,
            variables: job.variables.clone(),
        };
        let job_id = job.id;
        let attempt = job.attempts;

        tokio::spawn(async move {
            let _ = tx
                .send(Command::JobStarted {
                    run_id,
                    job_id,
                    attempt,
                })
                .await;

            let mut cancel_watch = cancel.clone();
            let exec = executor.execute(request, logs, cancel);
            tokio::pin!(exec);

            let outcome = tokio::select! {
                result = &mut exec => match result {
                    Ok(outcome) if outcome.is_success() => JobOutcome::Succeeded,
                    Ok(outcome) => JobOutcome::Failed {
                        reason: match outcome.message {
                            Some(message) => format!(
                                "executor exited with code {}: {}",
                                outcome.exit_code, message
                            ),
                            None => format!("executor exited with code {}", outcome.exit_code),
                        },
                    },
                    Err(e) => JobOutcome::Failed {
                        reason: e.to_string(),
                    },
                },
                _ = tokio::time::sleep(timeout) => JobOutcome::Failed {
                    reason: format!("job timeout after {}s", timeout.as_secs()),
                },
                _ = wait_for_cancel(&mut cancel_watch) => {
                    // Grace period, then the executor future is dropped.
                    let _ = tokio::time::timeout(grace, &mut exec).await;
                    JobOutcome::Cancelled
                }
            };

            let _ = tx
                .send(Command::JobFinished {
                    run_id,
                    job_id,
                    attempt,
                    outcome,
                })
                .await;
        });
    }

    async fn reap(&mut self) {
        let reaped = self.pool.reap_stale(self.config.heartbeat_timeout());
        if reaped.is_empty() {
            return;
        }

        let now = Utc::now();
        for (agent_id, lost_job) in reaped {
            let last_heartbeat_at = self.pool.get(agent_id).and_then(|a| a.last_heartbeat_at);
            self.publish_all(vec![Event::AgentOffline(AgentOfflinePayload {
                agent_id,
                last_heartbeat_at,
                detected_at: now,
            })])
            .await;

            let Some(job_id) = lost_job else {
                continue;
            };
            // Find the run holding the lost job and fail the attempt.
            let completion = self.runs.iter_mut().find_map(|(run_id, state)| {
                let attempt = state.run.job(job_id)?.attempts;
                let result = state.complete_job(
                    job_id,
                    attempt,
                    JobOutcome::Failed {
                        reason: format!("agent lost: {agent_id}"),
                    },
                );
                Some((*run_id, result))
            });
            match completion {
                Some((run_id, Ok(result))) => {
                    warn!(run_id = %run_id, job_id = %job_id, agent_id = %agent_id, "Job failed, agent lost");
                    self.finish_completion(run_id, job_id, result).await;
                }
                Some((run_id, Err(e))) => {
                    error!(run_id = %run_id, job_id = %job_id, error = %e, "Agent-loss completion rejected");
                }
                None => {}
            }
        }
    }

    async fn publish_counters(&mut self) {
        let counters = (self.pool.live_count(), self.queue.len());
        if self.last_counters == Some(counters) {
            return;
        }
        self.last_counters = Some(counters);
        self.publish_all(vec![Event::CountersUpdated(LiveCounters {
            active_agents: counters.0,
            queue_length: counters.1,
            last_updated: Utc::now(),
        })])
        .await;
    }

    async fn seal_all(&self, job_ids: Vec<JobId>) {
        for job_id in job_ids {
            if let Err(e) = self.logs.seal(job_id).await {
                warn!(job_id = %job_id, error = %e, "Log seal failed");
            }
        }
    }

    async fn publish_all(&self, events: Vec<Event>) {
        for event in events {
            if let Err(e) = self.bus.publish(event).await {
                error!(error = %e, "Event publish failed");
            }
        }
    }
}

fn queued_job(state: &RunState, job: &JobInstance) -> QueuedJob {
    QueuedJob {
        run_id: state.run.id,
        pipeline_id: state.run.pipeline_id,
        job_id: job.id,
        stage: job.stage.clone(),
        labels: job.labels.clone(),
        priority: Priority::Normal,
        queued_at: Utc::now(),
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // Sender gone without a cancel: never resolves, the other select arms
    // decide the outcome.
    std::future::pending::<()>().await
}
