//! Per-run state machine.
//!
//! Job transitions are `Queued -> Dispatched -> Running -> {Succeeded |
//! Failed | Cancelled}`, with `Failed -> Queued` while retry attempts
//! remain and `Skipped` for fail-fast victims. Stages execute strictly in
//! definition order: the cursor only advances once every job in the
//! current stage is terminal and the stage rolled up successful.
//!
//! The scheduler owns each `RunState` and applies events one at a time, so
//! none of this needs interior locking.

use crate::rollup;
use chrono::Utc;
use gantry_core::ids::{AgentId, JobId, RunId};
use gantry_core::pipeline::{DefinitionSnapshot, TriggerMeta};
use gantry_core::run::{JobStatus, PipelineRun, RunStatus, RunStatusSnapshot, StageStatus};
use gantry_core::{Error, Result};
use tokio::sync::watch;

/// Scheduler-side view of one finished attempt.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: String },
    Cancelled,
}

pub struct RunState {
    pub run: PipelineRun,
    current_stage: usize,
    cancel_tx: watch::Sender<bool>,
}

/// What a successful dispatch changed beyond the job itself.
#[derive(Debug, Default)]
pub struct DispatchInfo {
    pub run_started: bool,
    pub stage_started: Option<usize>,
}

/// Everything the scheduler must act on after a job report.
#[derive(Debug, Default)]
pub struct CompletionResult {
    /// False when the report was stale (superseded attempt) or the job was
    /// already terminal; only the agent release below still applies.
    pub applied: bool,
    pub released_agent: Option<AgentId>,
    /// Set when the job reached a terminal status just now.
    pub terminal_status: Option<JobStatus>,
    /// Set when the failure was absorbed by retry policy: the attempt
    /// number that just failed.
    pub retried: Option<u32>,
    pub newly_ready: Vec<JobId>,
    pub stage_completed: Option<(usize, StageStatus)>,
    /// Zero-job stages passed through while advancing.
    pub auto_completed_stages: Vec<usize>,
    /// Fail-fast victims in later stages.
    pub skipped_jobs: Vec<JobId>,
    pub run_completed: Option<RunStatus>,
}

#[derive(Debug, Default)]
pub struct CancelResult {
    pub cancelled_jobs: Vec<JobId>,
    pub run_completed: Option<RunStatus>,
}

#[derive(Debug, Default)]
pub struct RetryInfo {
    /// Jobs ready for the queue right now (the retried job).
    pub ready: Vec<JobId>,
    /// Every job reset to Queued, downstream un-skips included.
    pub reset: Vec<JobId>,
}

impl RunState {
    /// Materialize a run from a pinned definition version. Returns the
    /// first stage's ready jobs; a definition whose stages are all empty
    /// completes on the spot.
    pub fn new(
        snapshot: &DefinitionSnapshot,
        run_number: u32,
        trigger: TriggerMeta,
    ) -> (Self, Vec<JobId>, Option<RunStatus>) {
        let run = PipelineRun::materialize(snapshot, run_number, trigger);
        let (cancel_tx, _) = watch::channel(false);
        let mut state = Self {
            run,
            current_stage: 0,
            cancel_tx,
        };

        let now = Utc::now();
        while state.current_stage < state.run.stages.len()
            && state.run.stages[state.current_stage].jobs.is_empty()
        {
            let stage = &mut state.run.stages[state.current_stage];
            stage.started_at = Some(now);
            stage.completed_at = Some(now);
            state.current_stage += 1;
        }

        if state.current_stage >= state.run.stages.len() {
            state.run.started_at = Some(now);
            state.run.completed_at = Some(now);
            return (state, vec![], Some(RunStatus::Succeeded));
        }

        let ready = state.run.stages[state.current_stage]
            .jobs
            .iter()
            .map(|j| j.id)
            .collect();
        (state, ready, None)
    }

    pub fn run_id(&self) -> RunId {
        self.run.id
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.run.job(job_id).map(|j| j.status)
    }

    pub fn status(&self) -> RunStatus {
        let statuses: Vec<StageStatus> = self
            .run
            .stages
            .iter()
            .map(|s| {
                let jobs: Vec<JobStatus> = s.jobs.iter().map(|j| j.status).collect();
                rollup::stage_status(&jobs)
            })
            .collect();
        rollup::run_status(&statuses)
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        rollup::snapshot_run(&self.run)
    }

    /// Queued -> Dispatched. Also records run/stage start on first
    /// dispatch.
    pub fn mark_dispatched(&mut self, job_id: JobId, agent_id: AgentId) -> Result<DispatchInfo> {
        let stage_index = self.stage_of(job_id)?;
        let now = Utc::now();

        {
            let job = self.run.stages[stage_index]
                .jobs
                .iter_mut()
                .find(|j| j.id == job_id)
                .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

            if job.status != JobStatus::Queued {
                return Err(Error::InvalidTransition {
                    from: format!("{:?}", job.status).to_lowercase(),
                    to: "dispatched".to_string(),
                });
            }
            job.status = JobStatus::Dispatched;
            job.agent_id = Some(agent_id);
            job.attempts += 1;
        }

        let mut info = DispatchInfo::default();
        if self.run.started_at.is_none() {
            self.run.started_at = Some(now);
            info.run_started = true;
        }
        let stage = &mut self.run.stages[stage_index];
        if stage.started_at.is_none() {
            stage.started_at = Some(now);
            info.stage_started = Some(stage_index);
        }
        Ok(info)
    }

    /// Dispatched -> Running. Stale or superseded reports are ignored.
    pub fn mark_running(&mut self, job_id: JobId, attempt: u32) -> Result<bool> {
        let job = self
            .run
            .job_mut(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        if job.attempts != attempt || job.status != JobStatus::Dispatched {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        Ok(true)
    }

    /// Apply one attempt's outcome: terminal transition or retry, then
    /// stage rollup, cursor advance, fail-fast, and run completion.
    pub fn complete_job(
        &mut self,
        job_id: JobId,
        attempt: u32,
        outcome: JobOutcome,
    ) -> Result<CompletionResult> {
        let stage_index = self.stage_of(job_id)?;
        let now = Utc::now();
        let mut result = CompletionResult::default();

        {
            let job = self.run.stages[stage_index]
                .jobs
                .iter_mut()
                .find(|j| j.id == job_id)
                .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

            if job.status.is_terminal() {
                // Cancellation or agent loss got here first; this report
                // only frees the agent the attempt was holding.
                if job.attempts == attempt {
                    result.released_agent = job.agent_id.take();
                }
                return Ok(result);
            }

            if job.attempts != attempt || !job.status.is_active() {
                // Report from a superseded attempt.
                return Ok(result);
            }

            result.applied = true;
            result.released_agent = job.agent_id.take();

            match outcome {
                JobOutcome::Succeeded => {
                    job.status = JobStatus::Succeeded;
                    job.failure = None;
                    job.completed_at = Some(now);
                }
                JobOutcome::Cancelled => {
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(now);
                }
                JobOutcome::Failed { reason } => {
                    if job.retries_remaining() {
                        job.status = JobStatus::Queued;
                        job.failure = Some(reason);
                        job.started_at = None;
                        result.retried = Some(job.attempts);
                        return Ok(result);
                    }
                    job.status = JobStatus::Failed;
                    job.failure = Some(reason);
                    job.completed_at = Some(now);
                }
            }
            result.terminal_status = Some(job.status);
        }

        if stage_index == self.current_stage && self.run.stages[stage_index].all_terminal() {
            self.finish_stage(stage_index, &mut result);
        }
        Ok(result)
    }

    fn finish_stage(&mut self, stage_index: usize, result: &mut CompletionResult) {
        let now = Utc::now();
        let status = {
            let stage = &mut self.run.stages[stage_index];
            stage.completed_at = Some(now);
            let jobs: Vec<JobStatus> = stage.jobs.iter().map(|j| j.status).collect();
            rollup::stage_status(&jobs)
        };
        result.stage_completed = Some((stage_index, status));

        if status.is_success() {
            self.current_stage += 1;
            while self.current_stage < self.run.stages.len()
                && self.run.stages[self.current_stage].jobs.is_empty()
            {
                let stage = &mut self.run.stages[self.current_stage];
                stage.started_at = Some(now);
                stage.completed_at = Some(now);
                result.auto_completed_stages.push(self.current_stage);
                self.current_stage += 1;
            }
            if self.current_stage >= self.run.stages.len() {
                self.run.completed_at = Some(now);
                result.run_completed = Some(RunStatus::Succeeded);
            } else {
                result.newly_ready = self.run.stages[self.current_stage]
                    .jobs
                    .iter()
                    .map(|j| j.id)
                    .collect();
            }
        } else {
            // Fail-fast: nothing downstream ever starts.
            for stage in &mut self.run.stages[stage_index + 1..] {
                for job in &mut stage.jobs {
                    if !job.status.is_terminal() {
                        job.status = JobStatus::Skipped;
                        job.completed_at = Some(now);
                        result.skipped_jobs.push(job.id);
                    }
                }
            }
            self.run.completed_at = Some(now);
            result.run_completed = Some(match status {
                StageStatus::Cancelled => RunStatus::Cancelled,
                _ => RunStatus::Failed,
            });
        }
    }

    /// Cooperative cancellation: every non-terminal job goes Cancelled and
    /// the cancel signal is raised for in-flight executors. Agents held by
    /// in-flight attempts are released when those attempts report back,
    /// bounded by the scheduler's grace period. A terminal run is left
    /// untouched.
    pub fn cancel(&mut self) -> CancelResult {
        let mut result = CancelResult::default();
        if self.run.completed_at.is_some() {
            return result;
        }

        let now = Utc::now();
        let _ = self.cancel_tx.send(true);

        for stage in &mut self.run.stages {
            for job in &mut stage.jobs {
                if !job.status.is_terminal() {
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(now);
                    result.cancelled_jobs.push(job.id);
                }
            }
        }

        if let Some(stage) = self.run.stages.get_mut(self.current_stage)
            && stage.started_at.is_some()
            && stage.completed_at.is_none()
        {
            stage.completed_at = Some(now);
        }

        self.run.completed_at = Some(now);
        result.run_completed = Some(RunStatus::Cancelled);
        result
    }

    /// Re-open a terminally failed run at one failed job (the dashboard's
    /// per-job retry). Downstream skipped work is re-queued; finished work
    /// is not repeated.
    pub fn retry_job(&mut self, job_id: JobId) -> Result<RetryInfo> {
        if self.status() != RunStatus::Failed {
            return Err(Error::RunActive(self.run.id.to_string()));
        }
        let stage_index = self.stage_of(job_id)?;
        let mut info = RetryInfo::default();

        {
            let job = self.run.stages[stage_index]
                .jobs
                .iter_mut()
                .find(|j| j.id == job_id)
                .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

            if job.status != JobStatus::Failed {
                return Err(Error::InvalidTransition {
                    from: format!("{:?}", job.status).to_lowercase(),
                    to: "queued".to_string(),
                });
            }
            reset_job(job);
            info.ready.push(job_id);
            info.reset.push(job_id);
        }

        for stage in &mut self.run.stages[stage_index + 1..] {
            stage.started_at = None;
            stage.completed_at = None;
            for job in &mut stage.jobs {
                if job.status == JobStatus::Skipped {
                    reset_job(job);
                    info.reset.push(job.id);
                }
            }
        }

        self.run.stages[stage_index].completed_at = None;
        self.current_stage = stage_index;
        self.run.completed_at = None;
        Ok(info)
    }

    /// Agents still attached to jobs of this run (in-flight attempts).
    pub fn held_agents(&self) -> Vec<(JobId, AgentId)> {
        self.run
            .stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .filter_map(|j| j.agent_id.map(|a| (j.id, a)))
            .collect()
    }

    fn stage_of(&self, job_id: JobId) -> Result<usize> {
        self.run
            .stages
            .iter()
            .position(|s| s.jobs.iter().any(|j| j.id == job_id))
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }
}

fn reset_job(job: &mut gantry_core::run::JobInstance) {
    job.status = JobStatus::Queued;
    job.attempts = 0;
    job.failure = None;
    job.agent_id = None;
    job.started_at = None;
    job.completed_at = None;
    job.queued_at = Utc::now();
}
