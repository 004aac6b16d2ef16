//! Status rollup.
//!
//! Stage and run statuses are never stored; they are derived from job
//! statuses by these stateless reducers, invoked on every event. A stage's
//! status is undefined (reported Queued/Running) until every job in it is
//! terminal.

use gantry_core::run::{
    JobInstance, JobStatus, JobSummary, PipelineRun, RunStatus, RunStatusSnapshot, StageSnapshot,
    StageStatus,
};

/// Derive a stage's status from its job statuses.
///
/// A stage with zero jobs is vacuously Succeeded. Cancelled takes
/// precedence over Failed so operator intervention is distinguishable from
/// executor error.
pub fn stage_status(jobs: &[JobStatus]) -> StageStatus {
    if jobs.is_empty() {
        return StageStatus::Succeeded;
    }

    if jobs.iter().all(|status| status.is_terminal()) {
        if jobs.contains(&JobStatus::Cancelled) {
            return StageStatus::Cancelled;
        }
        if jobs.contains(&JobStatus::Failed) {
            return StageStatus::Failed;
        }
        if jobs.iter().all(|status| *status == JobStatus::Skipped) {
            return StageStatus::Skipped;
        }
        return StageStatus::Succeeded;
    }

    if jobs.iter().any(|status| status.is_active()) {
        return StageStatus::Running;
    }
    StageStatus::Queued
}

/// Derive the run status from its stage statuses.
///
/// Escalates to Failed as soon as any stage fails; Succeeded only when
/// every stage is successful (the final stage included).
pub fn run_status(stages: &[StageStatus]) -> RunStatus {
    if stages.contains(&StageStatus::Cancelled) {
        return RunStatus::Cancelled;
    }
    if stages.contains(&StageStatus::Failed) {
        return RunStatus::Failed;
    }
    if stages.iter().all(|status| status.is_success()) {
        return RunStatus::Succeeded;
    }
    // Any progress at all means the run is underway.
    if stages
        .iter()
        .any(|status| *status == StageStatus::Running || status.is_terminal())
    {
        return RunStatus::Running;
    }
    RunStatus::Queued
}

pub fn job_summary(job: &JobInstance) -> JobSummary {
    JobSummary {
        id: job.id,
        name: job.name.clone(),
        status: job.status,
        agent_id: job.agent_id,
        attempts: job.attempts,
        failure: job.failure.clone(),
        estimated_duration_secs: job.estimated_duration_secs,
        duration_ms: job.duration_ms(),
    }
}

/// Build an observer snapshot with derived statuses from an instance tree.
pub fn snapshot_run(run: &PipelineRun) -> RunStatusSnapshot {
    let stages: Vec<StageSnapshot> = run
        .stages
        .iter()
        .map(|stage| {
            let statuses: Vec<JobStatus> = stage.jobs.iter().map(|j| j.status).collect();
            StageSnapshot {
                id: stage.id.clone(),
                name: stage.name.clone(),
                status: stage_status(&statuses),
                jobs: stage.jobs.iter().map(job_summary).collect(),
                started_at: stage.started_at,
                completed_at: stage.completed_at,
                duration_ms: stage.duration_ms(),
            }
        })
        .collect();

    let status = run_status(&stages.iter().map(|s| s.status).collect::<Vec<_>>());

    RunStatusSnapshot {
        run_id: run.id,
        pipeline_id: run.pipeline_id,
        pipeline_name: run.pipeline_name.clone(),
        run_number: run.run_number,
        status,
        trigger: run.trigger.clone(),
        stages,
        queued_at: run.queued_at,
        started_at: run.started_at,
        completed_at: run.completed_at,
        duration_ms: run.duration_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::run::JobStatus::*;

    #[test]
    fn test_empty_stage_is_vacuously_succeeded() {
        assert_eq!(stage_status(&[]), StageStatus::Succeeded);
    }

    #[test]
    fn test_stage_undefined_until_all_terminal() {
        // One failure with a sibling still running: not Failed yet.
        assert_eq!(stage_status(&[Failed, Running]), StageStatus::Running);
        assert_eq!(stage_status(&[Failed, Succeeded]), StageStatus::Failed);
    }

    #[test]
    fn test_stage_queued_between_dispatches() {
        assert_eq!(stage_status(&[Succeeded, Queued]), StageStatus::Queued);
        assert_eq!(stage_status(&[Queued, Queued]), StageStatus::Queued);
    }

    #[test]
    fn test_cancelled_beats_failed() {
        assert_eq!(stage_status(&[Failed, Cancelled]), StageStatus::Cancelled);
    }

    #[test]
    fn test_skipped_jobs_do_not_fail_a_stage() {
        assert_eq!(stage_status(&[Succeeded, Skipped]), StageStatus::Succeeded);
        assert_eq!(stage_status(&[Skipped, Skipped]), StageStatus::Skipped);
    }

    #[test]
    fn test_run_escalates_on_stage_failure() {
        use StageStatus as S;
        assert_eq!(
            run_status(&[S::Succeeded, S::Failed, S::Skipped]),
            RunStatus::Failed
        );
    }

    #[test]
    fn test_run_succeeds_only_at_the_end() {
        use StageStatus as S;
        assert_eq!(run_status(&[S::Succeeded, S::Queued]), RunStatus::Running);
        assert_eq!(run_status(&[S::Succeeded, S::Running]), RunStatus::Running);
        assert_eq!(
            run_status(&[S::Succeeded, S::Succeeded]),
            RunStatus::Succeeded
        );
    }

    #[test]
    fn test_run_cancelled_mid_stage() {
        use StageStatus as S;
        assert_eq!(
            run_status(&[S::Succeeded, S::Cancelled, S::Skipped]),
            RunStatus::Cancelled
        );
    }

    #[test]
    fn test_fresh_run_is_queued() {
        use StageStatus as S;
        assert_eq!(run_status(&[S::Queued, S::Queued]), RunStatus::Queued);
    }
}
