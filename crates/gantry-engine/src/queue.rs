//! Ready queue for jobs awaiting an agent.
//!
//! The queue's length is the dashboard's "Queue Length" counter: jobs that
//! are ready to run but have no free agent yet. Pool exhaustion is not an
//! error; jobs just wait here.

use chrono::{DateTime, Utc};
use gantry_core::ids::{JobId, PipelineId, RunId, StageId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Priority for queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// A job ready for dispatch.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub run_id: RunId,
    pub pipeline_id: PipelineId,
    pub job_id: JobId,
    pub stage: StageId,
    pub labels: Vec<String>,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier queued time
        match (self.priority as u8).cmp(&(other.priority as u8)) {
            Ordering::Equal => other.queued_at.cmp(&self.queued_at),
            other => other,
        }
    }
}

struct PipelineLimit {
    max_concurrent: usize,
    active: usize,
}

/// Priority queue with per-pipeline concurrency limits.
#[derive(Default)]
pub struct ReadyQueue {
    queue: BinaryHeap<QueuedJob>,
    limits: HashMap<PipelineId, PipelineLimit>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            limits: HashMap::new(),
        }
    }

    pub fn enqueue(&mut self, job: QueuedJob) {
        self.queue.push(job);
    }

    /// Pop the next dispatchable job, honoring pipeline limits. Jobs from
    /// saturated pipelines stay queued.
    pub fn dequeue(&mut self) -> Option<QueuedJob> {
        let mut held_back = Vec::new();
        let mut result = None;

        while let Some(job) = self.queue.pop() {
            if self.at_limit(job.pipeline_id) {
                held_back.push(job);
            } else {
                result = Some(job);
                break;
            }
        }

        for job in held_back {
            self.queue.push(job);
        }

        result
    }

    /// Put a job back; used when no agent was free.
    pub fn requeue(&mut self, job: QueuedJob) {
        self.queue.push(job);
    }

    /// A dequeued job actually went to an agent.
    pub fn note_dispatched(&mut self, pipeline_id: PipelineId) {
        if let Some(limit) = self.limits.get_mut(&pipeline_id) {
            limit.active += 1;
        }
    }

    /// A dispatched job released its agent (terminal, retried, or lost).
    pub fn note_completed(&mut self, pipeline_id: PipelineId) {
        if let Some(limit) = self.limits.get_mut(&pipeline_id) {
            limit.active = limit.active.saturating_sub(1);
        }
    }

    pub fn set_pipeline_limit(&mut self, pipeline_id: PipelineId, max_concurrent: usize) {
        self.limits.insert(
            pipeline_id,
            PipelineLimit {
                max_concurrent,
                active: 0,
            },
        );
    }

    /// Drop all queued jobs for a cancelled run.
    pub fn remove_run(&mut self, run_id: RunId) -> usize {
        let before = self.queue.len();
        self.queue.retain(|job| job.run_id != run_id);
        before - self.queue.len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn at_limit(&self, pipeline_id: PipelineId) -> bool {
        self.limits
            .get(&pipeline_id)
            .is_some_and(|limit| limit.active >= limit.max_concurrent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(pipeline_id: PipelineId, priority: Priority, name: &str) -> QueuedJob {
        QueuedJob {
            run_id: RunId::new(),
            pipeline_id,
            job_id: JobId::new(),
            stage: StageId::new(name),
            labels: vec![],
            priority,
            queued_at: Utc::now(),
        }
    }

    #[test]
    fn test_priority_ordering() {
        let mut queue = ReadyQueue::new();
        let pipeline = PipelineId::new();

        queue.enqueue(job(pipeline, Priority::Low, "low"));
        queue.enqueue(job(pipeline, Priority::High, "high"));

        let first = queue.dequeue().unwrap();
        assert_eq!(first.stage.as_str(), "high");
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = ReadyQueue::new();
        let pipeline = PipelineId::new();

        let mut first = job(pipeline, Priority::Normal, "first");
        first.queued_at = Utc::now() - chrono::Duration::seconds(5);
        queue.enqueue(first);
        queue.enqueue(job(pipeline, Priority::Normal, "second"));

        assert_eq!(queue.dequeue().unwrap().stage.as_str(), "first");
    }

    #[test]
    fn test_pipeline_limit_holds_jobs_back() {
        let mut queue = ReadyQueue::new();
        let pipeline = PipelineId::new();
        queue.set_pipeline_limit(pipeline, 1);

        queue.enqueue(job(pipeline, Priority::Normal, "a"));
        queue.enqueue(job(pipeline, Priority::Normal, "b"));

        let first = queue.dequeue().unwrap();
        queue.note_dispatched(pipeline);

        // Second job is held back until the first completes.
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.len(), 1);

        queue.note_completed(first.pipeline_id);
        assert!(queue.dequeue().is_some());
    }

    #[test]
    fn test_remove_run_drops_only_that_run() {
        let mut queue = ReadyQueue::new();
        let pipeline = PipelineId::new();

        let victim = job(pipeline, Priority::Normal, "victim");
        let victim_run = victim.run_id;
        queue.enqueue(victim);
        queue.enqueue(job(pipeline, Priority::Normal, "survivor"));

        assert_eq!(queue.remove_run(victim_run), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().unwrap().stage.as_str(), "survivor");
    }
}
