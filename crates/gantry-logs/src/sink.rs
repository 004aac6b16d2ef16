//! Per-job log channels.
//!
//! Appends for one job are strictly ordered through that job's own lock;
//! jobs never contend with each other beyond a shared map read-lock.

use crate::artifacts::ArtifactRegistry;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use gantry_core::ids::JobId;
use gantry_core::logs::{Artifact, ArtifactDescriptor, LogChunk};
use gantry_core::ports::{LogSink, LogStream};
use gantry_core::{Error, Result};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::debug;

struct JobLog {
    chunks: Vec<LogChunk>,
    sealed: bool,
}

struct JobChannel {
    state: Mutex<JobLog>,
    /// Bumped on every append and on seal; tails block on it.
    notify: watch::Sender<u64>,
}

impl JobChannel {
    fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            state: Mutex::new(JobLog {
                chunks: Vec::new(),
                sealed: false,
            }),
            notify,
        }
    }
}

/// In-memory log sink.
#[derive(Default)]
pub struct MemoryLogSink {
    jobs: RwLock<HashMap<JobId, Arc<JobChannel>>>,
    artifacts: ArtifactRegistry,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            artifacts: ArtifactRegistry::new(),
        }
    }

    async fn channel(&self, job_id: JobId) -> Arc<JobChannel> {
        if let Some(channel) = self.jobs.read().await.get(&job_id) {
            return channel.clone();
        }
        self.jobs
            .write()
            .await
            .entry(job_id)
            .or_insert_with(|| Arc::new(JobChannel::new()))
            .clone()
    }
}

struct TailState {
    channel: Arc<JobChannel>,
    next_seq: u64,
    buffer: VecDeque<LogChunk>,
    notify: watch::Receiver<u64>,
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn append(&self, job_id: JobId, content: &str) -> Result<u64> {
        let channel = self.channel(job_id).await;
        let mut log = channel.state.lock().await;

        if log.sealed {
            return Err(Error::JobTerminal(job_id.to_string()));
        }

        let seq = log.chunks.len() as u64;
        log.chunks.push(LogChunk {
            job_id,
            seq,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        drop(log);

        let _ = channel.notify.send(seq + 1);
        Ok(seq)
    }

    async fn tail(&self, job_id: JobId, from_seq: u64) -> Result<LogStream> {
        let channel = self.channel(job_id).await;
        let notify = channel.notify.subscribe();
        let state = TailState {
            channel,
            next_seq: from_seq,
            buffer: VecDeque::new(),
            notify,
        };

        let stream = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(chunk) = st.buffer.pop_front() {
                    return Some((chunk, st));
                }

                let sealed = {
                    let log = st.channel.state.lock().await;
                    let stored = log.chunks.len() as u64;
                    if st.next_seq < stored {
                        for chunk in &log.chunks[st.next_seq as usize..] {
                            st.buffer.push_back(chunk.clone());
                        }
                        st.next_seq = stored;
                    }
                    log.sealed
                };

                if !st.buffer.is_empty() {
                    continue;
                }
                if sealed {
                    return None;
                }
                if st.notify.changed().await.is_err() {
                    return None;
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn seal(&self, job_id: JobId) -> Result<()> {
        let channel = self.channel(job_id).await;
        let mut log = channel.state.lock().await;
        log.sealed = true;
        let stored = log.chunks.len() as u64;
        drop(log);

        debug!(job_id = %job_id, chunks = stored, "Log sealed");
        let _ = channel.notify.send(stored);
        Ok(())
    }

    async fn reopen(&self, job_id: JobId) -> Result<()> {
        let channel = self.channel(job_id).await;
        let mut log = channel.state.lock().await;
        log.sealed = false;
        Ok(())
    }

    async fn register_artifact(
        &self,
        job_id: JobId,
        descriptor: ArtifactDescriptor,
    ) -> Result<Artifact> {
        Ok(self.artifacts.register(job_id, descriptor).await)
    }

    async fn artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>> {
        Ok(self.artifacts.list(job_id).await)
    }

    async fn search(&self, job_id: JobId, pattern: &str) -> Result<Vec<LogChunk>> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Internal(format!("invalid search pattern: {e}")))?;

        let channel = self.channel(job_id).await;
        let log = channel.state.lock().await;
        Ok(log
            .chunks
            .iter()
            .filter(|chunk| regex.is_match(&chunk.content))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_tail_replays_everything_appended() {
        let sink = MemoryLogSink::new();
        let job_id = JobId::new();

        for i in 0..5 {
            sink.append(job_id, &format!("line {i}")).await.unwrap();
        }
        sink.seal(job_id).await.unwrap();

        let chunks: Vec<_> = sink.tail(job_id, 0).await.unwrap().collect().await;
        assert_eq!(chunks.len(), 5);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.seq, i as u64);
            assert_eq!(chunk.content, format!("line {i}"));
        }
    }

    #[tokio::test]
    async fn test_tail_follows_live_appends() {
        let sink = Arc::new(MemoryLogSink::new());
        let job_id = JobId::new();

        sink.append(job_id, "early").await.unwrap();

        let tail = sink.tail(job_id, 0).await.unwrap();
        let writer = sink.clone();
        let producer = tokio::spawn(async move {
            for i in 0..3 {
                writer.append(job_id, &format!("late {i}")).await.unwrap();
            }
            writer.seal(job_id).await.unwrap();
        });

        let chunks: Vec<_> = tail.collect().await;
        producer.await.unwrap();

        let contents: Vec<_> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["early", "late 0", "late 1", "late 2"]);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_by_offset() {
        let sink = MemoryLogSink::new();
        let job_id = JobId::new();

        for i in 0..4 {
            sink.append(job_id, &format!("line {i}")).await.unwrap();
        }
        sink.seal(job_id).await.unwrap();

        let chunks: Vec<_> = sink.tail(job_id, 2).await.unwrap().collect().await;
        let contents: Vec<_> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["line 2", "line 3"]);
    }

    #[tokio::test]
    async fn test_append_after_seal_is_rejected() {
        let sink = MemoryLogSink::new();
        let job_id = JobId::new();

        sink.append(job_id, "output").await.unwrap();
        sink.seal(job_id).await.unwrap();

        let err = sink.append(job_id, "too late").await.unwrap_err();
        assert!(matches!(err, Error::JobTerminal(_)));
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn test_reopen_allows_retry_appends() {
        let sink = MemoryLogSink::new();
        let job_id = JobId::new();

        sink.append(job_id, "attempt 1").await.unwrap();
        sink.seal(job_id).await.unwrap();
        sink.reopen(job_id).await.unwrap();
        sink.append(job_id, "attempt 2").await.unwrap();
        sink.seal(job_id).await.unwrap();

        let chunks: Vec<_> = sink.tail(job_id, 0).await.unwrap().collect().await;
        let contents: Vec<_> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["attempt 1", "attempt 2"]);
    }

    #[tokio::test]
    async fn test_jobs_do_not_interleave() {
        let sink = MemoryLogSink::new();
        let a = JobId::new();
        let b = JobId::new();

        sink.append(a, "a0").await.unwrap();
        sink.append(b, "b0").await.unwrap();
        sink.append(a, "a1").await.unwrap();
        sink.seal(a).await.unwrap();
        sink.seal(b).await.unwrap();

        let chunks: Vec<_> = sink.tail(a, 0).await.unwrap().collect().await;
        let contents: Vec<_> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["a0", "a1"]);
    }

    #[tokio::test]
    async fn test_search_filters_chunks() {
        let sink = MemoryLogSink::new();
        let job_id = JobId::new();

        sink.append(job_id, "compiling module a").await.unwrap();
        sink.append(job_id, "error: missing symbol").await.unwrap();
        sink.append(job_id, "compiling module b").await.unwrap();

        let hits = sink.search(job_id, r"^error:").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seq, 1);

        assert!(sink.search(job_id, "[").await.is_err());
    }
}
