//! Broadcast-channel event bus.

use crate::subject::SubjectPattern;
use async_trait::async_trait;
use gantry_core::events::Event;
use gantry_core::ports::{EventBus, EventStream};
use gantry_core::{Error, Result};
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 1024;

/// In-process event bus. Cheap to clone; all clones share one channel.
///
/// Slow subscribers that fall more than the channel capacity behind see an
/// `EventBus` error item and then resume with the live tail.
#[derive(Clone)]
pub struct MemoryEventBus {
    tx: broadcast::Sender<Event>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        debug!(subject = %event.subject(), "Publishing event");
        // No subscribers is not an error; events are fire-and-forget.
        let _ = self.tx.send(event);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        debug!(pattern, "Subscribing to events");
        let rx = self.tx.subscribe();
        let pattern = SubjectPattern::new(pattern);

        let stream = futures::stream::unfold((rx, pattern), |(mut rx, pattern)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if pattern.matches(&event.subject()) {
                            return Some((Ok(event), (rx, pattern)));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        return Some((
                            Err(Error::EventBus(format!(
                                "subscriber lagged by {skipped} events"
                            ))),
                            (rx, pattern),
                        ));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use gantry_core::events::{AgentRegisteredPayload, JobStartedPayload};
    use gantry_core::ids::{AgentId, JobId, RunId};
    use gantry_core::run::LiveCounters;

    fn job_started(run_id: RunId) -> Event {
        Event::JobStarted(JobStartedPayload {
            run_id,
            job_id: JobId::new(),
            started_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_subscriber_receives_matching_events() {
        let bus = MemoryEventBus::new();
        let mut stream = bus.subscribe("run.>").await.unwrap();

        let run_id = RunId::new();
        bus.publish(job_started(run_id)).await.unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.run_id(), Some(run_id));
    }

    #[tokio::test]
    async fn test_pattern_filters_out_other_subjects() {
        let bus = MemoryEventBus::new();
        let mut stream = bus.subscribe("agent.registered").await.unwrap();

        bus.publish(job_started(RunId::new())).await.unwrap();
        bus.publish(Event::AgentRegistered(AgentRegisteredPayload {
            agent_id: AgentId::new(),
            name: "agent-1".into(),
            labels: vec![],
            registered_at: Utc::now(),
        }))
        .await
        .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert!(matches!(event, Event::AgentRegistered(_)));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryEventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(Event::CountersUpdated(LiveCounters {
            active_agents: 0,
            queue_length: 0,
            last_updated: Utc::now(),
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_every_event() {
        let bus = MemoryEventBus::new();
        let mut a = bus.subscribe(">").await.unwrap();
        let mut b = bus.subscribe(">").await.unwrap();

        bus.publish(job_started(RunId::new())).await.unwrap();

        assert!(a.next().await.unwrap().is_ok());
        assert!(b.next().await.unwrap().is_ok());
    }
}
